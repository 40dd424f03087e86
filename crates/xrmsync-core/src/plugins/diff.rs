//! Pure difference computation between reflected declarations and the
//! registrations read from the environment.
//!
//! Nothing here talks to the store; the manager turns these plans into calls.

use std::collections::{HashMap, HashSet};

use crate::model::{
    ImageDeclaration, PluginImage, PluginStep, PluginType, ReflectedType, StepDeclaration, StepKey,
    attribute_set,
};

/// Partition of local and remote plugin types by full type name.
#[derive(Debug, Default)]
pub struct TypePlan<'a> {
    /// Reflected locally, absent remotely.
    pub to_create: Vec<&'a ReflectedType>,
    /// Present on both sides.
    pub to_keep: Vec<(&'a ReflectedType, &'a PluginType)>,
    /// Registered remotely, no longer reflected.
    pub to_remove: Vec<&'a PluginType>,
}

/// Split `local ∪ remote` into create / keep / remove by exact full type name.
///
/// Duplicate reflected names collapse onto their first occurrence, so one
/// reflected name never yields two creates.
pub fn partition_types<'a>(local: &'a [ReflectedType], remote: &'a [PluginType]) -> TypePlan<'a> {
    let mut remote_by_name: HashMap<&str, &PluginType> = HashMap::new();
    for ty in remote {
        remote_by_name.entry(ty.full_name()).or_insert(ty);
    }

    let mut plan = TypePlan::default();
    let mut seen = HashSet::new();
    for reflected in local {
        if !seen.insert(reflected.type_name.as_str()) {
            continue;
        }
        match remote_by_name.get(reflected.type_name.as_str()) {
            Some(existing) => plan.to_keep.push((reflected, *existing)),
            None => plan.to_create.push(reflected),
        }
    }

    plan.to_remove = remote
        .iter()
        .filter(|ty| !seen.contains(ty.full_name()))
        .collect();
    plan
}

/// A declared step matched to its remote registration.
#[derive(Debug)]
pub struct StepMatch<'a> {
    pub declared: &'a StepDeclaration,
    pub remote: &'a PluginStep,
    pub needs_update: bool,
}

#[derive(Debug, Default)]
pub struct StepPlan<'a> {
    pub to_create: Vec<&'a StepDeclaration>,
    pub matched: Vec<StepMatch<'a>>,
    /// Remote steps with no declaration; reported, never removed.
    pub undeclared: usize,
}

/// Match declared steps to remote ones by [`StepKey`].
pub fn plan_steps<'a>(
    type_name: &str,
    declared: &'a [StepDeclaration],
    remote: &'a [PluginStep],
) -> StepPlan<'a> {
    let mut remote_by_key: HashMap<StepKey, &PluginStep> = HashMap::new();
    for step in remote {
        if let Some(key) = step.key() {
            remote_by_key.entry(key).or_insert(step);
        }
    }

    let mut plan = StepPlan::default();
    let mut seen = HashSet::new();
    for step in declared {
        let key = step.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        match remote_by_key.get(&key) {
            Some(existing) => plan.matched.push(StepMatch {
                declared: step,
                remote: existing,
                needs_update: step_needs_update(type_name, existing, step),
            }),
            None => plan.to_create.push(step),
        }
    }

    plan.undeclared = remote
        .iter()
        .filter(|s| s.key().is_none_or(|k| !seen.contains(&k)))
        .count();
    plan
}

/// Whether the remote step differs from its declaration in any field the
/// declaration controls. Message, stage and entity form the key and are equal.
pub fn step_needs_update(
    type_name: &str,
    remote: &PluginStep,
    declared: &StepDeclaration,
) -> bool {
    if remote.mode.unwrap_or(0) != declared.mode.code() {
        return true;
    }
    if remote.rank.unwrap_or(1) != declared.rank {
        return true;
    }
    if attribute_set(remote.filtering_attributes.as_deref())
        != attribute_set(declared.filtering_attributes_value().as_deref())
    {
        return true;
    }
    if remote.is_enabled() != declared.enabled {
        return true;
    }
    if declared.name.is_some() && remote.name != declared.display_name(type_name) {
        return true;
    }
    if let Some(description) = &declared.description {
        if remote.description.as_deref() != Some(description.as_str()) {
            return true;
        }
    }
    false
}

#[derive(Debug)]
pub struct ImageMatch<'a> {
    pub declared: &'a ImageDeclaration,
    pub remote: &'a PluginImage,
    pub needs_update: bool,
}

#[derive(Debug, Default)]
pub struct ImagePlan<'a> {
    pub to_create: Vec<&'a ImageDeclaration>,
    pub matched: Vec<ImageMatch<'a>>,
    pub undeclared: usize,
}

/// Match declared images to remote ones by name (case-insensitive).
pub fn plan_images<'a>(
    declared: &'a [ImageDeclaration],
    remote: &'a [PluginImage],
) -> ImagePlan<'a> {
    let mut remote_by_name: HashMap<String, &PluginImage> = HashMap::new();
    for image in remote {
        remote_by_name
            .entry(image.name.to_lowercase())
            .or_insert(image);
    }

    let mut plan = ImagePlan::default();
    let mut seen = HashSet::new();
    for image in declared {
        let key = image.name.to_lowercase();
        if !seen.insert(key.clone()) {
            continue;
        }
        match remote_by_name.get(&key) {
            Some(existing) => plan.matched.push(ImageMatch {
                declared: image,
                remote: existing,
                needs_update: image_needs_update(existing, image),
            }),
            None => plan.to_create.push(image),
        }
    }

    plan.undeclared = remote
        .iter()
        .filter(|i| !seen.contains(&i.name.to_lowercase()))
        .count();
    plan
}

pub fn image_needs_update(remote: &PluginImage, declared: &ImageDeclaration) -> bool {
    if remote.image_type != Some(declared.image_type.code()) {
        return true;
    }
    if !remote
        .entity_alias
        .as_deref()
        .is_some_and(|alias| alias.eq_ignore_ascii_case(declared.alias()))
    {
        return true;
    }
    if attribute_set(remote.attributes.as_deref())
        != attribute_set(declared.attributes_value().as_deref())
    {
        return true;
    }
    !remote
        .message_property_name
        .as_deref()
        .unwrap_or(crate::model::DEFAULT_MESSAGE_PROPERTY)
        .eq_ignore_ascii_case(declared.message_property())
}
