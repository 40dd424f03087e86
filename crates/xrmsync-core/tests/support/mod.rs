//! In-memory registration store shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use xrmsync_core::client::{RegistrationClient, SolutionStore};
use xrmsync_core::error::{RemoteCategory, XrmError, XrmResult};
use xrmsync_core::id::RecordId;
use xrmsync_core::model::{
    ImageDeclaration, NewAssembly, NewPluginType, PluginAssembly, PluginImage, PluginStep,
    PluginType, ReflectedType, SolutionComponentType, StepDeclaration,
};
use xrmsync_core::plugins::PluginService;
use xrmsync_core::reflection::AssemblyReflector;
use xrmsync_core::solution::SolutionMembership;

#[derive(Default)]
struct State {
    next_id: u64,
    assemblies: Vec<(PluginAssembly, String)>,
    types: Vec<(RecordId, PluginType)>,
    steps: Vec<(RecordId, PluginStep)>,
    images: Vec<(RecordId, PluginImage)>,
    solutions: HashMap<String, RecordId>,
    components: Vec<(RecordId, RecordId, i32)>,
    calls: Vec<String>,
    fail_on: Option<String>,
    cancel_on: Option<(String, CancellationToken)>,
    omit_ids: bool,
}

impl State {
    fn new_id(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId::new(format!("00000000-0000-4000-8000-{:012}", self.next_id))
    }

    /// Log the call, then apply any injected failure or cancellation.
    fn record(&mut self, op: &str, detail: &str) -> XrmResult<()> {
        self.calls.push(format!("{op}:{detail}"));
        if let Some((cancel_op, token)) = &self.cancel_on {
            if cancel_op == op {
                token.cancel();
            }
        }
        if self.fail_on.as_deref() == Some(op) {
            self.fail_on = None;
            return Err(XrmError::remote(
                RemoteCategory::Rejected,
                Some(400),
                format!("injected failure in {op}"),
            ));
        }
        Ok(())
    }

    fn returned(&self, id: RecordId) -> Option<RecordId> {
        if self.omit_ids { None } else { Some(id) }
    }
}

/// Dataverse stand-in holding assemblies, types, steps, images and solutions.
#[derive(Clone, Default)]
pub struct MemoryDataverse {
    state: Arc<Mutex<State>>,
}

impl MemoryDataverse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn service(&self) -> PluginService {
        self.service_with_default("Default")
    }

    pub fn service_with_default(&self, default_solution: &str) -> PluginService {
        let membership = SolutionMembership::new(Arc::new(self.clone()))
            .with_default_solution(default_solution);
        PluginService::new(Arc::new(self.clone()), membership)
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    pub fn seed_assembly(&self, name: &str) -> RecordId {
        let mut state = self.lock();
        let id = state.new_id();
        state.assemblies.push((
            PluginAssembly {
                id: id.clone(),
                name: name.to_string(),
                version: Some("1.0.0.0".to_string()),
                isolation_mode: None,
                source_type: None,
                public_key_token: None,
                culture: Some("neutral".to_string()),
            },
            String::new(),
        ));
        id
    }

    pub fn seed_type(&self, assembly_id: &RecordId, type_name: &str) -> RecordId {
        let mut state = self.lock();
        let id = state.new_id();
        state
            .types
            .push((assembly_id.clone(), plugin_type(id.clone(), &NewPluginType::new(type_name))));
        id
    }

    pub fn seed_step(&self, type_id: &RecordId, name: &str, step: &StepDeclaration) -> RecordId {
        let mut state = self.lock();
        let id = state.new_id();
        state.steps.push((type_id.clone(), plugin_step(id.clone(), name, step)));
        id
    }

    pub fn seed_image(&self, step_id: &RecordId, image: &ImageDeclaration) -> RecordId {
        let mut state = self.lock();
        let id = state.new_id();
        state.images.push((step_id.clone(), plugin_image(id.clone(), image)));
        id
    }

    pub fn seed_solution(&self, unique_name: &str) -> RecordId {
        let mut state = self.lock();
        let id = state.new_id();
        state.solutions.insert(unique_name.to_lowercase(), id.clone());
        id
    }

    // ---------------------------------------------------------------------
    // Behaviour switches
    // ---------------------------------------------------------------------

    /// The next call to `op` fails with a rejected remote error.
    pub fn fail_on(&self, op: &str) {
        self.lock().fail_on = Some(op.to_string());
    }

    /// Cancel `token` when `op` is first called.
    pub fn cancel_on(&self, op: &str, token: CancellationToken) {
        self.lock().cancel_on = Some((op.to_string(), token));
    }

    /// Create responses come back without the new id.
    pub fn omit_created_ids(&self) {
        self.lock().omit_ids = true;
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls that change the store.
    pub fn write_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["create_", "update_", "delete_", "add_solution_component"]
                    .iter()
                    .any(|p| c.starts_with(p))
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn assembly(&self, id: &RecordId) -> Option<(PluginAssembly, String)> {
        self.lock().assemblies.iter().find(|(a, _)| &a.id == id).cloned()
    }

    pub fn type_names(&self, assembly_id: &RecordId) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .types
            .iter()
            .filter(|(owner, _)| owner == assembly_id)
            .map(|(_, t)| t.full_name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn type_id(&self, assembly_id: &RecordId, type_name: &str) -> Option<RecordId> {
        self.lock()
            .types
            .iter()
            .find(|(owner, t)| owner == assembly_id && t.full_name() == type_name)
            .map(|(_, t)| t.id.clone())
    }

    pub fn steps_of(&self, type_id: &RecordId) -> Vec<PluginStep> {
        self.lock()
            .steps
            .iter()
            .filter(|(owner, _)| owner == type_id)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn images_of(&self, step_id: &RecordId) -> Vec<PluginImage> {
        self.lock()
            .images
            .iter()
            .filter(|(owner, _)| owner == step_id)
            .map(|(_, i)| i.clone())
            .collect()
    }

    pub fn step_count(&self) -> usize {
        self.lock().steps.len()
    }

    pub fn image_count(&self) -> usize {
        self.lock().images.len()
    }

    pub fn solution_components(&self, unique_name: &str) -> Vec<(RecordId, i32)> {
        let state = self.lock();
        let Some(solution_id) = state.solutions.get(&unique_name.to_lowercase()) else {
            return Vec::new();
        };
        state
            .components
            .iter()
            .filter(|(owner, _, _)| owner == solution_id)
            .map(|(_, id, code)| (id.clone(), *code))
            .collect()
    }
}

fn plugin_type(id: RecordId, new: &NewPluginType) -> PluginType {
    PluginType {
        id,
        name: new.type_name.clone(),
        friendly_name: Some(new.friendly_name.clone()),
        type_name: Some(new.type_name.clone()),
    }
}

fn plugin_step(id: RecordId, name: &str, step: &StepDeclaration) -> PluginStep {
    let (status, status_reason) = step.status_codes();
    PluginStep {
        id,
        name: name.to_string(),
        stage: Some(step.stage.code()),
        mode: Some(step.mode.code()),
        rank: Some(step.rank),
        status: Some(status),
        status_reason: Some(status_reason),
        message_name: Some(step.message.clone()),
        primary_entity: step.primary_entity.clone(),
        filtering_attributes: step.filtering_attributes_value(),
        description: step.description.clone(),
    }
}

fn plugin_image(id: RecordId, image: &ImageDeclaration) -> PluginImage {
    PluginImage {
        id,
        name: image.name.clone(),
        image_type: Some(image.image_type.code()),
        entity_alias: Some(image.alias().to_string()),
        attributes: image.attributes_value(),
        message_property_name: Some(image.message_property().to_string()),
    }
}

#[async_trait]
impl RegistrationClient for MemoryDataverse {
    async fn create_assembly(&self, assembly: &NewAssembly) -> XrmResult<Option<RecordId>> {
        let mut state = self.lock();
        state.record("create_assembly", &assembly.name)?;
        let id = state.new_id();
        state.assemblies.push((
            PluginAssembly {
                id: id.clone(),
                name: assembly.name.clone(),
                version: None,
                isolation_mode: Some(assembly.isolation_mode),
                source_type: Some(assembly.source_type),
                public_key_token: None,
                culture: None,
            },
            assembly.content_base64.clone(),
        ));
        Ok(state.returned(id))
    }

    async fn update_assembly_content(&self, id: &RecordId, content_base64: &str) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("update_assembly_content", id.as_str())?;
        let entry = state
            .assemblies
            .iter_mut()
            .find(|(a, _)| &a.id == id)
            .ok_or_else(|| XrmError::not_found("plugin assembly", id.as_str()))?;
        entry.1 = content_base64.to_string();
        Ok(())
    }

    async fn list_assemblies(&self) -> XrmResult<Vec<PluginAssembly>> {
        let mut state = self.lock();
        state.record("list_assemblies", "")?;
        Ok(state.assemblies.iter().map(|(a, _)| a.clone()).collect())
    }

    async fn find_assembly_by_name(&self, name: &str) -> XrmResult<Option<PluginAssembly>> {
        let mut state = self.lock();
        state.record("find_assembly_by_name", name)?;
        Ok(state
            .assemblies
            .iter()
            .find(|(a, _)| a.name == name)
            .map(|(a, _)| a.clone()))
    }

    async fn list_types_for_assembly(&self, assembly_id: &RecordId) -> XrmResult<Vec<PluginType>> {
        let mut state = self.lock();
        state.record("list_types_for_assembly", assembly_id.as_str())?;
        Ok(state
            .types
            .iter()
            .filter(|(owner, _)| owner == assembly_id)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn list_steps_for_type(&self, type_id: &RecordId) -> XrmResult<Vec<PluginStep>> {
        let mut state = self.lock();
        state.record("list_steps_for_type", type_id.as_str())?;
        Ok(state
            .steps
            .iter()
            .filter(|(owner, _)| owner == type_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn list_images_for_step(&self, step_id: &RecordId) -> XrmResult<Vec<PluginImage>> {
        let mut state = self.lock();
        state.record("list_images_for_step", step_id.as_str())?;
        Ok(state
            .images
            .iter()
            .filter(|(owner, _)| owner == step_id)
            .map(|(_, i)| i.clone())
            .collect())
    }

    async fn create_type(
        &self,
        assembly_id: &RecordId,
        new: &NewPluginType,
    ) -> XrmResult<Option<RecordId>> {
        let mut state = self.lock();
        state.record("create_type", &new.type_name)?;
        let id = state.new_id();
        state
            .types
            .push((assembly_id.clone(), plugin_type(id.clone(), new)));
        Ok(state.returned(id))
    }

    async fn delete_type(&self, id: &RecordId) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("delete_type", id.as_str())?;
        if state.steps.iter().any(|(owner, _)| owner == id) {
            return Err(XrmError::remote(
                RemoteCategory::Rejected,
                Some(400),
                "plugin type still has steps",
            ));
        }
        state.types.retain(|(_, t)| &t.id != id);
        Ok(())
    }

    async fn create_step(
        &self,
        type_id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<Option<RecordId>> {
        let mut state = self.lock();
        state.record("create_step", name)?;
        let id = state.new_id();
        // The store creates every step enabled.
        let mut created = plugin_step(id.clone(), name, step);
        created.status = Some(0);
        created.status_reason = Some(1);
        state.steps.push((type_id.clone(), created));
        Ok(state.returned(id))
    }

    async fn update_step(
        &self,
        id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("update_step", name)?;
        let entry = state
            .steps
            .iter_mut()
            .find(|(_, s)| &s.id == id)
            .ok_or_else(|| XrmError::not_found("step", name))?;
        let mut updated = plugin_step(id.clone(), name, step);
        if updated.description.is_none() {
            updated.description = entry.1.description.take();
        }
        entry.1 = updated;
        Ok(())
    }

    async fn delete_step(&self, id: &RecordId) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("delete_step", id.as_str())?;
        if state.images.iter().any(|(owner, _)| owner == id) {
            return Err(XrmError::remote(
                RemoteCategory::Rejected,
                Some(400),
                "step still has images",
            ));
        }
        state.steps.retain(|(_, s)| &s.id != id);
        Ok(())
    }

    async fn create_image(
        &self,
        step_id: &RecordId,
        image: &ImageDeclaration,
    ) -> XrmResult<Option<RecordId>> {
        let mut state = self.lock();
        state.record("create_image", &image.name)?;
        let id = state.new_id();
        state
            .images
            .push((step_id.clone(), plugin_image(id.clone(), image)));
        Ok(state.returned(id))
    }

    async fn update_image(&self, id: &RecordId, image: &ImageDeclaration) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("update_image", &image.name)?;
        let entry = state
            .images
            .iter_mut()
            .find(|(_, i)| &i.id == id)
            .ok_or_else(|| XrmError::not_found("image", &image.name))?;
        entry.1 = plugin_image(id.clone(), image);
        Ok(())
    }

    async fn delete_image(&self, id: &RecordId) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("delete_image", id.as_str())?;
        state.images.retain(|(_, i)| &i.id != id);
        Ok(())
    }
}

#[async_trait]
impl SolutionStore for MemoryDataverse {
    async fn find_solution_id(&self, unique_name: &str) -> XrmResult<Option<RecordId>> {
        let mut state = self.lock();
        state.record("find_solution_id", unique_name)?;
        Ok(state.solutions.get(&unique_name.to_lowercase()).cloned())
    }

    async fn is_component_in_solution(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_id: &RecordId,
    ) -> XrmResult<bool> {
        let mut state = self.lock();
        state.record("is_component_in_solution", component_id.as_str())?;
        Ok(state.components.iter().any(|(owner, id, code)| {
            owner == solution_id && id == component_id && *code == component_type.code()
        }))
    }

    async fn add_solution_component(
        &self,
        component_id: &RecordId,
        component_type: SolutionComponentType,
        solution_unique_name: &str,
    ) -> XrmResult<()> {
        let mut state = self.lock();
        state.record("add_solution_component", component_id.as_str())?;
        let solution_id = state
            .solutions
            .get(&solution_unique_name.to_lowercase())
            .cloned()
            .ok_or_else(|| XrmError::not_found("solution", solution_unique_name))?;
        state
            .components
            .push((solution_id, component_id.clone(), component_type.code()));
        Ok(())
    }
}

/// Reflector returning a fixed set of types for any path.
#[derive(Clone, Default)]
pub struct FixedReflector {
    types: Arc<Mutex<Vec<ReflectedType>>>,
}

impl FixedReflector {
    pub fn new(types: Vec<ReflectedType>) -> Self {
        Self {
            types: Arc::new(Mutex::new(types)),
        }
    }

    pub fn set(&self, types: Vec<ReflectedType>) {
        *self.types.lock().unwrap() = types;
    }
}

#[async_trait]
impl AssemblyReflector for FixedReflector {
    async fn extract_plugin_types(&self, assembly_path: &Path) -> XrmResult<Vec<ReflectedType>> {
        let types = self.types.lock().unwrap().clone();
        if types.is_empty() {
            return Err(XrmError::reflection(assembly_path, "no plugin types found"));
        }
        Ok(types)
    }
}
