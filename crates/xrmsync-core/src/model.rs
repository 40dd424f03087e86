//! Registration records as read from the environment, and the step/image
//! declarations reflected from a local assembly.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::RecordId;

/// Message property an image reads from when none is declared.
pub const DEFAULT_MESSAGE_PROPERTY: &str = "Target";

// =============================================================================
// Remote records
// =============================================================================

/// Where the assembly code executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IsolationMode {
    None,
    #[default]
    Sandbox,
    External,
}

impl IsolationMode {
    pub fn code(self) -> i32 {
        match self {
            IsolationMode::None => 1,
            IsolationMode::Sandbox => 2,
            IsolationMode::External => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(IsolationMode::None),
            2 => Some(IsolationMode::Sandbox),
            3 => Some(IsolationMode::External),
            _ => None,
        }
    }
}

/// Where the assembly binary is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceType {
    #[default]
    Database,
    Disk,
    Normal,
    AzureWebApp,
    FileStore,
}

impl SourceType {
    pub fn code(self) -> i32 {
        match self {
            SourceType::Database => 0,
            SourceType::Disk => 1,
            SourceType::Normal => 2,
            SourceType::AzureWebApp => 3,
            SourceType::FileStore => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SourceType::Database),
            1 => Some(SourceType::Disk),
            2 => Some(SourceType::Normal),
            3 => Some(SourceType::AzureWebApp),
            4 => Some(SourceType::FileStore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginAssembly {
    pub id: RecordId,
    pub name: String,
    pub version: Option<String>,
    pub isolation_mode: Option<IsolationMode>,
    pub source_type: Option<SourceType>,
    pub public_key_token: Option<String>,
    pub culture: Option<String>,
}

/// Payload for creating an assembly row.
#[derive(Debug, Clone)]
pub struct NewAssembly {
    pub name: String,
    pub content_base64: String,
    pub isolation_mode: IsolationMode,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginType {
    pub id: RecordId,
    pub name: String,
    pub friendly_name: Option<String>,
    pub type_name: Option<String>,
}

impl PluginType {
    /// Key used to match this type against reflected types.
    pub fn full_name(&self) -> &str {
        self.type_name.as_deref().unwrap_or(&self.name)
    }
}

/// Payload for creating a plugin type row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPluginType {
    pub type_name: String,
    pub friendly_name: String,
}

impl NewPluginType {
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            friendly_name: type_name.clone(),
            type_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStep {
    pub id: RecordId,
    pub name: String,
    pub stage: Option<i32>,
    pub mode: Option<i32>,
    pub rank: Option<i32>,
    /// statecode: 0 enabled, 1 disabled
    pub status: Option<i32>,
    pub status_reason: Option<i32>,
    pub message_name: Option<String>,
    pub primary_entity: Option<String>,
    pub filtering_attributes: Option<String>,
    pub description: Option<String>,
}

impl PluginStep {
    /// Natural identity of the step; `None` when the store omitted the
    /// message or stage, in which case the step never matches a declaration.
    pub fn key(&self) -> Option<StepKey> {
        let message = self.message_name.as_deref()?;
        let stage = self.stage?;
        Some(StepKey::new(message, stage, self.primary_entity.as_deref()))
    }

    pub fn is_enabled(&self) -> bool {
        self.status.unwrap_or(0) == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginImage {
    pub id: RecordId,
    pub name: String,
    pub image_type: Option<i32>,
    pub entity_alias: Option<String>,
    pub attributes: Option<String>,
    pub message_property_name: Option<String>,
}

/// Component type codes understood by `AddSolutionComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolutionComponentType {
    WebResource,
    PluginType,
    PluginAssembly,
    PluginStep,
    PluginImage,
}

impl SolutionComponentType {
    pub fn code(self) -> i32 {
        match self {
            SolutionComponentType::WebResource => 61,
            SolutionComponentType::PluginType => 90,
            SolutionComponentType::PluginAssembly => 91,
            SolutionComponentType::PluginStep => 92,
            SolutionComponentType::PluginImage => 93,
        }
    }
}

// =============================================================================
// Reflected declarations
// =============================================================================

/// One plugin type found in a local assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectedType {
    pub type_name: String,
    /// Step hints declared by the type. `None` means the assembly carries no
    /// hints and only the type's existence is managed.
    #[serde(default)]
    pub steps: Option<Vec<StepDeclaration>>,
}

impl ReflectedType {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            steps: None,
        }
    }

    pub fn with_step(mut self, step: StepDeclaration) -> Self {
        self.steps.get_or_insert_with(Vec::new).push(step);
        self
    }

    pub fn declared_steps(&self) -> &[StepDeclaration] {
        self.steps.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStage {
    #[serde(alias = "preValidation", alias = "pre-validation")]
    PreValidation,
    #[serde(alias = "preOperation", alias = "pre-operation")]
    PreOperation,
    #[serde(alias = "postOperation", alias = "post-operation")]
    PostOperation,
}

impl StepStage {
    pub fn code(self) -> i32 {
        match self {
            StepStage::PreValidation => 10,
            StepStage::PreOperation => 20,
            StepStage::PostOperation => 40,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(StepStage::PreValidation),
            20 => Some(StepStage::PreOperation),
            40 => Some(StepStage::PostOperation),
            _ => None,
        }
    }
}

impl fmt::Display for StepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStage::PreValidation => write!(f, "pre-validation"),
            StepStage::PreOperation => write!(f, "pre-operation"),
            StepStage::PostOperation => write!(f, "post-operation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StepMode {
    #[default]
    #[serde(alias = "sync", alias = "synchronous")]
    Synchronous,
    #[serde(alias = "async", alias = "asynchronous")]
    Asynchronous,
}

impl StepMode {
    pub fn code(self) -> i32 {
        match self {
            StepMode::Synchronous => 0,
            StepMode::Asynchronous => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    #[serde(alias = "pre", alias = "PreImage")]
    Pre,
    #[serde(alias = "post", alias = "PostImage")]
    Post,
    #[serde(alias = "both")]
    Both,
}

impl ImageType {
    pub fn code(self) -> i32 {
        match self {
            ImageType::Pre => 0,
            ImageType::Post => 1,
            ImageType::Both => 2,
        }
    }
}

/// Step a reflected type asks to be registered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDeclaration {
    /// Explicit step name; derived from type, message and entity when absent.
    #[serde(default)]
    pub name: Option<String>,
    pub message: String,
    #[serde(default, alias = "entity")]
    pub primary_entity: Option<String>,
    pub stage: StepStage,
    #[serde(default)]
    pub mode: StepMode,
    #[serde(default = "default_rank")]
    pub rank: i32,
    #[serde(default)]
    pub filtering_attributes: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageDeclaration>,
}

fn default_rank() -> i32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl StepDeclaration {
    pub fn new(message: impl Into<String>, stage: StepStage) -> Self {
        Self {
            name: None,
            message: message.into(),
            primary_entity: None,
            stage,
            mode: StepMode::Synchronous,
            rank: default_rank(),
            filtering_attributes: Vec::new(),
            enabled: true,
            description: None,
            images: Vec::new(),
        }
    }

    pub fn on_entity(mut self, entity: impl Into<String>) -> Self {
        self.primary_entity = Some(entity.into());
        self
    }

    pub fn with_mode(mut self, mode: StepMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_filtering_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filtering_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_image(mut self, image: ImageDeclaration) -> Self {
        self.images.push(image);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(&self.message, self.stage.code(), self.primary_entity.as_deref())
    }

    /// Name the step is registered under, e.g. `Acme.Plugins.PreCreate: Create of account`.
    pub fn display_name(&self, type_name: &str) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let entity = normalize_entity(self.primary_entity.as_deref())
            .unwrap_or_else(|| "any Entity".to_string());
        format!("{}: {} of {}", type_name, self.message, entity)
    }

    /// Filtering attributes as the store keeps them, or `None` for "all".
    pub fn filtering_attributes_value(&self) -> Option<String> {
        join_attributes(&self.filtering_attributes)
    }

    /// (statecode, statuscode) for the declared enabled flag.
    pub fn status_codes(&self) -> (i32, i32) {
        if self.enabled { (0, 1) } else { (1, 2) }
    }
}

/// Entity image a declared step asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDeclaration {
    pub name: String,
    pub image_type: ImageType,
    #[serde(default)]
    pub entity_alias: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub message_property_name: Option<String>,
}

impl ImageDeclaration {
    pub fn new(name: impl Into<String>, image_type: ImageType) -> Self {
        Self {
            name: name.into(),
            image_type,
            entity_alias: None,
            attributes: Vec::new(),
            message_property_name: None,
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn alias(&self) -> &str {
        self.entity_alias.as_deref().unwrap_or(&self.name)
    }

    pub fn message_property(&self) -> &str {
        self.message_property_name
            .as_deref()
            .unwrap_or(DEFAULT_MESSAGE_PROPERTY)
    }

    pub fn attributes_value(&self) -> Option<String> {
        join_attributes(&self.attributes)
    }
}

/// Natural identity of a step: message + stage + primary entity.
///
/// Message and entity compare case-insensitively; an absent entity (or the
/// store's `none` placeholder) means the step fires for all entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey {
    pub message: String,
    pub stage: i32,
    pub entity: Option<String>,
}

impl StepKey {
    pub fn new(message: &str, stage: i32, entity: Option<&str>) -> Self {
        Self {
            message: message.trim().to_lowercase(),
            stage,
            entity: normalize_entity(entity),
        }
    }
}

fn normalize_entity(entity: Option<&str>) -> Option<String> {
    entity
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty() && e != "none")
}

/// Order- and case-insensitive view of a comma-joined attribute list.
pub fn attribute_set(value: Option<&str>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect()
}

fn join_attributes(attributes: &[String]) -> Option<String> {
    let mut seen = BTreeSet::new();
    let joined: Vec<String> = attributes
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty() && seen.insert(a.clone()))
        .collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join(","))
    }
}
