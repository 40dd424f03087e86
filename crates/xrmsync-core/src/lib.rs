//! xrmsync Core Library
//!
//! Registers Dataverse plugin assemblies and keeps their plugin types, steps
//! and images in line with what the compiled assembly declares.

pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod model;
pub mod plugins;
pub mod reflection;
pub mod solution;
pub mod state;

/// Re-exports of commonly used types
pub mod prelude {
    // Errors
    pub use crate::error::{RemoteCategory, SyncError, SyncPhase, XrmError, XrmResult};

    // Identifiers and records
    pub use crate::id::RecordId;
    pub use crate::model::{
        ImageDeclaration, ImageType, PluginAssembly, PluginImage, PluginStep, PluginType,
        ReflectedType, SolutionComponentType, StepDeclaration, StepMode, StepStage,
    };

    // Remote store
    pub use crate::client::{RegistrationClient, SolutionStore, WebApiClient};
    pub use crate::solution::{MembershipOutcome, SolutionMembership};

    // Plugins
    pub use crate::plugins::{
        AssemblyRegistration, PluginRegistrationManager, PluginService, PluginSyncResult,
        SyncEntry, SyncRequest,
    };
    pub use crate::reflection::{AssemblyReflector, CommandReflector, ManifestReflector};

    // Configuration
    pub use crate::config::{ConfigStore, EnvironmentConfig, XrmConfig};
    pub use crate::state::SelectionStore;
}
