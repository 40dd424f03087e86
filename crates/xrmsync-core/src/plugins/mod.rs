//! Plugin registration: the service facade, the diff logic and the
//! reconciliation engine built on top of them.

pub mod diff;
pub mod manager;
pub mod result;
pub mod service;

pub use manager::{PluginRegistrationManager, SyncRequest};
pub use result::{ComponentKind, PluginSyncResult, SyncEntry};
pub use service::{
    AssemblyRegistration, Created, IdSource, PluginService, RegisteredAssembly, SolutionAttach,
};
