//! Error taxonomy for registration and sync operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::plugins::result::PluginSyncResult;

/// Result type for remote registration operations.
pub type XrmResult<T> = Result<T, XrmError>;

/// Why a remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCategory {
    /// The request never produced an HTTP response.
    Network,
    /// The environment refused the credentials (401/403).
    Auth,
    /// The store answered with a non-success status.
    Rejected,
}

impl fmt::Display for RemoteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCategory::Network => write!(f, "network"),
            RemoteCategory::Auth => write!(f, "auth"),
            RemoteCategory::Rejected => write!(f, "rejected"),
        }
    }
}

/// Errors raised by the registration client, the solution service and the
/// reflection providers.
#[derive(Debug, Error)]
pub enum XrmError {
    /// Network, authentication or store-rejected request.
    #[error("remote {category} error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Remote {
        category: RemoteCategory,
        status: Option<u16>,
        message: String,
    },

    /// A referenced solution, assembly, type, step, image or message is absent.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// The local assembly could not be read or yielded no plugin types.
    #[error("failed to reflect plugin types from {}: {message}", .path.display())]
    Reflection { path: PathBuf, message: String },

    /// The store answered with a body this client cannot interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The caller cancelled the sync between partitions.
    #[error("sync cancelled")]
    Cancelled,
}

impl XrmError {
    pub fn remote(
        category: RemoteCategory,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        XrmError::Remote {
            category,
            status,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        XrmError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn reflection(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        XrmError::Reflection {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that came back from the remote store.
    pub fn is_remote(&self) -> bool {
        matches!(self, XrmError::Remote { .. })
    }
}

/// Partition of the sync run in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Reading the local and remote snapshots.
    Snapshot,
    Create,
    Reconcile,
    Remove,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Snapshot => write!(f, "snapshot"),
            SyncPhase::Create => write!(f, "create"),
            SyncPhase::Reconcile => write!(f, "reconcile"),
            SyncPhase::Remove => write!(f, "remove"),
        }
    }
}

/// A sync run that stopped early.
///
/// Writes issued before the failure are committed by the store and are not
/// rolled back; `applied` lists them. Re-running the sync applies only the
/// outstanding difference.
#[derive(Debug, Error)]
#[error("plugin sync failed during {phase} ({} change(s) already applied): {source}", .applied.change_count())]
pub struct SyncError {
    pub phase: SyncPhase,
    pub applied: PluginSyncResult,
    #[source]
    pub source: XrmError,
}

impl SyncError {
    pub fn new(phase: SyncPhase, applied: PluginSyncResult, source: XrmError) -> Self {
        Self {
            phase,
            applied,
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, XrmError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_includes_status() {
        let err = XrmError::remote(RemoteCategory::Rejected, Some(400), "bad filter");
        assert_eq!(err.to_string(), "remote rejected error (HTTP 400): bad filter");

        let err = XrmError::remote(RemoteCategory::Network, None, "connection reset");
        assert_eq!(err.to_string(), "remote network error: connection reset");
    }

    #[test]
    fn test_sync_error_reports_partial_progress() {
        let mut applied = PluginSyncResult::default();
        applied.created.push(crate::plugins::result::SyncEntry::plugin_type("Acme.A"));
        let err = SyncError::new(
            SyncPhase::Remove,
            applied,
            XrmError::not_found("solution", "Acme"),
        );
        let message = err.to_string();
        assert!(message.contains("during remove"));
        assert!(message.contains("1 change(s) already applied"));
        assert!(message.contains("solution 'Acme' not found"));
    }
}
