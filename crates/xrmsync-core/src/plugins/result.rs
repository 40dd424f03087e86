//! Outcome of a plugin sync run.

use std::fmt;

use serde::Serialize;

/// Kind of registration component a sync entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    PluginType,
    Step,
    Image,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::PluginType => write!(f, "plugin type"),
            ComponentKind::Step => write!(f, "step"),
            ComponentKind::Image => write!(f, "image"),
        }
    }
}

/// One component touched (or skipped) by a sync, named for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEntry {
    pub kind: ComponentKind,
    pub name: String,
}

impl SyncEntry {
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn plugin_type(name: impl Into<String>) -> Self {
        Self::new(ComponentKind::PluginType, name)
    }

    pub fn step(name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Step, name)
    }

    pub fn image(name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Image, name)
    }
}

impl fmt::Display for SyncEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginSyncResult {
    pub created: Vec<SyncEntry>,
    pub updated: Vec<SyncEntry>,
    pub removed: Vec<SyncEntry>,
    /// Components that would have been created had the environment allowed it.
    pub skipped_creation: Vec<SyncEntry>,
}

impl PluginSyncResult {
    /// Number of writes applied to the store.
    pub fn change_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.removed.len()
    }

    pub fn is_unchanged(&self) -> bool {
        self.change_count() == 0
    }

    /// Names of the entries of `kind` in `entries`, for assertions and display.
    pub fn names(entries: &[SyncEntry], kind: ComponentKind) -> Vec<&str> {
        entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// One-line summary, e.g. `Plugins: 2 created, 3 skipped (creation disabled).`
    pub fn summary(&self, allow_create: bool) -> String {
        let mut parts = Vec::new();
        if !self.created.is_empty() {
            parts.push(format!("{} created", self.created.len()));
        }
        if !self.updated.is_empty() {
            parts.push(format!("{} updated", self.updated.len()));
        }
        if !self.removed.is_empty() {
            parts.push(format!("{} removed", self.removed.len()));
        }

        let skipped = self.skipped_creation.len();
        if parts.is_empty() {
            return match skipped {
                0 => "Plugins: no changes detected.".to_string(),
                n if !allow_create => {
                    format!("Plugins: creation skipped by environment settings ({n} skipped).")
                }
                n => format!("Plugins: {n} skipped (creation disabled)."),
            };
        }

        if skipped > 0 {
            parts.push(format!("{skipped} skipped (creation disabled)"));
        }
        format!("Plugins: {}.", parts.join(", "))
    }
}
