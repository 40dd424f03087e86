//! Config store for loading and saving xrmsync.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{XrmConfig, parser};

pub const CONFIG_FILE_NAME: &str = "xrmsync.toml";

/// Resolve which config file applies: the project file wins over the global one.
pub fn resolve_config_path(global_dir: &Path, project_root: &Path) -> PathBuf {
    let project = project_root.join(CONFIG_FILE_NAME);
    if project.exists() {
        project
    } else {
        global_dir.join(CONFIG_FILE_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn discover() -> anyhow::Result<Self> {
        let global_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("xrmsync");
        let project_root = std::env::current_dir()?;

        Ok(Self::from_paths(global_dir, project_root))
    }

    pub fn from_paths(global_dir: PathBuf, project_root: PathBuf) -> Self {
        Self {
            config_path: resolve_config_path(&global_dir, &project_root),
        }
    }

    /// Use an explicit file, e.g. from `--config`.
    pub fn from_file(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> anyhow::Result<XrmConfig> {
        if !self.config_path.exists() {
            return Ok(XrmConfig::new());
        }
        parser::parse_xrm_toml(&self.config_path)
    }

    pub fn save(&self, config: &XrmConfig) -> anyhow::Result<()> {
        config.validate()?;
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
