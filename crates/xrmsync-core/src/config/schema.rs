//! Configuration schema for xrmsync.toml

use std::collections::HashSet;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::solution::DEFAULT_SOLUTION_NAME;

/// Environment variable holding the access token when an environment names none.
pub const DEFAULT_TOKEN_ENV: &str = "XRMSYNC_TOKEN";

/// Root configuration structure for xrmsync.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XrmConfig {
    /// Unique name of the environment's built-in default solution; components
    /// targeting it are never explicitly attached. Defaults to `Default`.
    #[serde(default)]
    pub default_solution: Option<String>,

    /// Target environments
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,

    /// Solutions new components can be attached to
    #[serde(default)]
    pub solutions: Vec<SolutionConfig>,

    /// External reflection tool; the sidecar manifest is read when absent
    #[serde(default)]
    pub reflection: Option<ReflectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,

    /// Environment URL, e.g. https://contoso.crm.dynamics.com
    pub url: String,

    /// Resource/audience tokens are requested for; defaults to `url`
    #[serde(default)]
    pub resource: Option<String>,

    /// When false, syncs only report components they would have created
    #[serde(default)]
    pub create_missing_components: bool,

    /// Name of the environment variable holding the access token
    #[serde(default)]
    pub token_env: Option<String>,
}

impl EnvironmentConfig {
    pub fn parsed_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("Invalid URL for environment '{}': {}", self.name, self.url))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            anyhow::bail!(
                "Environment '{}' URL must use http or https: {}",
                self.name,
                self.url
            );
        }
        Ok(url)
    }

    pub fn token_env_var(&self) -> &str {
        self.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionConfig {
    /// Solution unique name
    pub name: String,

    /// Publisher prefix, e.g. acme_
    #[serde(default)]
    pub prefix: Option<String>,

    /// Used when no solution is given on the command line
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl XrmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        for env in &self.environments {
            if env.name.trim().is_empty() {
                anyhow::bail!("Environment name must not be empty");
            }
            if !names.insert(env.name.to_lowercase()) {
                anyhow::bail!("Duplicate environment: '{}'", env.name);
            }
            env.parsed_url()?;
        }

        let mut solutions = HashSet::new();
        for solution in &self.solutions {
            if solution.name.trim().is_empty() {
                anyhow::bail!("Solution name must not be empty");
            }
            if !solutions.insert(solution.name.to_lowercase()) {
                anyhow::bail!("Duplicate solution: '{}'", solution.name);
            }
        }
        if self.solutions.iter().filter(|s| s.default).count() > 1 {
            anyhow::bail!("At most one solution can be marked default");
        }

        if let Some(reflection) = &self.reflection {
            if reflection.command.trim().is_empty() {
                anyhow::bail!("Reflection command must not be empty");
            }
        }

        Ok(())
    }

    /// Look up an environment by name (case-insensitive)
    pub fn environment(&self, name: &str) -> anyhow::Result<&EnvironmentConfig> {
        self.environments
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                let known: Vec<&str> = self.environments.iter().map(|e| e.name.as_str()).collect();
                anyhow::anyhow!(
                    "Unknown environment '{}'. Configured: {}",
                    name,
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                )
            })
    }

    pub fn default_solution_name(&self) -> &str {
        self.default_solution
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SOLUTION_NAME)
    }

    /// Solution marked `default = true`, or the only one configured
    pub fn preferred_solution(&self) -> Option<&SolutionConfig> {
        self.solutions.iter().find(|s| s.default).or(match self.solutions.as_slice() {
            [only] => Some(only),
            _ => None,
        })
    }
}
