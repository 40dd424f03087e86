//! Configuration loaded from xrmsync.toml
//!
//! A project-level `./xrmsync.toml` wins over the global file in the
//! platform config directory. A missing file yields an empty configuration.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_xrm_toml, parse_xrm_toml_str, to_toml};
pub use schema::{
    DEFAULT_TOKEN_ENV, EnvironmentConfig, ReflectionConfig, SolutionConfig, XrmConfig,
};
pub use store::{CONFIG_FILE_NAME, ConfigStore, resolve_config_path};
