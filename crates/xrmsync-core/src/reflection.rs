//! Providers that enumerate the plugin types implemented by a local assembly.
//!
//! Reading .NET metadata is left to a build-time tool. Its output is a JSON
//! document, either a bare array of types or `{ "types": [...] }`:
//!
//! ```json
//! { "types": [
//!     { "typeName": "Acme.Plugins.PreCreate",
//!       "steps": [ { "message": "Create", "entity": "account", "stage": "PreOperation" } ] }
//! ] }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{XrmError, XrmResult};
use crate::model::ReflectedType;

/// Suffix of the sidecar manifest read by [`ManifestReflector`].
pub const MANIFEST_EXTENSION: &str = "plugins.json";

#[async_trait]
pub trait AssemblyReflector: Send + Sync {
    /// Returns the plugin types of the assembly at `assembly_path`.
    ///
    /// Fails with [`XrmError::Reflection`] when the file is not a readable
    /// assembly or contains no plugin types.
    async fn extract_plugin_types(&self, assembly_path: &Path) -> XrmResult<Vec<ReflectedType>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReflectionDocument {
    Wrapped { types: Vec<ReflectedType> },
    Bare(Vec<ReflectedType>),
}

/// Parse a reflection document and reject empty results.
pub fn parse_reflection_output(
    assembly_path: &Path,
    content: &str,
) -> XrmResult<Vec<ReflectedType>> {
    let document: ReflectionDocument = serde_json::from_str(content).map_err(|e| {
        XrmError::reflection(assembly_path, format!("invalid reflection output: {e}"))
    })?;
    let types = match document {
        ReflectionDocument::Wrapped { types } => types,
        ReflectionDocument::Bare(types) => types,
    };

    let types: Vec<ReflectedType> = types
        .into_iter()
        .filter(|t| !t.type_name.trim().is_empty())
        .collect();
    if types.is_empty() {
        return Err(XrmError::reflection(assembly_path, "no plugin types found"));
    }
    Ok(types)
}

async fn check_assembly(assembly_path: &Path) -> XrmResult<()> {
    let is_dll = assembly_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dll"));
    if !is_dll {
        return Err(XrmError::reflection(assembly_path, "not a .dll file"));
    }

    let metadata = tokio::fs::metadata(assembly_path)
        .await
        .map_err(|e| XrmError::reflection(assembly_path, format!("cannot read assembly: {e}")))?;
    if !metadata.is_file() {
        return Err(XrmError::reflection(assembly_path, "not a file"));
    }
    Ok(())
}

/// Reads `<assembly stem>.plugins.json` written next to the assembly.
#[derive(Debug, Clone, Default)]
pub struct ManifestReflector;

impl ManifestReflector {
    pub fn manifest_path(assembly_path: &Path) -> PathBuf {
        assembly_path.with_extension(MANIFEST_EXTENSION)
    }
}

#[async_trait]
impl AssemblyReflector for ManifestReflector {
    async fn extract_plugin_types(&self, assembly_path: &Path) -> XrmResult<Vec<ReflectedType>> {
        check_assembly(assembly_path).await?;
        let manifest = Self::manifest_path(assembly_path);
        debug!(manifest = %manifest.display(), "reading reflection manifest");
        let content = tokio::fs::read_to_string(&manifest).await.map_err(|e| {
            XrmError::reflection(
                assembly_path,
                format!("cannot read manifest {}: {e}", manifest.display()),
            )
        })?;
        parse_reflection_output(assembly_path, &content)
    }
}

/// Runs an external extractor as `program args... <assembly path>` and reads
/// the reflection document from its stdout.
#[derive(Debug, Clone)]
pub struct CommandReflector {
    program: String,
    args: Vec<String>,
}

impl CommandReflector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl AssemblyReflector for CommandReflector {
    async fn extract_plugin_types(&self, assembly_path: &Path) -> XrmResult<Vec<ReflectedType>> {
        check_assembly(assembly_path).await?;
        debug!(
            program = %self.program,
            assembly = %assembly_path.display(),
            "running reflection command"
        );

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(assembly_path)
            .output()
            .await
            .map_err(|e| {
                XrmError::reflection(
                    assembly_path,
                    format!("failed to run '{}': {e}", self.program),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(XrmError::reflection(
                assembly_path,
                format!("'{}' exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_reflection_output(assembly_path, &stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_parse_bare_and_wrapped_documents() {
        let path = Path::new("Acme.dll");
        let bare = parse_reflection_output(path, r#"[{"typeName": "Acme.A"}]"#).unwrap();
        assert_eq!(bare[0].type_name, "Acme.A");
        assert!(bare[0].steps.is_none());

        let wrapped = parse_reflection_output(
            path,
            r#"{"types": [{"typeName": "Acme.B", "steps": []}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped[0].type_name, "Acme.B");
        assert_eq!(wrapped[0].steps.as_deref().map(<[_]>::len), Some(0));
    }

    #[test]
    fn test_empty_document_is_reflection_error() {
        let err = parse_reflection_output(Path::new("Acme.dll"), r#"{"types": []}"#).unwrap_err();
        assert!(matches!(err, XrmError::Reflection { .. }));
        assert!(err.to_string().contains("no plugin types found"));
    }

    #[tokio::test]
    async fn test_manifest_reflector_reads_sidecar() {
        let temp = TempDir::new().unwrap();
        let dll = temp.path().join("Acme.Plugins.dll");
        std::fs::write(&dll, b"MZ").unwrap();
        std::fs::write(
            temp.path().join("Acme.Plugins.plugins.json"),
            r#"{"types": [{"typeName": "Acme.Plugins.PreCreate"}]}"#,
        )
        .unwrap();

        let types = ManifestReflector.extract_plugin_types(&dll).await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].type_name, "Acme.Plugins.PreCreate");
    }

    #[tokio::test]
    async fn test_non_dll_is_rejected() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("Acme.Plugins.txt");
        std::fs::write(&file, b"text").unwrap();

        let err = ManifestReflector.extract_plugin_types(&file).await.unwrap_err();
        assert!(err.to_string().contains("not a .dll file"));
    }

    #[tokio::test]
    async fn test_missing_assembly_is_rejected() {
        let temp = TempDir::new().unwrap();
        let err = ManifestReflector
            .extract_plugin_types(&temp.path().join("Missing.dll"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read assembly"));
    }
}
