//! Table and JSON rendering of command results.

use anyhow::Result;

use xrmsync_core::error::SyncError;
use xrmsync_core::model::{PluginAssembly, PluginImage, PluginStep, PluginType, StepStage};
use xrmsync_core::plugins::{PluginSyncResult, SyncEntry};

use crate::OutputFormat;

#[derive(Debug, Clone, Copy)]
pub enum AssemblyAction {
    Registered,
    Updated,
    Synced,
}

impl AssemblyAction {
    fn verb(self) -> &'static str {
        match self {
            AssemblyAction::Registered => "registered",
            AssemblyAction::Updated => "updated",
            AssemblyAction::Synced => "synced",
        }
    }
}

pub struct TypeNode {
    pub plugin_type: PluginType,
    pub steps: Vec<(PluginStep, Vec<PluginImage>)>,
}

pub fn print_assemblies(format: OutputFormat, assemblies: &[PluginAssembly]) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if assemblies.is_empty() {
                println!("No plugin assemblies registered.");
                println!("Register one with: xrmsync assembly register <DLL> --env <ENV>");
                return Ok(());
            }

            println!("{:<40} {:<14} {:<38}", "Name", "Version", "Id");
            println!("{}", "-".repeat(92));
            for assembly in assemblies {
                println!(
                    "{:<40} {:<14} {:<38}",
                    truncate(&assembly.name, 40),
                    assembly.version.as_deref().unwrap_or("-"),
                    assembly.id
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(assemblies)?);
        }
    }
    Ok(())
}

/// Print the outcome of an assembly operation and its plugin sync.
///
/// The assembly operation itself already succeeded; a failed sync is reported
/// with what it applied and turns into a non-zero exit.
pub fn print_assembly_outcome(
    format: OutputFormat,
    action: AssemblyAction,
    assembly: &str,
    environment: &str,
    allow_create: bool,
    outcome: Result<PluginSyncResult, SyncError>,
) -> Result<()> {
    let (result, error) = match outcome {
        Ok(result) => (result, None),
        Err(err) => (err.applied.clone(), Some(err)),
    };

    match format {
        OutputFormat::Table => {
            match &error {
                None => println!(
                    "✓ Plugin assembly {} has been {} in {}. {}",
                    assembly,
                    action.verb(),
                    environment,
                    result.summary(allow_create)
                ),
                Some(err) => {
                    if !matches!(action, AssemblyAction::Synced) {
                        println!(
                            "✓ Plugin assembly {} has been {} in {}.",
                            assembly,
                            action.verb(),
                            environment
                        );
                    }
                    println!("✗ Plugin sync stopped during {}: {}", err.phase, err.source);
                    if !result.is_unchanged() {
                        println!("  Applied before the failure: {}", result.summary(allow_create));
                    }
                }
            }
            print_entries("+", &result.created);
            print_entries("~", &result.updated);
            print_entries("-", &result.removed);
            print_entries("•", &result.skipped_creation);
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "assembly": assembly,
                "environment": environment,
                "action": action.verb(),
                "summary": result.summary(allow_create),
                "result": result,
                "error": error.as_ref().map(|e| serde_json::json!({
                    "phase": e.phase.to_string(),
                    "message": e.source.to_string(),
                    "cancelled": e.is_cancelled(),
                })),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_entries(marker: &str, entries: &[SyncEntry]) {
    for entry in entries {
        println!("  {} {}", marker, entry);
    }
}

pub fn print_type_tree(
    format: OutputFormat,
    assembly: &PluginAssembly,
    tree: &[TypeNode],
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{} ({})", assembly.name, assembly.id);
            if tree.is_empty() {
                println!("  No plugin types registered.");
            }
            for node in tree {
                println!("  {}", node.plugin_type.full_name());
                for (step, images) in &node.steps {
                    println!("    {} [{}]{}", step.name, step_details(step), disabled_marker(step));
                    for image in images {
                        println!(
                            "      {} ({})",
                            image.name,
                            image.attributes.as_deref().unwrap_or("all attributes")
                        );
                    }
                }
            }
        }
        OutputFormat::Json => {
            let types: Vec<_> = tree
                .iter()
                .map(|node| {
                    serde_json::json!({
                        "type": node.plugin_type,
                        "steps": node.steps.iter().map(|(step, images)| serde_json::json!({
                            "step": step,
                            "images": images,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "assembly": assembly,
                "types": types,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn step_details(step: &PluginStep) -> String {
    let stage = step
        .stage
        .and_then(StepStage::from_code)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown stage".to_string());
    let mode = match step.mode {
        Some(1) => "async",
        _ => "sync",
    };
    format!("{}, {}, rank {}", stage, mode, step.rank.unwrap_or(1))
}

fn disabled_marker(step: &PluginStep) -> &'static str {
    if step.is_enabled() { "" } else { " (disabled)" }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
