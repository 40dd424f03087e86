//! xrmsync - Dataverse plugin registration
//!
//! Usage:
//!   xrmsync assembly list --env dev
//!   xrmsync assembly register ./bin/Acme.Plugins.dll --env dev --solution AcmeCore
//!   xrmsync assembly update Acme.Plugins --env dev
//!   xrmsync sync Acme.Plugins ./bin/Acme.Plugins.dll --env dev
//!   xrmsync types Acme.Plugins --env dev

mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xrmsync_core::client::WebApiClient;
use xrmsync_core::config::{ConfigStore, EnvironmentConfig, XrmConfig};
use xrmsync_core::id::RecordId;
use xrmsync_core::model::PluginAssembly;
use xrmsync_core::plugins::{
    AssemblyRegistration, PluginRegistrationManager, PluginService, SolutionAttach, SyncRequest,
};
use xrmsync_core::reflection::{AssemblyReflector, CommandReflector, ManifestReflector};
use xrmsync_core::solution::SolutionMembership;
use xrmsync_core::state::SelectionStore;

use crate::output::{AssemblyAction, TypeNode};

#[derive(Parser)]
#[command(name = "xrmsync")]
#[command(about = "Register Dataverse plugin assemblies and keep their steps in sync", long_about = None)]
struct Cli {
    /// Use this config file instead of ./xrmsync.toml or the global one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage plugin assemblies
    Assembly(AssemblyArgs),

    /// Reconcile plugin types, steps and images of a registered assembly
    Sync {
        /// Assembly name or id
        assembly: String,
        /// Path to the compiled assembly
        dll: PathBuf,
        /// Solution new components are added to
        #[arg(long)]
        solution: Option<String>,
        /// Only report missing components, even if the environment allows creating them
        #[arg(long)]
        no_create: bool,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the registered plugin types, steps and images of an assembly
    Types {
        /// Assembly name or id
        assembly: String,
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args)]
struct AssemblyArgs {
    #[command(subcommand)]
    command: AssemblySubcommand,
}

#[derive(Subcommand)]
enum AssemblySubcommand {
    /// List registered assemblies
    List {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Register a new assembly and its plugin types
    Register {
        /// Path to the compiled assembly
        dll: PathBuf,
        /// Assembly name (defaults to the file name without extension)
        #[arg(long)]
        name: Option<String>,
        /// Solution the assembly and its components are added to
        #[arg(long)]
        solution: Option<String>,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Upload new content for a registered assembly and sync its plugin types
    Update {
        /// Assembly name or id
        assembly: String,
        /// Path to the compiled assembly (defaults to the last one used)
        dll: Option<PathBuf>,
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Environment name from xrmsync.toml
    #[arg(short, long)]
    env: String,

    /// Access token (defaults to the environment's token variable)
    #[arg(long)]
    token: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub(crate) enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xrmsync=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let store = match &cli.config {
        Some(path) => ConfigStore::from_file(path),
        None => ConfigStore::discover()?,
    };
    let config = store.load()?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Assembly(args) => match args.command {
            AssemblySubcommand::List { target } => run_list(&config, &target).await,
            AssemblySubcommand::Register {
                dll,
                name,
                solution,
                target,
            } => run_register(&config, &target, &dll, name, solution, cancel).await,
            AssemblySubcommand::Update {
                assembly,
                dll,
                target,
            } => run_update(&config, &target, &assembly, dll, cancel).await,
        },
        Commands::Sync {
            assembly,
            dll,
            solution,
            no_create,
            target,
        } => run_sync(&config, &target, &assembly, &dll, solution, no_create, cancel).await,
        Commands::Types { assembly, target } => run_types(&config, &target, &assembly).await,
    }
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });
}

/// Everything a command needs to talk to one environment.
struct Session {
    environment: EnvironmentConfig,
    service: PluginService,
    manager: PluginRegistrationManager,
}

impl Session {
    fn open(config: &XrmConfig, target: &TargetArgs) -> Result<Self> {
        let environment = config.environment(&target.env)?.clone();
        let token = match &target.token {
            Some(token) => token.clone(),
            None => std::env::var(environment.token_env_var()).with_context(|| {
                format!(
                    "No access token for '{}': pass --token or set {}",
                    environment.name,
                    environment.token_env_var()
                )
            })?,
        };

        let url = environment.parsed_url()?;
        let client = Arc::new(
            WebApiClient::for_environment(&url, &token)
                .with_context(|| format!("Failed to create client for {}", environment.url))?,
        );
        let membership = SolutionMembership::new(client.clone())
            .with_default_solution(config.default_solution_name());
        let service = PluginService::new(client, membership);

        let reflector: Arc<dyn AssemblyReflector> = match &config.reflection {
            Some(reflection) => Arc::new(CommandReflector::new(
                reflection.command.clone(),
                reflection.args.clone(),
            )),
            None => Arc::new(ManifestReflector),
        };

        Ok(Self {
            environment,
            service,
            manager: PluginRegistrationManager::new(reflector),
        })
    }

    /// Find an assembly by id or by name.
    async fn resolve_assembly(&self, input: &str) -> Result<PluginAssembly> {
        let id = RecordId::new(input);
        self.service
            .list_assemblies()
            .await?
            .into_iter()
            .find(|a| a.id.as_str().eq_ignore_ascii_case(id.as_str()) || a.name == input)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Plugin assembly '{}' not found in {}",
                    input,
                    self.environment.name
                )
            })
    }
}

async fn encode_assembly(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read assembly: {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn remember_path(environment: &str, assembly_id: &RecordId, path: &Path) {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let result = SelectionStore::open_default()
        .and_then(|store| store.set_last_assembly_path(environment, assembly_id, &absolute));
    if let Err(e) = result {
        warn!(error = %e, "failed to remember assembly path");
    }
}

async fn run_list(config: &XrmConfig, target: &TargetArgs) -> Result<()> {
    let session = Session::open(config, target)?;
    let assemblies = session.service.list_assemblies().await?;
    output::print_assemblies(target.format, &assemblies)
}

async fn run_register(
    config: &XrmConfig,
    target: &TargetArgs,
    dll: &Path,
    name: Option<String>,
    solution: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let session = Session::open(config, target)?;
    let environment = &session.environment;
    if !environment.create_missing_components {
        anyhow::bail!(
            "Environment '{}' does not allow creating components (set create_missing_components = true)",
            environment.name
        );
    }

    let name = match name {
        Some(name) => name,
        None => dll
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Cannot derive assembly name from {}", dll.display()))?,
    };
    let solution = solution.or_else(|| config.preferred_solution().map(|s| s.name.clone()));

    let content = encode_assembly(dll).await?;
    let mut registration = AssemblyRegistration::new(&name, content);
    if let Some(solution) = &solution {
        registration = registration.with_solution(solution);
    }

    let registered = session.service.register_assembly(registration).await?;
    info!(assembly = %name, id = %registered.id, "assembly registered");
    if let SolutionAttach::Failed(err) = &registered.solution {
        eprintln!("⚠ Assembly was not added to the solution: {err}");
    }
    remember_path(&environment.name, &registered.id, dll);

    let request = SyncRequest::new(registered.id.clone(), dll)
        .with_solution(solution)
        .with_allow_create(true)
        .with_cancellation(cancel);
    let outcome = session.manager.sync_plugin_types(&session.service, &request).await;

    output::print_assembly_outcome(
        target.format,
        AssemblyAction::Registered,
        &name,
        &environment.name,
        request.allow_create,
        outcome,
    )
}

async fn run_update(
    config: &XrmConfig,
    target: &TargetArgs,
    assembly: &str,
    dll: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    let session = Session::open(config, target)?;
    let environment = &session.environment;
    let assembly = session.resolve_assembly(assembly).await?;

    let dll = match dll {
        Some(dll) => dll,
        None => SelectionStore::open_default()?
            .last_assembly_path(&environment.name, &assembly.id)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No assembly path given and none remembered for '{}'",
                    assembly.name
                )
            })?,
    };

    let content = encode_assembly(&dll).await?;
    session.service.update_assembly(&assembly.id, &content).await?;
    info!(assembly = %assembly.name, id = %assembly.id, "assembly content updated");
    remember_path(&environment.name, &assembly.id, &dll);

    let request = SyncRequest::new(assembly.id.clone(), &dll)
        .with_allow_create(environment.create_missing_components)
        .with_cancellation(cancel);
    let outcome = session.manager.sync_plugin_types(&session.service, &request).await;

    output::print_assembly_outcome(
        target.format,
        AssemblyAction::Updated,
        &assembly.name,
        &environment.name,
        request.allow_create,
        outcome,
    )
}

async fn run_sync(
    config: &XrmConfig,
    target: &TargetArgs,
    assembly: &str,
    dll: &Path,
    solution: Option<String>,
    no_create: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let session = Session::open(config, target)?;
    let assembly = session.resolve_assembly(assembly).await?;
    let solution = solution.or_else(|| config.preferred_solution().map(|s| s.name.clone()));

    let request = SyncRequest::new(assembly.id.clone(), dll)
        .with_solution(solution)
        .with_allow_create(session.environment.create_missing_components && !no_create)
        .with_cancellation(cancel);
    let outcome = session.manager.sync_plugin_types(&session.service, &request).await;

    output::print_assembly_outcome(
        target.format,
        AssemblyAction::Synced,
        &assembly.name,
        &session.environment.name,
        request.allow_create,
        outcome,
    )
}

async fn run_types(config: &XrmConfig, target: &TargetArgs, assembly: &str) -> Result<()> {
    let session = Session::open(config, target)?;
    let assembly = session.resolve_assembly(assembly).await?;

    let mut tree = Vec::new();
    for plugin_type in session.service.list_plugin_types(&assembly.id).await? {
        let mut steps = Vec::new();
        for step in session.service.list_steps(&plugin_type.id).await? {
            let images = session.service.list_images(&step.id).await?;
            steps.push((step, images));
        }
        tree.push(TypeNode { plugin_type, steps });
    }
    tree.sort_by(|a, b| a.plugin_type.full_name().cmp(b.plugin_type.full_name()));

    output::print_type_tree(target.format, &assembly, &tree)
}
