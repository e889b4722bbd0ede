//! keelctl
//!
//! Operator CLI for the container reconciliation engine. Reads the platform
//! records as YAML files and runs one engine operation against the current
//! kube context.
//!
//! ```bash
//! keelctl reconcile --action create --container web.yaml --environment env.yaml
//! keelctl reconcile --action update --container web.yaml --previous web.old.yaml --environment env.yaml
//! keelctl pipeline trigger --container web.yaml --environment env.yaml --git-provider gh.yaml --registry reg.yaml
//! keelctl proxy enable --service db --namespace env-abc123 --public-port 30432 --target-port 5432
//! keelctl environment delete --environment env.yaml --container web.yaml --container db.yaml
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use container_reconciler::{Action, ChangeSet, ClusterApi, Coordinator, EngineConfig, KubeCluster, ResourceCategory};
use git_provider_client::HttpProviderFactory;
use platform_model::{ContainerSpec, Environment, GitProvider, Registry};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keelctl", about = "Keel container reconciliation engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, update or delete one container
    Reconcile {
        #[arg(long, value_enum)]
        action: ActionArg,
        /// Container specification (YAML)
        #[arg(long)]
        container: PathBuf,
        /// Stored specification, required for updates
        #[arg(long)]
        previous: Option<PathBuf>,
        #[arg(long)]
        environment: PathBuf,
        #[arg(long)]
        git_provider: Option<PathBuf>,
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Categories to reconcile on update, detected from --previous when omitted
        #[arg(long, value_delimiter = ',')]
        changes: Vec<ResourceCategory>,
    },
    /// Drive Tekton pipeline runs
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },
    /// Expose or withdraw public TCP ports
    Proxy {
        #[command(subcommand)]
        command: ProxyCommand,
    },
    /// Create or tear down an environment namespace
    Environment {
        #[command(subcommand)]
        command: EnvironmentCommand,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Create,
    Update,
    Delete,
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Start a run for the container's branch head
    Trigger {
        #[arg(long)]
        container: PathBuf,
        #[arg(long)]
        environment: PathBuf,
        #[arg(long)]
        git_provider: PathBuf,
        #[arg(long)]
        registry: PathBuf,
    },
    /// Start a copy of an existing run
    Rerun { run: String },
    /// Cancel a running run
    Cancel { run: String },
}

#[derive(Subcommand)]
enum ProxyCommand {
    Enable {
        #[arg(long)]
        service: String,
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        public_port: u16,
        #[arg(long)]
        target_port: u16,
    },
    Disable {
        /// Public ports to withdraw
        #[arg(long = "public-port", required = true)]
        public_ports: Vec<u16>,
    },
}

#[derive(Subcommand)]
enum EnvironmentCommand {
    Create {
        #[arg(long)]
        environment: PathBuf,
    },
    /// Delete every listed container, then the namespace
    Delete {
        #[arg(long)]
        environment: PathBuf,
        #[arg(long = "container")]
        containers: Vec<PathBuf>,
        #[arg(long = "git-provider")]
        git_providers: Vec<PathBuf>,
    },
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn load_opt<T: DeserializeOwned>(path: Option<&PathBuf>) -> Result<Option<T>> {
    path.map(|p| load(p)).transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // kube and reqwest both pull in rustls; pick the provider before either connects
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    let cli = Cli::parse();

    // keelctl exits when the command returns; never leave proxy edits behind
    let config = EngineConfig::from_env()?.one_shot();
    config.log();
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::try_default().await?);
    let coordinator = Coordinator::new(cluster, Arc::new(HttpProviderFactory), config);

    match cli.command {
        Commands::Reconcile {
            action,
            container,
            previous,
            environment,
            git_provider,
            registry,
            changes,
        } => {
            let mut container: ContainerSpec = load(&container)?;
            let environment: Environment = load(&environment)?;
            let git_provider: Option<GitProvider> = load_opt(git_provider.as_ref())?;
            let registry: Option<Registry> = load_opt(registry.as_ref())?;
            let previous: Option<ContainerSpec> = load_opt(previous.as_ref())?;

            let (action, changes) = match action {
                ActionArg::Create => (Action::Create, ChangeSet::new()),
                ActionArg::Delete => (Action::Delete, ChangeSet::new()),
                ActionArg::Update => {
                    let Some(previous) = previous else {
                        bail!("--previous is required for updates");
                    };
                    let changes = if changes.is_empty() {
                        ChangeSet::between(Some(&previous), &container)
                    } else {
                        changes.into_iter().collect()
                    };
                    (
                        Action::Update {
                            previous: Box::new(previous),
                        },
                        changes,
                    )
                }
            };

            let outcome = coordinator
                .reconcile(
                    &action,
                    &mut container,
                    &environment,
                    git_provider.as_ref(),
                    registry.as_ref(),
                    &changes,
                )
                .await?;
            info!("Touched: {}", outcome.touched);
            print!("{}", serde_yaml::to_string(&container)?);
        }
        Commands::Pipeline { command } => match command {
            PipelineCommand::Trigger {
                container,
                environment,
                git_provider,
                registry,
            } => {
                let container: ContainerSpec = load(&container)?;
                let environment: Environment = load(&environment)?;
                let git_provider: GitProvider = load(&git_provider)?;
                let registry: Registry = load(&registry)?;
                let run = coordinator
                    .pipelines()
                    .trigger(&container, &environment, &git_provider, &registry)
                    .await?;
                println!("{}", run);
            }
            PipelineCommand::Rerun { run } => {
                println!("{}", coordinator.pipelines().rerun(&run).await?);
            }
            PipelineCommand::Cancel { run } => coordinator.pipelines().cancel(&run).await?,
        },
        Commands::Proxy { command } => match command {
            ProxyCommand::Enable {
                service,
                namespace,
                public_port,
                target_port,
            } => {
                coordinator
                    .enable_proxy(&service, &namespace, public_port, target_port)
                    .await?
            }
            ProxyCommand::Disable { public_ports } => coordinator.disable_proxy(&public_ports).await?,
        },
        Commands::Environment { command } => match command {
            EnvironmentCommand::Create { environment } => {
                let environment: Environment = load(&environment)?;
                coordinator.create_environment(&environment).await?;
            }
            EnvironmentCommand::Delete {
                environment,
                containers,
                git_providers,
            } => {
                let environment: Environment = load(&environment)?;
                let mut members = containers.iter().map(|p| load(p)).collect::<Result<Vec<ContainerSpec>>>()?;
                let git_providers = git_providers
                    .iter()
                    .map(|p| load(p))
                    .collect::<Result<Vec<GitProvider>>>()?;
                coordinator
                    .delete_environment(&environment, &mut members, &git_providers)
                    .await?;
            }
        },
    }

    Ok(())
}
