//! Platform Helper CLI
//!
//! ## Usage
//!
//! ```bash
//! # Move ALB traffic between copilot and platform target groups
//! platform-helper environment update-alb-rules --environment dev
//!
//! # Register a new task definition revision and follow the rollout
//! platform-helper internal service deploy --name web --environment dev --image-tag abc123
//! ```
//!
//! AWS credentials and region come from the usual environment/profile chain;
//! `--profile` and `--region` override them.

use clap::{Parser, Subcommand};
use platform_helper::application::ApplicationLoader;
use platform_helper::config::PLATFORM_CONFIG_FILE;
use platform_helper::providers::ecs::EcsProvider;
use platform_helper::providers::load_balancers::LoadBalancerProvider;
use platform_helper::providers::logs::LogsProvider;
use platform_helper::providers::s3::ContainerDefinitionStore;
use platform_helper::{AlbRuleUpdater, AwsClients, DeploymentManager, PlatformConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "platform-helper")]
#[command(about = "Deployment platform helper for copilot to terraform migrations", long_about = None)]
struct Cli {
    /// Path to platform-config.yml
    #[arg(long, global = true, default_value = PLATFORM_CONFIG_FILE)]
    config: PathBuf,

    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// AWS named profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Environment-level operations
    Environment {
        #[command(subcommand)]
        action: EnvironmentCommands,
    },

    /// Operations invoked by the platform pipelines
    Internal {
        #[command(subcommand)]
        action: InternalCommands,
    },
}

#[derive(Subcommand)]
enum EnvironmentCommands {
    /// Reconcile HTTPS listener rules with the environment's deployment mode
    UpdateAlbRules {
        #[arg(long)]
        environment: String,
    },
}

#[derive(Subcommand)]
enum InternalCommands {
    /// Service operations
    Service {
        #[command(subcommand)]
        action: ServiceCommands,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Deploy a service image and wait for the rollout to finish
    Deploy {
        /// Service name
        #[arg(long)]
        name: String,

        #[arg(long)]
        environment: String,

        /// Image tag; falls back to $IMAGE_TAG
        #[arg(short = 'i', long)]
        image_tag: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platform_helper=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError: {:#}\x1b[0m", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PlatformConfig::load(&cli.config)?;
    let clients = AwsClients::load(cli.region, cli.profile).await;
    debug!(application = %config.application, "Loaded configuration");

    match cli.command {
        Commands::Environment {
            action: EnvironmentCommands::UpdateAlbRules { environment },
        } => {
            let updater = AlbRuleUpdater::new(LoadBalancerProvider::new(clients.elbv2), config);
            updater.update_alb_rules(&environment).await?;
        }
        Commands::Internal {
            action:
                InternalCommands::Service {
                    action:
                        ServiceCommands::Deploy {
                            name,
                            environment,
                            image_tag,
                        },
                },
        } => {
            let manager = DeploymentManager::new(
                EcsProvider::new(clients.ecs),
                LogsProvider::new(clients.logs),
                ContainerDefinitionStore::new(clients.s3),
                ApplicationLoader::new(clients.ssm),
            )
            .with_base_dir(base_dir(&cli.config));

            manager
                .deploy(&name, &environment, &config.application, image_tag.as_deref())
                .await?;
        }
    }

    Ok(())
}

/// Generated `terraform/` lives beside the config file
fn base_dir(config: &Path) -> PathBuf {
    config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
