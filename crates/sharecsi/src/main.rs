mod config;

use clap::{Args, Parser, Subcommand, ValueEnum};
use config::DriverConfig;
use sharecsi_cloud::{InMemoryProvider, Retrier};
use sharecsi_controller::{ControllerContext, ControllerService};
use sharecsi_node::{
    CommandMounter, KubeSecretStore, NodeService, ProcMountInspector, SecretStore,
    StaticSecretStore,
};
use sharecsi_server::{AppState, Config as ServerConfig, CsiServer, IdentityService};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sharecsi", about = "File share CSI plugin")]
struct Cli {
    /// YAML driver configuration
    #[arg(long, env = "SHARECSI_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "SHARECSI_LOG_FORMAT", global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller service (share provisioning)
    Controller {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run the node service (mounting on this host)
    Node {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Run controller and node services in one process
    All {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        node: NodeArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Address to listen on
    #[arg(long, env = "SHARECSI_LISTEN")]
    listen: Option<String>,
    /// Driver name reported by GetPluginInfo
    #[arg(long, env = "SHARECSI_DRIVER_NAME")]
    driver_name: Option<String>,
}

#[derive(Args)]
struct NodeArgs {
    /// Node id reported by NodeGetInfo
    #[arg(long, env = "SHARECSI_NODE_ID")]
    node_id: Option<String>,
    /// Directory the orchestrator places staging paths under
    #[arg(long, env = "SHARECSI_STAGING_ROOT")]
    staging_root: Option<PathBuf>,
    /// Orchestrator API URL for secret lookups
    #[arg(long, env = "SHARECSI_API_URL")]
    api_url: Option<String>,
    /// File holding the bearer token for the orchestrator API
    #[arg(long, env = "SHARECSI_API_TOKEN_FILE")]
    api_token_file: Option<PathBuf>,
}

#[derive(Clone, Copy)]
struct Roles {
    controller: bool,
    node: bool,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };

    let (roles, common, node_args) = match cli.command {
        Commands::Controller { common } => (
            Roles {
                controller: true,
                node: false,
            },
            common,
            None,
        ),
        Commands::Node { common, node } => (
            Roles {
                controller: false,
                node: true,
            },
            common,
            Some(node),
        ),
        Commands::All { common, node } => (
            Roles {
                controller: true,
                node: true,
            },
            common,
            Some(node),
        ),
    };

    apply_common_args(&mut config, common);
    let token_file = match node_args {
        Some(args) => apply_node_args(&mut config, args),
        None => None,
    };

    run(config, roles, token_file.as_deref()).await
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Command-line values win over the config file
fn apply_common_args(config: &mut DriverConfig, args: CommonArgs) {
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(driver_name) = args.driver_name {
        config.driver_name = driver_name;
    }
    config.controller.driver_name = config.driver_name.clone();
}

fn apply_node_args(config: &mut DriverConfig, args: NodeArgs) -> Option<PathBuf> {
    if let Some(node_id) = args.node_id {
        config.node.node_id = node_id;
    }
    if let Some(staging_root) = args.staging_root {
        config.node.staging_root = staging_root;
    }
    if let Some(api_url) = args.api_url {
        config.node.api_url = Some(api_url);
    }
    args.api_token_file
}

async fn run(config: DriverConfig, roles: Roles, token_file: Option<&Path>) -> miette::Result<()> {
    let listen_addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| miette::miette!("Invalid listen address '{}': {}", config.listen, e))?;

    let identity = Arc::new(IdentityService::new(&config.driver_name, roles.controller));
    let mut state = AppState::new(identity.clone(), config.request_timeout());

    if roles.controller {
        state = state.with_controller(Arc::new(create_controller(&config)));
    }
    if roles.node {
        let node = create_node(&config, token_file)?;
        node.recover()
            .await
            .map_err(|e| miette::miette!("Failed to scan existing mounts: {}", e))?;
        state = state.with_node(Arc::new(node));
    }

    identity.set_ready(true);
    info!(
        driver = %config.driver_name,
        controller = roles.controller,
        node = roles.node,
        "Plugin ready"
    );

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down gracefully..."),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
        signal_token.cancel();
    });

    let server = CsiServer::new(ServerConfig { listen_addr }, Arc::new(state));
    server
        .run(token)
        .await
        .map_err(|e| miette::miette!("CSI server error: {}", e))?;

    info!("Shutdown complete");
    Ok(())
}

fn create_controller(config: &DriverConfig) -> ControllerService {
    warn!("Using the in-memory storage provider; shares do not outlive this process");
    let ctx = ControllerContext::new(
        config.controller.clone(),
        Retrier::new(config.retry.clone()),
    );
    ControllerService::new(Arc::new(InMemoryProvider::new()), ctx)
}

fn create_node(config: &DriverConfig, token_file: Option<&Path>) -> miette::Result<NodeService> {
    if config.node.node_id.is_empty() {
        return Err(miette::miette!(
            "A node id is required (--node-id or node.node_id)"
        ));
    }

    let secrets: Arc<dyn SecretStore> = match &config.node.api_url {
        Some(url) => {
            let mut store = KubeSecretStore::new(url);
            if let Some(path) = token_file {
                let token = std::fs::read_to_string(path).map_err(|e| {
                    miette::miette!("Failed to read API token '{}': {}", path.display(), e)
                })?;
                store = store.with_token(token.trim());
            }
            Arc::new(store)
        }
        None => {
            warn!("No orchestrator API configured; only request secrets can be used");
            Arc::new(StaticSecretStore::new())
        }
    };

    Ok(NodeService::new(
        config.node.clone(),
        Arc::new(ProcMountInspector::new()),
        Arc::new(CommandMounter::new()),
        secrets,
        Retrier::new(config.retry.clone()),
    ))
}
