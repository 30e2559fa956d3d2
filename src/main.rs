//! RoachPilot - CockroachDB Cluster Bootstrap Coordinator
//!
//! Drives the one-time bootstrap of a CockroachDB cluster: starts the
//! daemon, waits for peers and leadership, initializes exactly once, and
//! publishes the resulting cluster identity to every peer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roachpilot::cluster::{Coordinator, Event, LeadershipOracle, Notification, PeerTracker};
use roachpilot::config::RoachPilotConfig;
use roachpilot::daemon::CockroachControl;
use roachpilot::error::Result;
use roachpilot::store::{BootstrapState, FileStore, SharedStore};

/// Interval between event-queue scheduling passes
const PASS_INTERVAL: Duration = Duration::from_secs(2);

/// RoachPilot - CockroachDB Cluster Bootstrap Coordinator
#[derive(Parser)]
#[command(name = "roachpilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "roachpilot.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the cockroach binary and render its service file
    Install,

    /// Start the daemon and run the bootstrap coordinator
    Start,

    /// Show local and shared bootstrap state
    Status,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "roachpilot.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "db-0")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,
}

/// Leadership oracle backed by a `leader` file in the shared store
/// directory, maintained by the surrounding orchestration runtime.
struct FileLeadershipOracle {
    path: PathBuf,
    node_id: String,
}

#[async_trait]
impl LeadershipOracle for FileLeadershipOracle {
    async fn is_leader(&self) -> Result<bool> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content.trim() == self.node_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Install => run_install(&cli.config).await,
        Commands::Start => run_start(&cli.config).await,
        Commands::Status => run_status(&cli.config).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(&cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: &Path) -> Result<RoachPilotConfig> {
    match RoachPilotConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            Err(e)
        }
    }
}

/// Build the coordinator and its collaborators from the configuration
fn build_coordinator(
    config: &RoachPilotConfig,
) -> Result<(
    Coordinator,
    Arc<dyn SharedStore>,
    tokio::sync::mpsc::UnboundedReceiver<Notification>,
)> {
    let local = Arc::new(BootstrapState::new(
        config.state_dir(),
        config.node.id.clone(),
    )?);

    let store = FileStore::open(config.node.store_dir.clone(), config.node.id.clone())?;
    store.join()?;
    let store: Arc<dyn SharedStore> = Arc::new(store);

    let oracle = Arc::new(FileLeadershipOracle {
        path: config.node.store_dir.join("leader"),
        node_id: config.node.id.clone(),
    });

    let control = Arc::new(CockroachControl::new(&config.cockroach));

    let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel();
    let coordinator = Coordinator::new(
        config,
        local,
        Arc::clone(&store),
        oracle,
        control,
        notify_tx,
    );

    Ok((coordinator, store, notify_rx))
}

/// Install the cockroach binary and render its service file
async fn run_install(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let (mut coordinator, _store, _notify_rx) = build_coordinator(&config)?;

    coordinator.dispatch(Event::InstallRequested).await?;
    tracing::info!("Install complete");
    Ok(())
}

/// Start the daemon and run the bootstrap coordinator
async fn run_start(config_path: &Path) -> Result<()> {
    tracing::info!("Starting RoachPilot node...");

    let config = load_config(config_path)?;
    tracing::info!(
        "Loaded configuration for node {} ({} mode)",
        config.node.id,
        config.deployment_mode()
    );

    let (mut coordinator, store, mut notify_rx) = build_coordinator(&config)?;

    let tracker = PeerTracker::new(config.node.id.clone(), Arc::clone(&store));
    tracker.advertise(&config.node.advertise_address).await?;

    tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            match notification {
                Notification::DaemonStarted => {
                    tracing::info!("Daemon is up");
                }
                Notification::ClusterInitialized(cluster_id) => {
                    tracing::info!("Cluster initialized with id {}", cluster_id);
                }
            }
        }
    });

    coordinator.enqueue(Event::StartRequested);

    let mut known_peers = tracker.peer_addresses().await?;
    let mut ticker = tokio::time::interval(PASS_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let peers = tracker.peer_addresses().await?;
                if peers != known_peers {
                    tracing::info!("Peer set changed: {:?}", peers);
                    known_peers = peers;
                    coordinator.enqueue(Event::MembershipChanged);
                }

                if let Err(e) = coordinator.run_pending().await {
                    tracing::error!("Bootstrap failed: {}", e);
                    return Err(e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("RoachPilot shutdown complete (phase: {})", coordinator.phase());
    Ok(())
}

/// Show local and shared bootstrap state
async fn run_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    let local = BootstrapState::new(config.state_dir(), config.node.id.clone())?;
    let store = FileStore::open(config.node.store_dir.clone(), config.node.id.clone())?;
    let store: Arc<dyn SharedStore> = Arc::new(store);
    let tracker = PeerTracker::new(config.node.id.clone(), Arc::clone(&store));
    let view = roachpilot::cluster::ClusterStateView::new(Arc::clone(&store));

    let status = serde_json::json!({
        "node_id": config.node.id,
        "mode": config.deployment_mode().to_string(),
        "joined": tracker.is_joined().await?,
        "peers": tracker.peer_addresses().await?,
        "daemon_started": local.daemon_started().await?,
        "cluster_initialized": view.is_cluster_initialized().await?,
        "cluster_id": view.cluster_id().await?,
        "initial_unit": view.initial_unit().await?,
    });

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(
        r#"# RoachPilot Configuration
# Generated configuration file

[node]
id = "{node_id}"
advertise_address = "10.0.0.5"
data_dir = "/var/lib/roachpilot/{node_id}"
store_dir = "/var/lib/roachpilot/store"

[cockroach]
version = "v23.1.11"
install_dir = "/usr/local/bin"
working_directory = "/var/lib/cockroach"
service = "cockroachdb.service"
sql_port = 26257
http_port = 8080

[cluster]
# Set both factors to 1 for a single-node deployment.
default_zone_replicas = 3
system_data_replicas = 3

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your node and cluster settings.");
    println!("Then start with: roachpilot start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match RoachPilotConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID:          {}", config.node.id);
            println!("  Advertise:        {}", config.node.advertise_address);
            println!("  Deployment Mode:  {}", config.deployment_mode());
            println!("  Cockroach:        {}", config.cockroach.version);
            println!(
                "  Replicas:         default-zone={} system-data={}",
                config.cluster.default_zone_replicas, config.cluster.system_data_replicas
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
