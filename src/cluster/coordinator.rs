//! Bootstrap Coordinator
//!
//! The state machine that sequences daemon start, peer-readiness checks,
//! leadership checks, cluster initialization, and identity publication.
//!
//! Events are processed one at a time, to completion. When a precondition
//! is not yet met (node not joined, leadership not confirmed) the handler
//! returns [`Outcome::Deferred`] and the event is replayed on a later
//! scheduling pass; deferral is idempotent, so every initializing action
//! first checks whether the cluster id is already populated before acting.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cluster::identity::IdentityResolver;
use crate::cluster::membership::{ClusterStateView, PeerTracker};
use crate::config::RoachPilotConfig;
use crate::daemon::{service, ProcessControl};
use crate::error::{Error, Result};
use crate::mode::DeploymentMode;
use crate::store::{BootstrapState, SharedStore};

/// Leadership query supplied by the surrounding orchestration runtime
#[async_trait]
pub trait LeadershipOracle: Send + Sync {
    /// Whether this node currently holds cluster-wide leadership
    async fn is_leader(&self) -> Result<bool>;
}

/// Bootstrap phase of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing started yet
    Idle,
    /// Daemon start has been requested
    DaemonStarting,
    /// Daemon is running, waiting for peer units to join
    AwaitingPeers,
    /// Joined, waiting for this node to be confirmed leader
    AwaitingLeadership,
    /// Running the initialization command and resolving the cluster id
    Initializing,
    /// Cluster identity is known and published
    Initialized,
    /// Terminal: this unit must not run its daemon
    Blocked,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::DaemonStarting => write!(f, "DAEMON_STARTING"),
            Phase::AwaitingPeers => write!(f, "AWAITING_PEERS"),
            Phase::AwaitingLeadership => write!(f, "AWAITING_LEADERSHIP"),
            Phase::Initializing => write!(f, "INITIALIZING"),
            Phase::Initialized => write!(f, "INITIALIZED"),
            Phase::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// External events driving the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Install the daemon binary and render its service file
    InstallRequested,
    /// Start the daemon and begin bootstrap
    StartRequested,
    /// The daemon process is up
    DaemonStarted,
    /// The visible peer set changed
    MembershipChanged,
    /// Replication factors changed
    ConfigChanged {
        default_zone_replicas: u32,
        system_data_replicas: u32,
    },
}

/// Result of processing one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Event fully processed
    Handled,
    /// Precondition not yet met; replay the event on a later pass
    Deferred,
    /// This unit must not proceed; terminal
    Blocked,
}

/// Notifications raised to the surrounding shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    DaemonStarted,
    ClusterInitialized(Uuid),
}

/// The bootstrap coordination state machine
pub struct Coordinator {
    node_id: String,
    advertise_address: String,
    mode: DeploymentMode,
    phase: Phase,
    binary: PathBuf,
    working_directory: PathBuf,
    local: Arc<BootstrapState>,
    tracker: PeerTracker,
    view: ClusterStateView,
    oracle: Arc<dyn LeadershipOracle>,
    control: Arc<dyn ProcessControl>,
    resolver: IdentityResolver,
    notify_tx: mpsc::UnboundedSender<Notification>,
    events: VecDeque<Event>,
    deferred: Vec<Event>,
}

impl Coordinator {
    pub fn new(
        config: &RoachPilotConfig,
        local: Arc<BootstrapState>,
        store: Arc<dyn SharedStore>,
        oracle: Arc<dyn LeadershipOracle>,
        control: Arc<dyn ProcessControl>,
        notify_tx: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            node_id: config.node.id.clone(),
            advertise_address: config.node.advertise_address.clone(),
            mode: config.deployment_mode(),
            phase: Phase::Idle,
            binary: config.cockroach.binary_path(),
            working_directory: config.cockroach.working_directory.clone(),
            local,
            tracker: PeerTracker::new(config.node.id.clone(), Arc::clone(&store)),
            view: ClusterStateView::new(store),
            oracle,
            control: Arc::clone(&control),
            resolver: IdentityResolver::new(control),
            notify_tx,
            events: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    /// Override the identity resolver's retry schedule
    pub fn with_identity_retry(mut self, max_retries: u32, retry_timeout: Duration) -> Self {
        self.resolver = IdentityResolver::new(Arc::clone(&self.control))
            .with_retry(max_retries, retry_timeout);
        self
    }

    /// Current bootstrap phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether any events are waiting for a later scheduling pass
    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Queue an event for the next scheduling pass
    pub fn enqueue(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Process all queued events, replaying events deferred on the
    /// previous pass first. Each event is attempted at most once per pass.
    pub async fn run_pending(&mut self) -> Result<()> {
        let deferred: Vec<Event> = self.deferred.drain(..).collect();
        for event in deferred.into_iter().rev() {
            self.events.push_front(event);
        }

        while let Some(event) = self.events.pop_front() {
            tracing::debug!("Dispatching {:?} in phase {}", event, self.phase);
            match self.dispatch(event.clone()).await? {
                Outcome::Handled => {}
                Outcome::Blocked => {}
                Outcome::Deferred => {
                    tracing::debug!("Deferred {:?} until the next pass", event);
                    self.deferred.push(event);
                }
            }
        }
        Ok(())
    }

    /// Process a single event to completion
    pub async fn dispatch(&mut self, event: Event) -> Result<Outcome> {
        match event {
            Event::InstallRequested => {
                self.control.install().await?;
                self.apply_service_config().await?;
                Ok(Outcome::Handled)
            }
            Event::StartRequested => self.on_start().await,
            Event::DaemonStarted => self.on_daemon_started().await,
            Event::MembershipChanged => self.on_membership_changed().await,
            Event::ConfigChanged {
                default_zone_replicas,
                system_data_replicas,
            } => {
                self.on_config_changed(default_zone_replicas, system_data_replicas)
                    .await
            }
        }
    }

    async fn on_start(&mut self) -> Result<Outcome> {
        // A second unit in a single-node deployment must never run its
        // daemon once the cluster has been initialized by another unit.
        if self.mode.is_single_node() {
            if let Some(initial_unit) = self.view.initial_unit().await? {
                if initial_unit != self.node_id {
                    tracing::warn!(
                        "Extra unit in a single-node deployment (initialized by {})",
                        initial_unit
                    );
                    self.phase = Phase::Blocked;
                    return Ok(Outcome::Blocked);
                }
            }
        }

        self.phase = Phase::DaemonStarting;
        self.apply_service_config().await?;

        if !self.local.daemon_started().await? {
            self.control.start().await?;
            self.local.set_daemon_started(true).await?;
            tracing::info!("Daemon started");
        }
        let _ = self.notify_tx.send(Notification::DaemonStarted);

        // start-single-node initializes the on-disk state as a side effect
        // of the first start; no peer contention means no leadership check.
        if self.mode.is_single_node() && !self.local.cluster_initialized().await? {
            let cluster_id = self.resolver.resolve().await?;
            self.local.set_cluster_id(&cluster_id).await?;
            self.local.set_cluster_initialized(true).await?;
            self.publish_cluster_state(&cluster_id).await?;
            let _ = self.notify_tx.send(Notification::ClusterInitialized(cluster_id));
            tracing::info!("Single-node cluster initialized: {}", cluster_id);
        }

        self.enqueue(Event::DaemonStarted);
        Ok(Outcome::Handled)
    }

    async fn on_daemon_started(&mut self) -> Result<Outcome> {
        if !self.mode.is_single_node() && !self.tracker.is_joined().await? {
            tracing::info!("Waiting for peer units to join");
            self.phase = Phase::AwaitingPeers;
            return Ok(Outcome::Deferred);
        }

        if self.view.is_cluster_initialized().await? || self.local.cluster_initialized().await? {
            // Some other unit already initialized the cluster, or this one
            // did on a previous pass. A previous run may have committed the
            // id locally and stopped before publication completed, so
            // re-check the shared store before settling.
            if let Some(cluster_id) = self.local.cluster_id().await? {
                if !self.view.is_cluster_initialized().await? {
                    self.publish_cluster_state(&cluster_id).await?;
                }
            }
            self.phase = Phase::Initialized;
            return Ok(Outcome::Handled);
        }

        if self.mode.is_single_node() {
            // start-single-node self-initializes on first start; the
            // explicit init command must never run here.
            return Err(Error::SingleNodeInit);
        }

        if !self.oracle.is_leader().await? {
            tracing::info!("Waiting for the leader unit to initialize the cluster");
            self.phase = Phase::AwaitingLeadership;
            return Ok(Outcome::Deferred);
        }

        self.phase = Phase::Initializing;
        tracing::info!("Initializing the cluster");
        self.control.run_init().await?;

        let cluster_id = self.resolver.resolve().await?;
        self.local.set_cluster_id(&cluster_id).await?;
        self.local.set_cluster_initialized(true).await?;
        self.publish_cluster_state(&cluster_id).await?;
        let _ = self.notify_tx.send(Notification::ClusterInitialized(cluster_id));

        self.phase = Phase::Initialized;
        tracing::info!("Cluster initialized: {}", cluster_id);
        Ok(Outcome::Handled)
    }

    async fn on_membership_changed(&mut self) -> Result<Outcome> {
        self.apply_service_config().await?;

        // Flush a locally-held cluster id that could not be published
        // before this node had a membership record.
        if let Some(cluster_id) = self.local.cluster_id().await? {
            if self.tracker.is_joined().await? && !self.view.is_cluster_initialized().await? {
                self.publish_cluster_state(&cluster_id).await?;
            }
        }

        if self.phase != Phase::Blocked
            && self.local.daemon_started().await?
            && self.view.is_cluster_initialized().await?
        {
            if self.phase != Phase::Initialized {
                tracing::info!("Cluster state observed, node active");
            }
            self.phase = Phase::Initialized;
        }
        Ok(Outcome::Handled)
    }

    async fn on_config_changed(
        &mut self,
        default_zone_replicas: u32,
        system_data_replicas: u32,
    ) -> Result<Outcome> {
        let mode = DeploymentMode::resolve(default_zone_replicas, system_data_replicas);
        if mode != self.mode {
            // TODO: reconcile replication-factor changes via zone configs
            // instead of ignoring them.
            tracing::warn!(
                "Deployment mode changed from {} to {} after bootstrap; not migrating",
                self.mode,
                mode
            );
            return Ok(Outcome::Handled);
        }

        self.apply_service_config().await?;
        Ok(Outcome::Handled)
    }

    /// Publish the cluster id and initial unit to the shared store.
    ///
    /// In multi-node mode the initial unit must hold leadership at the
    /// moment of publication, even under event mis-ordering.
    async fn publish_cluster_state(&self, cluster_id: &Uuid) -> Result<()> {
        if !self.mode.is_single_node() && !self.oracle.is_leader().await? {
            return Err(Error::LeadershipViolation(self.node_id.clone()));
        }

        if !self.tracker.is_joined().await? {
            // No membership record yet; the id stays in the local record
            // and is flushed on the next membership change.
            tracing::debug!("Not joined yet, holding cluster id locally");
            return Ok(());
        }

        self.view.publish(cluster_id, &self.node_id).await
    }

    /// Render the daemon's unit file for the current peer set and apply it
    /// if the content changed, restarting an already-running daemon.
    async fn apply_service_config(&mut self) -> Result<()> {
        let peers = if self.tracker.is_joined().await? {
            self.tracker.peer_addresses().await?
        } else {
            BTreeSet::new()
        };

        let exec_start =
            service::exec_start_line(&self.binary, self.mode, &self.advertise_address, &peers);
        let content = service::render_unit(&self.working_directory, &exec_start);
        let hash = service::unit_hash(&content);

        if self.local.rendered_unit_hash().await? == Some(hash) {
            return Ok(());
        }

        self.control.apply_unit(&content).await?;
        self.local.set_rendered_unit_hash(hash).await?;

        if self.local.daemon_started().await? {
            tracing::info!("Peer set changed, restarting daemon");
            self.control.restart().await?;
        }
        Ok(())
    }
}
