//! agromeshd: agromesh flood-relay node daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use agromesh_core::config::{AgromeshConfig, Role};
use agromesh_core::NodeAddress;
use agromesh_services::dedup::capacity_for;
use agromesh_services::{
    ControllerPoller, DedupCache, FileDedupStore, LogNotifier, NodeStatusTable, Notifier,
    NotifierSet, RelayEngine, RelayStats, ResponseQueue, RoleDispatcher, SequenceCounter,
    SharedRadio, UplinkForwarder,
};

mod radio;
mod sensor;
mod uplink;

use radio::UdpRadio;
use sensor::SimulatedSensor;
use uplink::JsonLinesUplink;

/// Chance that the simulated probe is missing from the bus on a read.
const SIMULATED_BUS_FAULT_RATE: f64 = 0.02;

const STATS_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = AgromeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = AgromeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AgromeshConfig::default()
    });
    config.validate().context("invalid configuration")?;

    let address = config.address()?;
    let known = config.known_nodes()?;
    let role = config.node.role;
    tracing::info!(
        address = %address,
        ?role,
        known_nodes = known.len(),
        ttl = config.mesh.ttl,
        "agromeshd starting"
    );

    // Shared state
    let radio = SharedRadio::new(Box::new(
        UdpRadio::open(&config.radio.interface, config.radio.port)
            .context("failed to open radio")?,
    ));
    let sequence = SequenceCounter::new();
    let queue = ResponseQueue::new(config.mesh.response_queue_capacity);
    let node_status = NodeStatusTable::new();
    node_status.track(&known);
    let notifier: Arc<dyn Notifier> = Arc::new(
        NotifierSet::new()
            .with(Arc::new(LogNotifier))
            .with(Arc::new(node_status.clone())),
    );
    let (known_tx, known_rx) = watch::channel(known.clone());

    let dispatcher = match role {
        Role::Controller => RoleDispatcher::controller(queue.clone(), notifier.clone()),
        Role::Sensor => RoleDispatcher::sensor(
            Box::new(SimulatedSensor::new(SIMULATED_BUS_FAULT_RATE)),
            sequence.clone(),
            radio.clone(),
        ),
    };

    let dedup_path = config.storage.dedup_path.clone();
    tracing::info!(path = %dedup_path.display(), "dedup snapshot path");
    let cache = DedupCache::restore(
        capacity_for(known.len()),
        Box::new(FileDedupStore::new(dedup_path)),
    );

    let mut relay = RelayEngine::new(address, cache, radio.clone(), dispatcher);
    let origin = relay.origin_handle();
    let relay_stats = relay.stats();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Known-node reload on SIGHUP ──────────────────────────────────────────
    {
        let node_status = node_status.clone();
        let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("failed to install SIGHUP handler")?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                match reload_known_nodes() {
                    Ok(nodes) => {
                        tracing::info!(count = nodes.len(), "known-node list reloaded");
                        node_status.track(&nodes);
                        known_tx.send_replace(nodes);
                    }
                    Err(e) => tracing::warn!(error = %e, "reload failed, keeping current node list"),
                }
            }
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

    {
        let known = known_rx.clone();
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move { ("relay", relay.run(Some(known), shutdown).await) });
    }

    if role == Role::Controller {
        let poller = ControllerPoller::new(
            address,
            radio.clone(),
            sequence.clone(),
            queue.clone(),
            notifier.clone(),
            known_rx.clone(),
            config.mesh.ttl,
            Duration::from_secs(config.mesh.response_timeout_secs),
        )
        .with_origin(origin)
        .with_status(node_status.clone());
        let interval = Duration::from_secs(config.mesh.poll_interval_secs.max(1));
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move { ("poller", poller.run(interval, shutdown).await) });

        let uplink_path = config.storage.uplink_path.clone();
        tracing::info!(path = %uplink_path.display(), "uplink sink path");
        let forwarder = UplinkForwarder::new(queue.clone(), Arc::new(JsonLinesUplink::new(uplink_path)));
        let interval = Duration::from_secs(config.uplink.interval_secs.max(1));
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move { ("uplink forwarder", forwarder.run(interval, shutdown).await) });
    }

    {
        let stats = relay_stats.clone();
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move { ("stats printer", stats_loop(stats, shutdown).await) });
    }

    // Status HTTP endpoint
    if config.api.port != 0 {
        let state = agromesh_api::ApiState {
            address,
            role,
            sequence: sequence.clone(),
            relay_stats: relay_stats.clone(),
            queue: queue.clone(),
            nodes: node_status.clone(),
            known_nodes: known_rx.clone(),
            started_at: Instant::now(),
        };
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = agromesh_api::serve(state, port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        Some(joined) = tasks.join_next() => match joined {
            Ok((name, Ok(()))) => tracing::error!(task = name, "task exited"),
            Ok((name, Err(e))) => tracing::error!(task = name, error = %e, "task failed"),
            Err(e) => tracing::error!(error = %e, "task panicked"),
        },
    }

    let _ = shutdown_tx.send(());
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("tasks still running after grace period, aborting");
        tasks.abort_all();
    }

    Ok(())
}

fn reload_known_nodes() -> Result<Vec<NodeAddress>> {
    let config = AgromeshConfig::load()?;
    Ok(config.known_nodes()?)
}

async fn stats_loop(stats: RelayStats, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = interval.tick() => stats.log(),
        }
    }
}
