//! Gatehouse Server Binary
//!
//! Wires the authentication core to the realtime relay and serves until
//! interrupted. The signing secret is injected through `AUTH_SECRET`;
//! rotation happens by restart.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatehouse::auth::{AuthGateway, MachineConfig, RateGovernor, SessionStateMachine, TokenStore};
use gatehouse::directory::provider::UnconfiguredProvider;
use gatehouse::directory::MemoryRecordStore;
use gatehouse::network::{ConnectionRegistry, RegistryConfig, RelayConfig, RelayServer};
use gatehouse::notify::{run_delivery_worker, ChannelSink, LogMailer};
use gatehouse::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Gatehouse Server v{}", VERSION);

    let machine_config =
        MachineConfig::from_env().context("AUTH_SECRET must be set to the token signing secret")?;

    let mut relay_config = RelayConfig::default();
    if let Ok(bind) = std::env::var("RELAY_BIND") {
        relay_config.bind_addr = bind
            .parse()
            .with_context(|| format!("RELAY_BIND is not a bind address: {bind}"))?;
    }

    // Notification queue with its background delivery worker.
    let (sink, events_rx) = ChannelSink::new(1024);
    tokio::spawn(run_delivery_worker(events_rx, LogMailer));

    let machine = Arc::new(SessionStateMachine::new(
        machine_config,
        Arc::new(MemoryRecordStore::new()),
        TokenStore::in_memory(),
        Arc::new(sink),
        Arc::new(UnconfiguredProvider),
    ));
    let gateway = Arc::new(AuthGateway::new(
        Arc::clone(&machine),
        Arc::new(RateGovernor::with_defaults()),
    ));
    let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));

    let server = RelayServer::new(relay_config, gateway, registry);
    server.run().await?;

    Ok(())
}
