mod config;
mod logging;
mod loopback;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tern_core::BackendStatus;
use tern_platform::{LeaseSet, NoopLease};
use tern_reticulum::{ClientOptions, MeshClient};

use crate::config::SmokeConfig;
use crate::loopback::LoopbackBackend;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init();
    let config = SmokeConfig::from_env()?;
    info!(endpoint = %config.endpoint, "starting smoke run against the loopback backend");

    let mut options = ClientOptions::new(Arc::new(LoopbackBackend));
    options.leases = LeaseSet::new().with(NoopLease);
    options.reinit_hook = Some(Arc::new(|| info!("backend requested re-initialization")));
    let client = MeshClient::spawn(options);

    let mut announces = client.subscribe_announces();
    let mut messages = client.subscribe_messages();
    let mut delivery = client.subscribe_delivery_status();
    let mut sync_states = client.subscribe_propagation_sync();

    let connect_limit = Duration::from_millis(config.connect_timeout_ms);
    client.connect(connect_limit).await?;
    client
        .wait_for_status(|status| matches!(status, BackendStatus::Ready), connect_limit)
        .await?;
    info!(state = ?client.connection_state(), "backend ready");

    client.announce_now().await?;
    for stat in client.interface_stats().await? {
        info!(name = %stat.name, up = stat.up, rx = stat.rx_bytes, tx = stat.tx_bytes, "interface");
    }
    client.start_propagation_sync(None).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(config.watch_ms);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            maybe = announces.recv() => {
                if let Some(event) = maybe {
                    info!(
                        destination = %hex::encode(&event.destination_hash),
                        node_type = ?event.node_type,
                        hops = event.hops,
                        "announce"
                    );
                }
            }
            maybe = messages.recv() => {
                if let Some(event) = maybe {
                    info!(
                        message = %hex::encode(&event.message_hash),
                        bytes = event.content_length,
                        "message received"
                    );
                }
            }
            maybe = delivery.recv() => {
                if let Some(update) = maybe {
                    info!(
                        message = %hex::encode(&update.message_hash),
                        state = ?update.state,
                        "delivery report"
                    );
                }
            }
            maybe = sync_states.recv() => {
                if let Some(state) = maybe {
                    info!(
                        phase = ?state.phase,
                        progress = state.progress,
                        messages = state.messages_received,
                        "relay sync"
                    );
                }
            }
        }
    }

    client.disconnect().await;
    info!("smoke run complete");
    Ok(())
}
