//! Minimal heart rate monitor: acquire the first device advertising the
//! Heart Rate Service, subscribe to measurements, and print them until
//! Ctrl-C.
//!
//! Run with: `cargo run --package pulse-core --example monitor`

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pulse_core::{BtleplugAdapter, ConnectOptions, DiscoveryConnector, NotificationSession};
use pulse_types::uuid::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_core=info".into()),
        )
        .init();

    let adapter = Arc::new(BtleplugAdapter::new().await?);

    let mut connector = DiscoveryConnector::new(adapter.clone(), ConnectOptions::default());
    let device = connector.acquire(HEART_RATE_SERVICE).await?;
    println!("connected to {device}");

    let session = NotificationSession::open(adapter, device, HEART_RATE_MEASUREMENT).await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    session.run(|measurement| println!("{measurement}"), cancel).await?;
    Ok(())
}
