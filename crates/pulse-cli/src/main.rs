use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pulse_core::{BtleplugAdapter, ConnectOptions, DiscoveryConnector, NotificationSession};
use pulse_types::uuid::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use pulse_types::HeartRateMeasurement;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(author, version, about = "Stream heart rate measurements from a BLE device", long_about = None)]
struct Cli {
    /// Service UUID used to discover devices
    #[arg(long, default_value_t = HEART_RATE_SERVICE)]
    service: Uuid,

    /// Characteristic UUID to subscribe to
    #[arg(long, default_value_t = HEART_RATE_MEASUREMENT)]
    characteristic: Uuid,

    /// Only connect to the device with this identifier (MAC address or UUID)
    #[arg(short, long)]
    device: Option<String>,

    /// Discovery scan retries before giving up (-1 to scan forever)
    #[arg(short, long, default_value = "2", allow_hyphen_values = true)]
    retries: i32,

    /// Duration of each discovery scan in seconds
    #[arg(long, default_value = "5")]
    discovery_window: u64,

    /// Connection attempts against a found device
    #[arg(long, default_value = "2")]
    connect_attempts: u32,

    /// Upper bound on the service-resolution wait in seconds
    #[arg(long, default_value = "30")]
    resolve_timeout: u64,

    /// Output format for measurements
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable, one line per measurement
    Text,
    /// One JSON object per line
    Json,
}

fn print_measurement(format: OutputFormat, measurement: &HeartRateMeasurement) {
    match format {
        OutputFormat::Text => println!("{measurement}"),
        OutputFormat::Json => match serde_json::to_string(measurement) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "measurement serialization failed"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let adapter = Arc::new(
        BtleplugAdapter::new()
            .await
            .context("no usable Bluetooth adapter on this host")?,
    );

    let mut options = ConnectOptions::default()
        .discovery_retries(cli.retries)
        .discovery_window(Duration::from_secs(cli.discovery_window))
        .connect_attempts(cli.connect_attempts)
        .resolve_timeout(Duration::from_secs(cli.resolve_timeout));
    if let Some(device) = &cli.device {
        options = options.device_filter(device.clone());
    }

    let mut connector = DiscoveryConnector::new(adapter.clone(), options);
    let device = connector
        .acquire(cli.service)
        .await
        .context("could not acquire a connected device")?;

    if !cli.quiet {
        tracing::info!(device = %device, "connected");
    }

    let session = NotificationSession::open(adapter, device, cli.characteristic)
        .await
        .context("device does not expose the measurement characteristic")?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    let format = cli.format;
    session
        .run(move |m| print_measurement(format, &m), cancel)
        .await
        .context("measurement session failed")?;

    Ok(())
}
