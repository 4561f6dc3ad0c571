//! Connection lifecycle and notification plumbing for BLE Heart Rate
//! Service peripherals.
//!
//! This crate implements the two stateful pieces of a heart rate monitor:
//!
//! - **Discovery and connection**: [`DiscoveryConnector`] locates a device
//!   advertising a target service UUID (from the adapter's cache or by
//!   active scanning within a bounded retry budget), connects to it, and
//!   waits for GATT service resolution.
//! - **Notification delivery**: [`NotificationSession`] subscribes to a
//!   characteristic, decodes each notification frame, and forwards decoded
//!   measurements to a caller-supplied sink until cancelled.
//!
//! Both run against the [`AdapterClient`] trait, which abstracts the
//! platform BLE transport. [`BtleplugAdapter`] binds it to real hardware;
//! [`MockAdapter`] provides a scripted implementation for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pulse_core::{BtleplugAdapter, ConnectOptions, DiscoveryConnector, NotificationSession};
//! use pulse_types::uuid::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(BtleplugAdapter::new().await?);
//!
//!     let mut connector = DiscoveryConnector::new(adapter.clone(), ConnectOptions::default());
//!     let device = connector.acquire(HEART_RATE_SERVICE).await?;
//!
//!     let session = NotificationSession::open(adapter, device, HEART_RATE_MEASUREMENT).await?;
//!     let cancel = CancellationToken::new();
//!     session.run(|m| println!("{m}"), cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod ble;
pub mod connector;
pub mod error;
pub mod mock;
pub mod session;

pub use adapter::{
    AdapterClient, CharacteristicHandle, DeviceHandle, NotificationStream, RawNotification,
};
pub use ble::BtleplugAdapter;
pub use connector::{ConnectOptions, ConnectorState, DiscoveryConnector, UNLIMITED_RETRIES};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use mock::{MockAdapter, MockEvent};
pub use session::NotificationSession;

// Re-export the data model so callers need only one crate.
pub use pulse_types::{DecodeError, HeartRateMeasurement};
