//! The boundary between the connection core and the platform BLE transport.
//!
//! [`AdapterClient`] is the entire external contract: device enumeration by
//! advertised service UUID, active discovery, connect/disconnect, and
//! characteristic notification plumbing. The core assumes nothing about the
//! transport beyond UUID-indexed services/characteristics and opaque device
//! handles, so it runs unchanged against [`crate::BtleplugAdapter`] on real
//! hardware and [`crate::MockAdapter`] in tests.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use uuid::Uuid;

use crate::error::Result;

/// Opaque reference to a discovered BLE peripheral.
///
/// The `id` is stable for the lifetime of the adapter (a MAC address on
/// Linux/Windows, a CoreBluetooth UUID on macOS). Handles are treated as
/// immutable references once obtained; connection state lives in the
/// transport, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Stable transport-level identifier.
    pub id: String,
    /// Service UUIDs seen in the device's advertisement.
    pub services: Vec<Uuid>,
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Opaque reference to a GATT characteristic, scoped under a device.
///
/// Invalid once the owning device disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    /// Identifier of the owning device.
    pub device_id: String,
    /// The characteristic UUID.
    pub uuid: Uuid,
}

/// A raw characteristic value delivered by a notification.
pub type RawNotification = Bytes;

/// Stream of raw notifications for one subscribed characteristic.
///
/// Dropping the stream stops delivery on the consumer side; call
/// [`AdapterClient::unsubscribe`] to release the peripheral-side
/// subscription as well.
pub type NotificationStream = Pin<Box<dyn Stream<Item = RawNotification> + Send>>;

/// Interface over the platform BLE transport.
///
/// Implementations must deliver notifications for a subscription in the
/// order the transport received them; the core performs no reordering.
#[async_trait]
pub trait AdapterClient: Send + Sync {
    /// Devices currently known to the transport (cached from previous
    /// scans) whose advertised service UUIDs include `service`.
    async fn devices_with_service(&self, service: Uuid) -> Result<Vec<DeviceHandle>>;

    /// Begin active discovery. May run concurrently with other adapter
    /// operations.
    async fn start_scan(&self) -> Result<()>;

    /// End active discovery.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a device. Fails if the peripheral is unreachable or
    /// rejects the connection.
    async fn connect(&self, device: &DeviceHandle) -> Result<()>;

    /// Disconnect from a device. Best-effort: never fails the caller, even
    /// if the device is already disconnected.
    async fn disconnect(&self, device: &DeviceHandle);

    /// Whether the transport currently holds a connection to the device.
    async fn is_connected(&self, device: &DeviceHandle) -> Result<bool>;

    /// Whether GATT service resolution has completed for the device.
    /// Poll-able; cheap to call repeatedly.
    async fn is_services_resolved(&self, device: &DeviceHandle) -> Result<bool>;

    /// Look up a characteristic by UUID on a connected, service-resolved
    /// device. `None` means the device does not expose it.
    async fn find_characteristic(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicHandle>>;

    /// Subscribe to value-changed notifications for a characteristic.
    /// Returns a stream that yields one item per notification.
    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<NotificationStream>;

    /// Release a notification subscription on the peripheral side.
    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> Result<()>;
}
