//! Mock adapter implementation for testing.
//!
//! [`MockAdapter`] implements [`AdapterClient`] without BLE hardware. Tests
//! script it: which devices exist and what they advertise, how many scans
//! until a device becomes visible, how many connect attempts fail, how many
//! resolution polls until services resolve, and which notification frames
//! arrive. Every transport call is recorded in an ordered event log so
//! tests can assert exact sequencing (for example that teardown
//! unsubscribes before disconnecting).

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapter::{
    AdapterClient, CharacteristicHandle, DeviceHandle, NotificationStream, RawNotification,
};
use crate::error::{ConnectionFailureReason, Error, Result};

/// A transport call observed by the mock, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEvent {
    /// `start_scan` was called.
    StartScan,
    /// `stop_scan` was called.
    StopScan,
    /// `connect` was called (whether or not it succeeded).
    Connect,
    /// `disconnect` was called.
    Disconnect,
    /// `subscribe` was called.
    Subscribe,
    /// `unsubscribe` was called.
    Unsubscribe,
}

struct MockPeripheral {
    handle: DeviceHandle,
    characteristics: Vec<Uuid>,
    connected: bool,
}

#[derive(Default)]
struct Inner {
    devices: Vec<MockPeripheral>,
    events: Vec<MockEvent>,
    queued: Vec<RawNotification>,
    notify_tx: Option<mpsc::UnboundedSender<RawNotification>>,
    scan_count: u32,
    hidden_until_scans: u32,
    remaining_connect_failures: u32,
    resolve_after_polls: u32,
    polls_done: u32,
    drop_link_after_polls: Option<u32>,
}

/// A scripted BLE transport for hardware-free tests.
#[derive(Default)]
pub struct MockAdapter {
    inner: Mutex<Inner>,
}

impl MockAdapter {
    /// Create an empty mock with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device advertising the given services. The identifier doubles
    /// as the tie-break key in discovery.
    pub fn add_device(&self, id: &str, services: &[Uuid]) {
        let mut inner = self.inner.lock().unwrap();
        inner.devices.push(MockPeripheral {
            handle: DeviceHandle {
                id: id.to_string(),
                services: services.to_vec(),
            },
            characteristics: Vec::new(),
            connected: false,
        });
    }

    /// Give a device a characteristic that `find_characteristic` can see.
    ///
    /// # Panics
    ///
    /// Panics if the device was not added first.
    pub fn add_characteristic(&self, device_id: &str, uuid: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        let device = inner
            .devices
            .iter_mut()
            .find(|d| d.handle.id == device_id)
            .expect("unknown mock device");
        device.characteristics.push(uuid);
    }

    /// Hide all devices from `devices_with_service` until `scans` scans
    /// have completed.
    pub fn hide_until_scans(&self, scans: u32) {
        self.inner.lock().unwrap().hidden_until_scans = scans;
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_connects(&self, count: u32) {
        self.inner.lock().unwrap().remaining_connect_failures = count;
    }

    /// Report services as unresolved for the first `polls` resolution
    /// polls.
    pub fn resolve_after_polls(&self, polls: u32) {
        self.inner.lock().unwrap().resolve_after_polls = polls;
    }

    /// Report the link as lost once `polls` resolution polls have
    /// happened, simulating a device that disconnects mid-resolution.
    pub fn drop_link_after_polls(&self, polls: u32) {
        self.inner.lock().unwrap().drop_link_after_polls = Some(polls);
    }

    /// Queue a notification frame. Queued frames are delivered as soon as
    /// a subscriber attaches; frames queued after that are delivered
    /// immediately.
    pub fn queue_notification(&self, frame: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let frame = Bytes::copy_from_slice(frame);
        match &inner.notify_tx {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => inner.queued.push(frame),
        }
    }

    /// End the notification stream without an unsubscribe, simulating a
    /// transport-side drop.
    pub fn close_notifications(&self) {
        self.inner.lock().unwrap().notify_tx = None;
    }

    /// Number of completed scans.
    pub fn scan_count(&self) -> u32 {
        self.inner.lock().unwrap().scan_count
    }

    /// The ordered log of transport calls observed so far.
    pub fn events(&self) -> Vec<MockEvent> {
        self.inner.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl AdapterClient for MockAdapter {
    async fn devices_with_service(&self, service: Uuid) -> Result<Vec<DeviceHandle>> {
        let inner = self.inner.lock().unwrap();
        if inner.scan_count < inner.hidden_until_scans {
            return Ok(Vec::new());
        }
        Ok(inner
            .devices
            .iter()
            .filter(|d| d.handle.services.contains(&service))
            .map(|d| d.handle.clone())
            .collect())
    }

    async fn start_scan(&self) -> Result<()> {
        self.inner.lock().unwrap().events.push(MockEvent::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(MockEvent::StopScan);
        inner.scan_count += 1;
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(MockEvent::Connect);
        if inner.remaining_connect_failures > 0 {
            inner.remaining_connect_failures -= 1;
            return Err(Error::connection_failed(
                Some(device.id.clone()),
                ConnectionFailureReason::BleError("simulated connect failure".to_string()),
            ));
        }
        if let Some(d) = inner.devices.iter_mut().find(|d| d.handle.id == device.id) {
            d.connected = true;
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(MockEvent::Disconnect);
        if let Some(d) = inner.devices.iter_mut().find(|d| d.handle.id == device.id) {
            d.connected = false;
        }
    }

    async fn is_connected(&self, device: &DeviceHandle) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        if let Some(polls) = inner.drop_link_after_polls {
            if inner.polls_done >= polls {
                return Ok(false);
            }
        }
        Ok(inner
            .devices
            .iter()
            .find(|d| d.handle.id == device.id)
            .is_some_and(|d| d.connected))
    }

    async fn is_services_resolved(&self, _device: &DeviceHandle) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let resolved = inner.polls_done >= inner.resolve_after_polls;
        inner.polls_done = inner.polls_done.saturating_add(1);
        Ok(resolved)
    }

    async fn find_characteristic(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicHandle>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .devices
            .iter()
            .find(|d| d.handle.id == device.id)
            .filter(|d| d.characteristics.contains(&uuid))
            .map(|_| CharacteristicHandle {
                device_id: device.id.clone(),
                uuid,
            }))
    }

    async fn subscribe(&self, _characteristic: &CharacteristicHandle) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push(MockEvent::Subscribe);
            for frame in inner.queued.drain(..) {
                let _ = tx.send(frame);
            }
            inner.notify_tx = Some(tx);
        }
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })))
    }

    async fn unsubscribe(&self, _characteristic: &CharacteristicHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(MockEvent::Unsubscribe);
        inner.notify_tx = None;
        Ok(())
    }
}
