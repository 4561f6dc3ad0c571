//! btleplug-backed implementation of the adapter boundary.
//!
//! Binds [`AdapterClient`] to the platform Bluetooth stack via btleplug.
//! Peripherals discovered by the platform are cached by identifier so the
//! opaque [`DeviceHandle`] ids stay resolvable across calls.

use std::collections::HashMap;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{AdapterClient, CharacteristicHandle, DeviceHandle, NotificationStream};
use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};

/// Format a peripheral ID as a string.
///
/// On macOS peripheral IDs are CoreBluetooth UUIDs; elsewhere they wrap the
/// Bluetooth address. Either way the debug form carries the useful part.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// [`AdapterClient`] bound to the first available platform Bluetooth
/// adapter.
pub struct BtleplugAdapter {
    adapter: Adapter,
    /// Cache of platform peripherals keyed by formatted peripheral id, so
    /// device handles issued earlier remain resolvable.
    peripherals: RwLock<HashMap<String, Peripheral>>,
}

impl BtleplugAdapter {
    /// Create an adapter client over the first Bluetooth adapter on this
    /// host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] with
    /// [`DeviceNotFoundReason::NoAdapter`] when the host has none.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))?;

        Ok(Self {
            adapter,
            peripherals: RwLock::new(HashMap::new()),
        })
    }

    /// Pull the platform's current peripheral list into the cache.
    async fn refresh_peripherals(&self) -> Result<()> {
        let peripherals = self.adapter.peripherals().await?;
        let mut cache = self.peripherals.write().await;
        for peripheral in peripherals {
            cache.insert(format_peripheral_id(&peripheral.id()), peripheral);
        }
        Ok(())
    }

    /// Resolve a device handle back to its platform peripheral.
    async fn peripheral(&self, device: &DeviceHandle) -> Result<Peripheral> {
        if let Some(p) = self.peripherals.read().await.get(&device.id) {
            return Ok(p.clone());
        }
        self.refresh_peripherals().await?;
        self.peripherals
            .read()
            .await
            .get(&device.id)
            .cloned()
            .ok_or_else(|| {
                Error::connection_failed(
                    Some(device.id.clone()),
                    ConnectionFailureReason::BleError("device handle unknown to adapter".into()),
                )
            })
    }

    /// Find the platform characteristic object for a handle, if the device
    /// still exposes it.
    async fn gatt_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Option<(Peripheral, Characteristic)>> {
        let device = DeviceHandle {
            id: handle.device_id.clone(),
            services: Vec::new(),
        };
        let peripheral = self.peripheral(&device).await?;
        let characteristic = peripheral
            .services()
            .iter()
            .flat_map(|s| s.characteristics.clone())
            .find(|c| c.uuid == handle.uuid);
        Ok(characteristic.map(|c| (peripheral, c)))
    }
}

#[async_trait]
impl AdapterClient for BtleplugAdapter {
    async fn devices_with_service(&self, service: Uuid) -> Result<Vec<DeviceHandle>> {
        self.refresh_peripherals().await?;

        let cache = self.peripherals.read().await;
        let mut matches = Vec::new();
        for (id, peripheral) in cache.iter() {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    debug!(device = %id, error = %e, "skipping peripheral without properties");
                    continue;
                }
            };
            let advertised = properties.services.contains(&service)
                || properties.service_data.contains_key(&service);
            if advertised {
                matches.push(DeviceHandle {
                    id: id.clone(),
                    services: properties.services.clone(),
                });
            }
        }
        Ok(matches)
    }

    async fn start_scan(&self) -> Result<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let peripheral = self.peripheral(device).await?;
        peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) {
        match self.peripheral(device).await {
            Ok(peripheral) => {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(device = %device, error = %e, "disconnect failed");
                }
            }
            Err(e) => debug!(device = %device, error = %e, "disconnect skipped"),
        }
    }

    async fn is_connected(&self, device: &DeviceHandle) -> Result<bool> {
        let peripheral = self.peripheral(device).await?;
        Ok(peripheral.is_connected().await?)
    }

    async fn is_services_resolved(&self, device: &DeviceHandle) -> Result<bool> {
        let peripheral = self.peripheral(device).await?;
        if !peripheral.services().is_empty() {
            return Ok(true);
        }
        // btleplug exposes no passive "resolved" flag; resolution is the
        // GATT discovery we trigger here. A failed attempt reports
        // unresolved and the caller's poll loop retries.
        if let Err(e) = peripheral.discover_services().await {
            debug!(device = %device, error = %e, "service discovery attempt failed");
            return Ok(false);
        }
        Ok(!peripheral.services().is_empty())
    }

    async fn find_characteristic(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Option<CharacteristicHandle>> {
        let peripheral = self.peripheral(device).await?;
        let found = peripheral
            .services()
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .any(|c| c.uuid == uuid);
        Ok(found.then(|| CharacteristicHandle {
            device_id: device.id.clone(),
            uuid,
        }))
    }

    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<NotificationStream> {
        let (peripheral, gatt) = self.gatt_characteristic(characteristic).await?.ok_or_else(|| {
            Error::characteristic_not_found(
                characteristic.device_id.clone(),
                characteristic.uuid.to_string(),
            )
        })?;

        peripheral.subscribe(&gatt).await?;
        let uuid = characteristic.uuid;

        // The platform stream carries every subscribed characteristic of
        // the peripheral; narrow it to ours.
        let notifications = peripheral.notifications().await?;
        let stream = notifications.filter_map(move |n| {
            futures::future::ready((n.uuid == uuid).then(|| Bytes::from(n.value)))
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> Result<()> {
        match self.gatt_characteristic(characteristic).await? {
            Some((peripheral, gatt)) => {
                peripheral.unsubscribe(&gatt).await?;
                Ok(())
            }
            None => {
                // Nothing to release; the device is gone or never had it.
                warn!(characteristic = %characteristic.uuid, "unsubscribe found no characteristic");
                Ok(())
            }
        }
    }
}
