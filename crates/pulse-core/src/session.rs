//! Notification subscription and measurement delivery.
//!
//! A [`NotificationSession`] owns one subscribed characteristic on a
//! connected, service-resolved device. It decodes each raw notification
//! into a [`HeartRateMeasurement`] and forwards it to a caller-supplied
//! sink, in arrival order, until cancelled. A single malformed frame is
//! logged and dropped; it never ends the stream.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_types::HeartRateMeasurement;

use crate::adapter::{AdapterClient, CharacteristicHandle, DeviceHandle};
use crate::error::{ConnectionFailureReason, Error, Result};

/// A live subscription to a heart rate measurement characteristic.
///
/// Sessions are constructed with an injected adapter and device, so
/// multiple sessions can coexist in one process and tests can run them
/// against [`crate::MockAdapter`].
pub struct NotificationSession {
    adapter: Arc<dyn AdapterClient>,
    device: DeviceHandle,
    characteristic: CharacteristicHandle,
}

impl std::fmt::Debug for NotificationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSession")
            .field("device", &self.device.id)
            .field("characteristic", &self.characteristic.uuid)
            .finish()
    }
}

impl NotificationSession {
    /// Open a session by locating `characteristic_uuid` on a connected,
    /// service-resolved device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CharacteristicNotFound`] when the device does not
    /// expose the characteristic. This is terminal: the device firmware
    /// either lacks the feature or the UUID is wrong.
    pub async fn open(
        adapter: Arc<dyn AdapterClient>,
        device: DeviceHandle,
        characteristic_uuid: Uuid,
    ) -> Result<Self> {
        let characteristic = adapter
            .find_characteristic(&device, characteristic_uuid)
            .await?
            .ok_or_else(|| {
                Error::characteristic_not_found(device.id.clone(), characteristic_uuid.to_string())
            })?;

        debug!(device = %device, characteristic = %characteristic_uuid, "characteristic located");
        Ok(Self {
            adapter,
            device,
            characteristic,
        })
    }

    /// The characteristic this session is bound to.
    pub fn characteristic(&self) -> &CharacteristicHandle {
        &self.characteristic
    }

    /// Subscribe and pump notifications through the decoder into `sink`
    /// until `cancel` is signalled.
    ///
    /// Decoding and the sink run on the delivery path, so the sink must be
    /// fast and non-blocking. Measurements reach the sink in the order the
    /// transport delivered them.
    ///
    /// On cancellation the session unsubscribes, then disconnects the
    /// device, in that order, and returns `Ok(())`. Teardown failures are
    /// logged, not propagated. If the transport ends the notification
    /// stream before cancellation, the same teardown runs and the session
    /// returns a link-lost [`Error::ConnectionFailed`].
    #[tracing::instrument(level = "info", skip_all, fields(device = %self.device))]
    pub async fn run<F>(self, mut sink: F, cancel: CancellationToken) -> Result<()>
    where
        F: FnMut(HeartRateMeasurement) + Send,
    {
        let mut notifications = self.adapter.subscribe(&self.characteristic).await?;
        info!(characteristic = %self.characteristic.uuid, "subscribed, waiting for notifications");

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("session cancelled");
                    break Ok(());
                }
                next = notifications.next() => match next {
                    Some(raw) => match HeartRateMeasurement::from_bytes(&raw) {
                        Ok(measurement) => sink(measurement),
                        Err(e) => {
                            // One corrupt frame must not kill the stream.
                            warn!(len = raw.len(), error = %e, "dropping malformed frame");
                        }
                    },
                    None => {
                        warn!("notification stream ended unexpectedly");
                        break Err(Error::connection_failed(
                            Some(self.device.id.clone()),
                            ConnectionFailureReason::LinkLost,
                        ));
                    }
                }
            }
        };

        // Teardown order matters: release the subscription while the link
        // is still up, then drop the link.
        if let Err(e) = self.adapter.unsubscribe(&self.characteristic).await {
            warn!(error = %e, "unsubscribe failed during teardown");
        }
        self.adapter.disconnect(&self.device).await;
        debug!("session closed");

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockAdapter, MockEvent};
    use pulse_types::uuid::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};

    fn ready_adapter() -> Arc<MockAdapter> {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.add_characteristic("AA:00", HEART_RATE_MEASUREMENT);
        adapter
    }

    fn device() -> DeviceHandle {
        DeviceHandle {
            id: "AA:00".to_string(),
            services: vec![HEART_RATE_SERVICE],
        }
    }

    #[tokio::test]
    async fn test_open_missing_characteristic() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);

        let err = NotificationSession::open(adapter, device(), HEART_RATE_MEASUREMENT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[tokio::test]
    async fn test_measurements_reach_sink_in_order() {
        let adapter = ready_adapter();
        adapter.queue_notification(&[0x00, 60]);
        adapter.queue_notification(&[0x00, 61]);
        adapter.queue_notification(&[0x00, 62]);

        let session = NotificationSession::open(adapter.clone(), device(), HEART_RATE_MEASUREMENT)
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            session
                .run(
                    move |m| sink_seen.lock().unwrap().push(m.heart_rate),
                    task_cancel,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![60, 61, 62]);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_not_fatal() {
        let adapter = ready_adapter();
        adapter.queue_notification(&[0x00, 60]);
        // Truncated: flags declare a 16-bit energy field that is missing.
        adapter.queue_notification(&[0x08, 70]);
        adapter.queue_notification(&[0x00, 62]);

        let session = NotificationSession::open(adapter.clone(), device(), HEART_RATE_MEASUREMENT)
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            session
                .run(
                    move |m| sink_seen.lock().unwrap().push(m.heart_rate),
                    task_cancel,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // The frame before and after the corrupt one both arrive.
        assert_eq!(*seen.lock().unwrap(), vec![60, 62]);
    }

    #[tokio::test]
    async fn test_cancel_unsubscribes_before_disconnecting() {
        let adapter = ready_adapter();
        adapter.queue_notification(&[0x00, 60]);

        let session = NotificationSession::open(adapter.clone(), device(), HEART_RATE_MEASUREMENT)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { session.run(|_| {}, task_cancel).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let events = adapter.events();
        let unsubscribes = events
            .iter()
            .filter(|e| **e == MockEvent::Unsubscribe)
            .count();
        let disconnects = events
            .iter()
            .filter(|e| **e == MockEvent::Disconnect)
            .count();
        assert_eq!(unsubscribes, 1);
        assert_eq!(disconnects, 1);

        let unsubscribe_at = events
            .iter()
            .position(|e| *e == MockEvent::Unsubscribe)
            .unwrap();
        let disconnect_at = events
            .iter()
            .position(|e| *e == MockEvent::Disconnect)
            .unwrap();
        assert!(unsubscribe_at < disconnect_at);
    }

    #[tokio::test]
    async fn test_stream_end_is_link_lost() {
        let adapter = ready_adapter();

        let session = NotificationSession::open(adapter.clone(), device(), HEART_RATE_MEASUREMENT)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { session.run(|_| {}, task_cancel).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        adapter.close_notifications();
        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(
            err,
            Error::ConnectionFailed {
                reason: ConnectionFailureReason::LinkLost,
                ..
            }
        ));
        // Teardown still runs on the failure path.
        let events = adapter.events();
        assert!(events.contains(&MockEvent::Unsubscribe));
        assert!(events.contains(&MockEvent::Disconnect));
    }
}
