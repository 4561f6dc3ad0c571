//! Device discovery and connection establishment.
//!
//! [`DiscoveryConnector`] turns a target service UUID into a connected,
//! service-resolved device. It walks an explicit state machine:
//!
//! ```text
//! Idle -> Scanning -> DeviceFound -> Connecting -> Connected
//!      -> ServicesResolving -> Ready
//! ```
//!
//! with `Failed` reachable from any state. Failures are terminal for one
//! `acquire` call; callers wanting an outer retry policy re-invoke
//! [`DiscoveryConnector::acquire`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterClient, DeviceHandle};
use crate::error::{ConnectionFailureReason, Error, Result};

/// Discovery retry count meaning "scan until a device appears".
pub const UNLIMITED_RETRIES: i32 = -1;

/// Options controlling discovery and connection behavior.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Number of discovery scans to attempt when the device cache is empty.
    /// [`UNLIMITED_RETRIES`] (-1) scans forever; 0 fails immediately when
    /// the cache has no match.
    pub discovery_retries: i32,
    /// How long each discovery scan runs.
    pub discovery_window: Duration,
    /// Connection attempts against a found device before giving up.
    pub connect_attempts: u32,
    /// Poll interval while waiting for GATT service resolution.
    pub resolve_poll: Duration,
    /// Upper bound on the service-resolution wait. Devices that stay
    /// connected but never resolve would otherwise stall the caller
    /// forever.
    pub resolve_timeout: Duration,
    /// When set, only a device with this exact identifier is accepted;
    /// other advertisers of the target service are ignored.
    pub device_filter: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            discovery_retries: 2,
            discovery_window: Duration::from_secs(5),
            connect_attempts: 2,
            resolve_poll: Duration::from_millis(500),
            resolve_timeout: Duration::from_secs(30),
            device_filter: None,
        }
    }
}

impl ConnectOptions {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the discovery retry budget (-1 for unlimited).
    #[must_use]
    pub fn discovery_retries(mut self, retries: i32) -> Self {
        self.discovery_retries = retries;
        self
    }

    /// Set the discovery window duration.
    #[must_use]
    pub fn discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// Set the connection attempt budget.
    #[must_use]
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    /// Set the service-resolution poll interval.
    #[must_use]
    pub fn resolve_poll(mut self, interval: Duration) -> Self {
        self.resolve_poll = interval;
        self
    }

    /// Set the overall service-resolution timeout.
    #[must_use]
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Restrict discovery to a single device identifier.
    #[must_use]
    pub fn device_filter(mut self, id: impl Into<String>) -> Self {
        self.device_filter = Some(id.into());
        self
    }
}

/// States of the acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No acquisition in progress.
    Idle,
    /// Actively scanning for a device advertising the target service.
    Scanning,
    /// A matching device was located.
    DeviceFound,
    /// A connection attempt is in flight.
    Connecting,
    /// The link is up; services not yet resolved.
    Connected,
    /// Waiting for GATT service resolution.
    ServicesResolving,
    /// Connected and service-resolved; the device handle was returned.
    Ready,
    /// The acquisition failed terminally.
    Failed,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::DeviceFound => "device-found",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ServicesResolving => "services-resolving",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Locates a device advertising a target service UUID and establishes a
/// connected, service-resolved session, retrying within configured bounds.
pub struct DiscoveryConnector {
    adapter: Arc<dyn AdapterClient>,
    options: ConnectOptions,
    state: ConnectorState,
}

impl DiscoveryConnector {
    /// Create a connector over an adapter with the given options.
    pub fn new(adapter: Arc<dyn AdapterClient>, options: ConnectOptions) -> Self {
        Self {
            adapter,
            options,
            state: ConnectorState::Idle,
        }
    }

    /// The state the connector is currently in.
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    fn transition(&mut self, next: ConnectorState) {
        debug!(from = %self.state, to = %next, "connector state change");
        self.state = next;
    }

    /// Acquire a connected, service-resolved device advertising `service`.
    ///
    /// Checks the adapter's device cache first; scans only when the cache
    /// has no match and retries remain. When several devices advertise the
    /// service, the one with the lexicographically smallest identifier
    /// wins, so repeated runs pick the same peripheral.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceNotFound`] when the discovery budget is exhausted
    ///   with no match.
    /// - [`Error::ConnectionFailed`] when connection attempts are
    ///   exhausted, the device drops the link during service resolution,
    ///   or resolution exceeds its timeout.
    #[tracing::instrument(level = "info", skip(self), fields(service = %service))]
    pub async fn acquire(&mut self, service: Uuid) -> Result<DeviceHandle> {
        let device = self.locate(service).await?;
        self.transition(ConnectorState::DeviceFound);
        info!(device = %device, "device found");

        if let Err(e) = self.establish(&device).await {
            self.transition(ConnectorState::Failed);
            return Err(e);
        }

        if let Err(e) = self.wait_resolved(&device).await {
            self.transition(ConnectorState::Failed);
            return Err(e);
        }

        self.transition(ConnectorState::Ready);
        info!(device = %device, "services resolved, device ready");
        Ok(device)
    }

    /// Step 1/2 of the state machine: cache lookup, then scan-and-recheck
    /// until a match appears or the retry budget runs out.
    async fn locate(&mut self, service: Uuid) -> Result<DeviceHandle> {
        let mut retries = self.options.discovery_retries;
        let mut scans: u32 = 0;

        loop {
            let mut matches = self.adapter.devices_with_service(service).await?;
            if let Some(wanted) = &self.options.device_filter {
                matches.retain(|d| &d.id == wanted);
            }
            if !matches.is_empty() {
                // Deterministic tie-break when several devices advertise
                // the service.
                matches.sort_by(|a, b| a.id.cmp(&b.id));
                return Ok(matches.swap_remove(0));
            }

            if retries == 0 {
                warn!(%service, scans, "discovery budget exhausted");
                self.transition(ConnectorState::Failed);
                return Err(Error::no_match(service.to_string(), scans));
            }
            if retries > 0 {
                retries -= 1;
            }

            self.transition(ConnectorState::Scanning);
            debug!(window = ?self.options.discovery_window, "starting discovery scan");
            self.adapter.start_scan().await?;
            sleep(self.options.discovery_window).await;
            self.adapter.stop_scan().await?;
            scans += 1;
        }
    }

    /// Step 3: connect with a bounded attempt budget, dropping the
    /// half-open link between failed attempts (peripherals can get stuck
    /// mid-handshake).
    async fn establish(&mut self, device: &DeviceHandle) -> Result<()> {
        let attempts = self.options.connect_attempts.max(1);

        for attempt in 1..=attempts {
            self.transition(ConnectorState::Connecting);
            match self.adapter.connect(device).await {
                Ok(()) => {
                    self.transition(ConnectorState::Connected);
                    info!(device = %device, attempt, "connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(device = %device, attempt, attempts, error = %e, "connect failed");
                    if attempt < attempts {
                        self.adapter.disconnect(device).await;
                    }
                }
            }
        }

        Err(Error::connection_failed(
            Some(device.id.clone()),
            ConnectionFailureReason::AttemptsExhausted { attempts },
        ))
    }

    /// Step 4: poll for service resolution while the link holds, bounded
    /// by the configured timeout.
    async fn wait_resolved(&mut self, device: &DeviceHandle) -> Result<()> {
        self.transition(ConnectorState::ServicesResolving);
        let deadline = Instant::now() + self.options.resolve_timeout;

        loop {
            if self.adapter.is_services_resolved(device).await? {
                return Ok(());
            }
            if !self.adapter.is_connected(device).await? {
                warn!(device = %device, "link lost while resolving services");
                return Err(Error::connection_failed(
                    Some(device.id.clone()),
                    ConnectionFailureReason::LinkLost,
                ));
            }
            if Instant::now() >= deadline {
                warn!(device = %device, timeout = ?self.options.resolve_timeout,
                      "service resolution timed out");
                return Err(Error::connection_failed(
                    Some(device.id.clone()),
                    ConnectionFailureReason::ResolveTimeout {
                        duration: self.options.resolve_timeout,
                    },
                ));
            }
            sleep(self.options.resolve_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceNotFoundReason;
    use crate::mock::{MockAdapter, MockEvent};
    use pulse_types::uuid::HEART_RATE_SERVICE;

    fn fast_options() -> ConnectOptions {
        ConnectOptions::default()
            .discovery_window(Duration::from_millis(5))
            .resolve_poll(Duration::from_millis(5))
            .resolve_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_cached_device_skips_scanning() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().discovery_retries(2));
        let device = connector.acquire(HEART_RATE_SERVICE).await.unwrap();

        assert_eq!(device.id, "AA:00");
        assert_eq!(connector.state(), ConnectorState::Ready);
        assert_eq!(adapter.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_retries_fails_without_scanning() {
        let adapter = Arc::new(MockAdapter::new());

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().discovery_retries(0));
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(
            err,
            Error::DeviceNotFound(DeviceNotFoundReason::NoMatch { scans: 0, .. })
        ));
        assert_eq!(connector.state(), ConnectorState::Failed);
        assert_eq!(adapter.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_device_appears_after_scans() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.hide_until_scans(2);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().discovery_retries(3));
        let device = connector.acquire(HEART_RATE_SERVICE).await.unwrap();

        assert_eq!(device.id, "AA:00");
        assert_eq!(adapter.scan_count(), 2);
        // Every scan is started and stopped as a pair.
        let events = adapter.events();
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == MockEvent::StartScan)
                .count(),
            2
        );
        assert_eq!(
            events.iter().filter(|e| **e == MockEvent::StopScan).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.hide_until_scans(5);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().discovery_retries(2));
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(
            err,
            Error::DeviceNotFound(DeviceNotFoundReason::NoMatch { scans: 2, .. })
        ));
        assert_eq!(adapter.scan_count(), 2);
    }

    #[tokio::test]
    async fn test_service_filter() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[uuid::Uuid::new_v4()]);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().discovery_retries(0));
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_tie_break_is_lexicographic() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("CC:22", &[HEART_RATE_SERVICE]);
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.add_device("BB:11", &[HEART_RATE_SERVICE]);

        let mut connector = DiscoveryConnector::new(adapter.clone(), fast_options());
        let device = connector.acquire(HEART_RATE_SERVICE).await.unwrap();

        assert_eq!(device.id, "AA:00");
    }

    #[tokio::test]
    async fn test_device_filter_overrides_tie_break() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.add_device("BB:11", &[HEART_RATE_SERVICE]);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().device_filter("BB:11"));
        let device = connector.acquire(HEART_RATE_SERVICE).await.unwrap();

        assert_eq!(device.id, "BB:11");
    }

    #[tokio::test]
    async fn test_device_filter_with_no_match_fails() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);

        let mut connector = DiscoveryConnector::new(
            adapter.clone(),
            fast_options()
                .discovery_retries(0)
                .device_filter("FF:FF"),
        );
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_connect_retry_with_disconnect_between_attempts() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.fail_connects(1);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().connect_attempts(2));
        let device = connector.acquire(HEART_RATE_SERVICE).await.unwrap();

        assert_eq!(device.id, "AA:00");
        // The failed attempt is followed by a disconnect before the retry.
        let events = adapter.events();
        let connects: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == MockEvent::Connect)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(connects.len(), 2);
        assert_eq!(events[connects[0] + 1], MockEvent::Disconnect);
    }

    #[tokio::test]
    async fn test_connect_attempts_exhausted() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.fail_connects(5);

        let mut connector =
            DiscoveryConnector::new(adapter.clone(), fast_options().connect_attempts(2));
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ConnectionFailed {
                reason: ConnectionFailureReason::AttemptsExhausted { attempts: 2 },
                ..
            }
        ));
        assert_eq!(connector.state(), ConnectorState::Failed);
    }

    #[tokio::test]
    async fn test_resolution_polls_until_resolved() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.resolve_after_polls(3);

        let mut connector = DiscoveryConnector::new(adapter.clone(), fast_options());
        let device = connector.acquire(HEART_RATE_SERVICE).await.unwrap();

        assert_eq!(device.id, "AA:00");
        assert_eq!(connector.state(), ConnectorState::Ready);
    }

    #[tokio::test]
    async fn test_link_lost_during_resolution() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.resolve_after_polls(u32::MAX);
        adapter.drop_link_after_polls(2);

        let mut connector = DiscoveryConnector::new(adapter.clone(), fast_options());
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ConnectionFailed {
                reason: ConnectionFailureReason::LinkLost,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resolution_timeout() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_device("AA:00", &[HEART_RATE_SERVICE]);
        adapter.resolve_after_polls(u32::MAX);

        let options = fast_options().resolve_timeout(Duration::from_millis(30));
        let mut connector = DiscoveryConnector::new(adapter.clone(), options);
        let err = connector.acquire(HEART_RATE_SERVICE).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ConnectionFailed {
                reason: ConnectionFailureReason::ResolveTimeout { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_default_options() {
        let options = ConnectOptions::default();
        assert_eq!(options.discovery_retries, 2);
        assert_eq!(options.discovery_window, Duration::from_secs(5));
        assert_eq!(options.connect_attempts, 2);
        assert_eq!(options.resolve_poll, Duration::from_millis(500));
    }
}
