//! Bluetooth UUIDs for the standard Heart Rate Service.

use uuid::{uuid, Uuid};

// --- Service UUIDs ---

/// Heart Rate Service (0x180D).
pub const HEART_RATE_SERVICE: Uuid = uuid!("0000180d-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs ---

/// Heart Rate Measurement characteristic (0x2A37), notify-only.
pub const HEART_RATE_MEASUREMENT: Uuid = uuid!("00002a37-0000-1000-8000-00805f9b34fb");

/// Body Sensor Location characteristic (0x2A38).
pub const BODY_SENSOR_LOCATION: Uuid = uuid!("00002a38-0000-1000-8000-00805f9b34fb");

/// Heart Rate Control Point characteristic (0x2A39), used to reset the
/// energy expended counter.
pub const HEART_RATE_CONTROL_POINT: Uuid = uuid!("00002a39-0000-1000-8000-00805f9b34fb");
