//! Platform-agnostic types for BLE Heart Rate Service data.
//!
//! This crate defines the decoded form of the standard Heart Rate
//! Measurement characteristic (0x2A37) along with the decoder for its
//! binary frame format, and the UUIDs of the Heart Rate Service.
//!
//! It deliberately has no BLE dependency: everything here is pure data
//! and pure parsing, so it can be tested without hardware and reused by
//! any transport layer.
//!
//! # Quick Start
//!
//! ```
//! use pulse_types::HeartRateMeasurement;
//!
//! // flags = 0x00: 8-bit heart rate, no energy field, no RR intervals
//! let m = HeartRateMeasurement::from_bytes(&[0x00, 64]).unwrap();
//! assert_eq!(m.heart_rate, 64);
//! assert_eq!(m.energy_expended, None);
//! assert!(m.rr_intervals.is_empty());
//! ```

pub mod error;
pub mod measurement;
pub mod uuid;

pub use error::DecodeError;
pub use measurement::HeartRateMeasurement;
