//! Decoded Heart Rate Measurement frames.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Flags bit 0: heart rate value is a 16-bit little-endian integer.
pub const FLAG_HR_UINT16: u8 = 0x01;

/// Flags bit 1: the device reports sensor contact status.
pub const FLAG_CONTACT_SUPPORTED: u8 = 0x02;

/// Flags bit 2: skin contact is currently detected.
pub const FLAG_CONTACT_DETECTED: u8 = 0x04;

/// Flags bit 3: a 16-bit energy expended field follows the heart rate.
pub const FLAG_ENERGY_EXPENDED: u8 = 0x08;

/// Minimum number of bytes in any valid frame (flags byte plus an 8-bit
/// heart rate value).
pub const MIN_FRAME_BYTES: usize = 2;

/// A decoded Heart Rate Measurement (characteristic 0x2A37) notification.
///
/// The heart rate is always present; the remaining fields exist only when
/// the source frame's flags byte declares them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute.
    pub heart_rate: u16,
    /// Cumulative energy expended in kilojoules since the last reset,
    /// if the device reports it.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub energy_expended: Option<u16>,
    /// Whether skin contact is detected, if the device reports contact
    /// status at all.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub sensor_contact: Option<bool>,
    /// RR intervals in milliseconds, in transmission order. Empty when the
    /// frame carries none.
    pub rr_intervals: Vec<f64>,
}

impl HeartRateMeasurement {
    /// Decode a measurement from a raw characteristic value.
    ///
    /// The frame layout is: flags byte, heart rate (u8, or u16 LE when
    /// flags bit 0 is set), optional energy expended (u16 LE when flags
    /// bit 3 is set), then zero or more 2-byte LE RR chunks. Each RR chunk
    /// is a duration in 1/1024-second ticks and is converted to
    /// milliseconds as `60000 * 1024 / chunk`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if the frame ends before a field
    /// the flags byte declares, or if an odd number of bytes remains for
    /// the RR field. Returns [`DecodeError::DivideByZero`] for a zero RR
    /// chunk, which has no defined duration.
    #[must_use = "decoding returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> DecodeResult<Self> {
        use bytes::Buf;

        let total = data.len();
        let mut buf = data;

        let need = |buf: &&[u8], n: usize| -> DecodeResult<()> {
            if buf.remaining() < n {
                Err(DecodeError::Truncated {
                    expected: total - buf.remaining() + n,
                    actual: total,
                })
            } else {
                Ok(())
            }
        };

        need(&buf, 1)?;
        let flags = buf.get_u8();

        let heart_rate = if flags & FLAG_HR_UINT16 != 0 {
            need(&buf, 2)?;
            buf.get_u16_le()
        } else {
            need(&buf, 1)?;
            u16::from(buf.get_u8())
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
            need(&buf, 2)?;
            Some(buf.get_u16_le())
        } else {
            None
        };

        let sensor_contact = if flags & FLAG_CONTACT_SUPPORTED != 0 {
            Some(flags & FLAG_CONTACT_DETECTED != 0)
        } else {
            None
        };

        if buf.remaining() % 2 != 0 {
            return Err(DecodeError::Truncated {
                expected: total + 1,
                actual: total,
            });
        }

        let mut rr_intervals = Vec::with_capacity(buf.remaining() / 2);
        while buf.has_remaining() {
            let chunk = buf.get_u16_le();
            if chunk == 0 {
                return Err(DecodeError::DivideByZero {
                    index: rr_intervals.len(),
                });
            }
            rr_intervals.push(60_000.0 * 1024.0 / f64::from(chunk));
        }

        Ok(HeartRateMeasurement {
            heart_rate,
            energy_expended,
            sensor_contact,
            rr_intervals,
        })
    }
}

impl fmt::Display for HeartRateMeasurement {
    /// Renders as `"<hr> bpm / <energy> Joules / RR [<ms>, ...]"`, with the
    /// energy segment omitted when the frame carried none.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bpm", self.heart_rate)?;
        if let Some(energy) = self.energy_expended {
            write!(f, " / {} Joules", energy)?;
        }
        write!(f, " / RR {:?}", self.rr_intervals)
    }
}
