use std::time::Duration;

use crate::errors::DecodeError;

const FLAG_RATE_U16: u8 = 1 << 0;
const FLAG_CONTACT_DETECTED: u8 = 1 << 1;
const FLAG_CONTACT_SUPPORTED: u8 = 1 << 2;
const FLAG_ENERGY_EXPENDED: u8 = 1 << 3;
const FLAG_RR_INTERVALS: u8 = 1 << 4;

/// A decoded Heart Rate Measurement (0x2A37) notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    pub bpm: u16,
    /// `None` when the sensor doesn't report contact status
    pub sensor_contact: Option<bool>,
    /// Kilojoules
    pub energy_expended: Option<u16>,
    pub rr_intervals: Vec<Duration>,
}

/// Decodes a raw measurement payload.
///
/// Only the flags byte and the heart rate value are mandatory. Optional trailing
/// fields that got cut short are ignored instead of failing the whole packet.
pub fn parse_hrm(payload: &[u8]) -> Result<HeartRateMeasurement, DecodeError> {
    let (&flags, rest) = payload.split_first().ok_or(DecodeError::Empty)?;

    let (bpm, mut rest) = if flags & FLAG_RATE_U16 != 0 {
        match rest {
            [lo, hi, rest @ ..] => (u16::from_le_bytes([*lo, *hi]), rest),
            _ => {
                return Err(DecodeError::Truncated {
                    needed: 3,
                    actual: payload.len(),
                })
            }
        }
    } else {
        match rest {
            [value, rest @ ..] => (u16::from(*value), rest),
            _ => {
                return Err(DecodeError::Truncated {
                    needed: 2,
                    actual: payload.len(),
                })
            }
        }
    };

    let sensor_contact =
        (flags & FLAG_CONTACT_SUPPORTED != 0).then_some(flags & FLAG_CONTACT_DETECTED != 0);

    let mut energy_expended = None;
    if flags & FLAG_ENERGY_EXPENDED != 0 {
        if let [lo, hi, remaining @ ..] = rest {
            energy_expended = Some(u16::from_le_bytes([*lo, *hi]));
            rest = remaining;
        } else {
            rest = &[];
        }
    }

    let rr_intervals = if flags & FLAG_RR_INTERVALS != 0 {
        rest.chunks_exact(2)
            .map(|rr| u16::from_le_bytes([rr[0], rr[1]]))
            // RR intervals are sent in units of 1/1024 seconds
            .map(|rr| Duration::from_secs_f64(f64::from(rr) / 1024.0))
            .collect()
    } else {
        Vec::new()
    };

    Ok(HeartRateMeasurement {
        bpm,
        sensor_contact,
        energy_expended,
        rr_intervals,
    })
}
