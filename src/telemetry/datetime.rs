/**
 * ============================================================================
 * GATT DATE TIME
 * ============================================================================
 * 
 * WIRE FORMAT (7 bytes):
 * | offset | field   | type     |
 * |--------|---------|----------|
 * | 0      | year    | u16 LE   |
 * | 2      | month   | u8       |
 * | 3      | day     | u8       |
 * | 4      | hours   | u8       |
 * | 5      | minutes | u8       |
 * | 6      | seconds | u8       |
 * 
 * Zero month/day means "unknown" on the wire, so no range checks are done
 * while decoding. Range checks happen in to_naive_datetime().
 * 
 * ============================================================================
 */

use crate::telemetry::TelemetryError;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

pub const GATT_DATETIME_LEN: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GattDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl GattDateTime {
    // Decode from the first 7 bytes of a slice (used inside larger records)
    pub(crate) fn from_prefix(bytes: &[u8]) -> Result<Self, TelemetryError> {
        if bytes.len() < GATT_DATETIME_LEN {
            return Err(TelemetryError::Truncated {
                record: "Date Time",
                needed: GATT_DATETIME_LEN,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            year: u16::from_le_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            hours: bytes[4],
            minutes: bytes[5],
            seconds: bytes[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; GATT_DATETIME_LEN] {
        let year = self.year.to_le_bytes();
        [
            year[0],
            year[1],
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.seconds,
        ]
    }

    /// Calendar time for clock-set requests.
    ///
    /// Returns `None` when any field is out of range, including the GATT
    /// "unknown" zero month/day.
    pub fn to_naive_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hours as u32, self.minutes as u32, self.seconds as u32)
    }
}

impl fmt::Display for GattDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hours, self.minutes, self.seconds
        )
    }
}

// Decode a standalone Date Time characteristic value (exactly 7 bytes)
pub fn decode_gatt_datetime(bytes: &[u8]) -> Result<GattDateTime, TelemetryError> {
    if bytes.len() != GATT_DATETIME_LEN {
        return Err(TelemetryError::UnexpectedLength {
            record: "Date Time",
            expected: GATT_DATETIME_LEN,
            actual: bytes.len(),
        });
    }
    GattDateTime::from_prefix(bytes)
}

// Encode a Date Time record, exact inverse of decode_gatt_datetime
pub fn encode_gatt_datetime(value: &GattDateTime) -> [u8; GATT_DATETIME_LEN] {
    value.to_bytes()
}
