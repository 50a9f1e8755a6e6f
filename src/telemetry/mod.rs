/**
 * ============================================================================
 * TELEMETRY CODEC MODULE
 * ============================================================================
 * 
 * PURPOSE: Binary codec for records exchanged over the BLE transport
 * 
 * SUBMODULES:
 * - datetime: Bluetooth SIG Date Time record (7 bytes, fixed width)
 * - location_speed: Bluetooth SIG Location and Speed record (flag-driven,
 *   variable length)
 * 
 * Both decoders are pure functions over byte slices. A malformed payload
 * rejects only the write that carried it.
 * 
 * ============================================================================
 */

pub mod datetime;
pub mod location_speed;

pub use datetime::{GattDateTime, GATT_DATETIME_LEN, decode_gatt_datetime, encode_gatt_datetime};
pub use location_speed::{
    ElevationSource, HeadingSource, LocationSpeed, PositionStatus, SpeedDistanceFormat,
    decode_location_speed,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    // Payload shorter than the width implied by its layout/flags
    #[error("{record} payload truncated: need {needed} bytes, got {actual}")]
    Truncated {
        record: &'static str,
        needed: usize,
        actual: usize,
    },

    // Fixed-width record with the wrong size
    #[error("{record} payload must be {expected} bytes, got {actual}")]
    UnexpectedLength {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    // Reserved bits set in a control byte
    #[error("Invalid control byte {0:#04x}")]
    InvalidControlByte(u8),
}
