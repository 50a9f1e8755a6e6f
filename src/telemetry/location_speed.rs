/**
 * ============================================================================
 * LOCATION AND SPEED RECORD
 * ============================================================================
 * 
 * WIRE FORMAT:
 * - u16 LE flags at offset 0
 * - Optional fields follow in bit order 0..6, each present only when its
 *   flag bit is set:
 * 
 * | bit | field               | width | encoding                       |
 * |-----|---------------------|-------|--------------------------------|
 * | 0   | instantaneous speed | 2     | u16, 1e-2 m/s                  |
 * | 1   | total distance      | 3     | u24, 1e-1 m                    |
 * | 2   | location            | 8     | 2 x i32, 1e-7 deg (lat, lon)   |
 * | 3   | elevation           | 3     | i24, 1e-2 m                    |
 * | 4   | heading             | 2     | u16, 1e-2 deg                  |
 * | 5   | rolling time        | 1     | raw u8                         |
 * | 6   | UTC time            | 7     | Date Time record               |
 * 
 * - Flag-only fields: position status (bits 7-8), speed/distance format
 *   (bit 9), elevation source (bits 10-11), heading source (bit 12)
 * 
 * ============================================================================
 */

use crate::telemetry::TelemetryError;
use crate::telemetry::datetime::{GATT_DATETIME_LEN, GattDateTime};
use std::fmt;

const FLAGS_LEN: usize = 2;

// Speed in m/s to km/h
const MPS_TO_KMPH: f64 = 3.6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PositionStatus {
    #[default]
    NoPosition,
    PositionOk,
    Estimated,
    LastKnown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpeedDistanceFormat {
    #[default]
    TwoDimensional,
    ThreeDimensional,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ElevationSource {
    #[default]
    Positioning,
    BarometricPressure,
    DatabaseService,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeadingSource {
    #[default]
    Movement,
    MagneticCompass,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSpeed {
    pub flags: u16,

    // m/s
    pub instantaneous_speed: Option<f64>,

    // meters
    pub total_distance: Option<f64>,

    // decimal degrees
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    // meters
    pub elevation: Option<f64>,

    // degrees
    pub heading: Option<f64>,

    pub rolling_time: Option<u8>,
    pub utc_time: Option<GattDateTime>,

    pub position_status: PositionStatus,
    pub speed_distance_format: SpeedDistanceFormat,
    pub elevation_source: ElevationSource,
    pub heading_source: HeadingSource,
}

impl LocationSpeed {
    pub fn is_speed_present(&self) -> bool {
        self.flags & 0x0001 != 0
    }

    pub fn is_location_present(&self) -> bool {
        (self.flags >> 2) & 0x1 == 1
    }

    pub fn is_heading_present(&self) -> bool {
        (self.flags >> 4) & 0x1 == 1
    }
}

impl fmt::Display for LocationSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();

        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            parts.push(format!("Latitude: {:.7} DD, Longitude: {:.7} DD", lat, lon));
        }
        if let Some(speed) = self.instantaneous_speed {
            parts.push(format!("Speed: {:.1} km/h", speed * MPS_TO_KMPH));
        }
        if let Some(heading) = self.heading {
            parts.push(format!("Heading: {:.2} D", heading));
        }

        write!(f, "{}", parts.join(", "))
    }
}

// =============================================================================
// Field Layout
// =============================================================================

// One positional field: flag bit, byte width, decoder for exactly `width` bytes
struct FieldLayout {
    bit: u8,
    width: usize,
    decode: fn(&mut LocationSpeed, &[u8]),
}

const FIELD_LAYOUT: [FieldLayout; 7] = [
    FieldLayout { bit: 0, width: 2, decode: decode_speed },
    FieldLayout { bit: 1, width: 3, decode: decode_total_distance },
    FieldLayout { bit: 2, width: 8, decode: decode_location },
    FieldLayout { bit: 3, width: 3, decode: decode_elevation },
    FieldLayout { bit: 4, width: 2, decode: decode_heading },
    FieldLayout { bit: 5, width: 1, decode: decode_rolling_time },
    FieldLayout { bit: 6, width: GATT_DATETIME_LEN, decode: decode_utc_time },
];

fn read_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_u24(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], 0])
}

// Sign-extend from bit 23
fn read_i24(b: &[u8]) -> i32 {
    (read_u24(b) << 8) as i32 >> 8
}

fn read_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn decode_speed(out: &mut LocationSpeed, b: &[u8]) {
    out.instantaneous_speed = Some(read_u16(b) as f64 * 1e-2);
}

fn decode_total_distance(out: &mut LocationSpeed, b: &[u8]) {
    out.total_distance = Some(read_u24(b) as f64 * 1e-1);
}

fn decode_location(out: &mut LocationSpeed, b: &[u8]) {
    out.latitude = Some(read_i32(&b[0..4]) as f64 * 1e-7);
    out.longitude = Some(read_i32(&b[4..8]) as f64 * 1e-7);
}

fn decode_elevation(out: &mut LocationSpeed, b: &[u8]) {
    out.elevation = Some(read_i24(b) as f64 * 1e-2);
}

fn decode_heading(out: &mut LocationSpeed, b: &[u8]) {
    out.heading = Some(read_u16(b) as f64 * 1e-2);
}

fn decode_rolling_time(out: &mut LocationSpeed, b: &[u8]) {
    out.rolling_time = Some(b[0]);
}

fn decode_utc_time(out: &mut LocationSpeed, b: &[u8]) {
    // Width was checked against the layout table before dispatch
    out.utc_time = GattDateTime::from_prefix(b).ok();
}

fn is_set(flags: u16, bit: u8) -> bool {
    flags & (1 << bit) != 0
}

// Total bytes implied by the flag word, including the flags themselves
fn required_len(flags: u16) -> usize {
    FLAGS_LEN
        + FIELD_LAYOUT
            .iter()
            .filter(|field| is_set(flags, field.bit))
            .map(|field| field.width)
            .sum::<usize>()
}

// =============================================================================
// Decoder
// =============================================================================

pub fn decode_location_speed(bytes: &[u8]) -> Result<LocationSpeed, TelemetryError> {
    if bytes.len() < FLAGS_LEN {
        return Err(TelemetryError::Truncated {
            record: "Location and Speed",
            needed: FLAGS_LEN,
            actual: bytes.len(),
        });
    }

    let flags = read_u16(bytes);
    let needed = required_len(flags);
    if bytes.len() < needed {
        return Err(TelemetryError::Truncated {
            record: "Location and Speed",
            needed,
            actual: bytes.len(),
        });
    }

    let mut record = LocationSpeed {
        flags,
        ..Default::default()
    };

    let mut offset = FLAGS_LEN;
    for field in &FIELD_LAYOUT {
        if is_set(flags, field.bit) {
            (field.decode)(&mut record, &bytes[offset..offset + field.width]);
            offset += field.width;
        }
    }

    record.position_status = match (flags >> 7) & 0x3 {
        0 => PositionStatus::NoPosition,
        1 => PositionStatus::PositionOk,
        2 => PositionStatus::Estimated,
        _ => PositionStatus::LastKnown,
    };
    record.speed_distance_format = match (flags >> 9) & 0x1 {
        0 => SpeedDistanceFormat::TwoDimensional,
        _ => SpeedDistanceFormat::ThreeDimensional,
    };
    record.elevation_source = match (flags >> 10) & 0x3 {
        0 => ElevationSource::Positioning,
        1 => ElevationSource::BarometricPressure,
        2 => ElevationSource::DatabaseService,
        _ => ElevationSource::Other,
    };
    record.heading_source = match (flags >> 12) & 0x1 {
        0 => HeadingSource::Movement,
        _ => HeadingSource::MagneticCompass,
    };

    Ok(record)
}
