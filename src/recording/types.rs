/**
 * ============================================================================
 * RECORDING TYPES MODULE
 * ============================================================================
 * 
 * PURPOSE: Data structures for the loop recorder
 * 
 * TYPES:
 * - RecorderConfig: Daemon configuration (JSON, every field defaulted)
 * - SinkConfig: Seal threshold and queue capacity of a SegmentSink
 * - Resolution: Capture frame size
 * - PersistedState: Ring-buffer position, durable across restarts
 * - Segment: One bounded-duration video file
 * - ThermalMode: Normal or throttled capture
 * 
 * ============================================================================
 */

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Frame size in pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// Configuration for the recorder daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    // Directory holding segments, state file and snapshot
    #[serde(default = "default_records_location")]
    pub records_location: PathBuf,

    // Target duration of each segment (seconds)
    #[serde(default = "default_segment_duration")]
    pub segment_duration_seconds: u64,

    // Overlay refresh and command polling period (milliseconds)
    #[serde(default = "default_tick")]
    pub tick_millis: u64,

    // Disk usage (percent) at which the ring size is fixed
    #[serde(default = "default_capacity_threshold")]
    pub capacity_threshold_percent: u8,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    #[serde(default = "default_high_resolution")]
    pub high_resolution: Resolution,

    // Used while thermally throttled
    #[serde(default = "default_low_resolution")]
    pub low_resolution: Resolution,

    // H.264 quality (lower = better)
    #[serde(default = "default_quality")]
    pub quality: u8,

    #[serde(default = "default_text_size")]
    pub overlay_text_size: u32,

    // Celsius
    #[serde(default = "default_thermal_high")]
    pub thermal_high_celsius: f32,

    #[serde(default = "default_thermal_normal")]
    pub thermal_normal_celsius: f32,

    // Bytes accumulated before a buffer is sealed
    #[serde(default = "default_seal_threshold")]
    pub sink_seal_threshold_bytes: usize,

    // Sealed buffers in flight before append blocks
    #[serde(default = "default_queue_capacity")]
    pub sink_queue_capacity: usize,

    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    #[serde(default = "default_state_file")]
    pub state_file: String,

    #[serde(default = "default_camera_device")]
    pub camera_device: String,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    // Bounded queue feeding the control router
    #[serde(default = "default_control_queue_capacity")]
    pub control_queue_capacity: usize,

    // Daily log files older than this many days are deleted at startup
    #[serde(default = "default_keep_logs_days")]
    pub keep_logs_days: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            records_location: default_records_location(),
            segment_duration_seconds: default_segment_duration(),
            tick_millis: default_tick(),
            capacity_threshold_percent: default_capacity_threshold(),
            framerate: default_framerate(),
            high_resolution: default_high_resolution(),
            low_resolution: default_low_resolution(),
            quality: default_quality(),
            overlay_text_size: default_text_size(),
            thermal_high_celsius: default_thermal_high(),
            thermal_normal_celsius: default_thermal_normal(),
            sink_seal_threshold_bytes: default_seal_threshold(),
            sink_queue_capacity: default_queue_capacity(),
            snapshot_file: default_snapshot_file(),
            state_file: default_state_file(),
            camera_device: default_camera_device(),
            ffmpeg_path: default_ffmpeg_path(),
            control_queue_capacity: default_control_queue_capacity(),
            keep_logs_days: default_keep_logs_days(),
        }
    }
}

fn default_records_location() -> PathBuf {
    PathBuf::from("./records")
}

fn default_segment_duration() -> u64 {
    60
}

fn default_tick() -> u64 {
    1000
}

fn default_capacity_threshold() -> u8 {
    70
}

fn default_framerate() -> u32 {
    30
}

fn default_high_resolution() -> Resolution {
    Resolution::new(1920, 1080)
}

fn default_low_resolution() -> Resolution {
    Resolution::new(1280, 720)
}

fn default_quality() -> u8 {
    23
}

fn default_text_size() -> u32 {
    20
}

fn default_thermal_high() -> f32 {
    75.0
}

fn default_thermal_normal() -> f32 {
    60.0
}

fn default_seal_threshold() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_queue_capacity() -> usize {
    50
}

fn default_snapshot_file() -> String {
    "live_snap.jpg".to_string()
}

fn default_state_file() -> String {
    "cfg.json".to_string()
}

fn default_camera_device() -> String {
    "/dev/video0".to_string()
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_control_queue_capacity() -> usize {
    16
}

fn default_keep_logs_days() -> u32 {
    2
}

impl RecorderConfig {
    // Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_duration_seconds == 0 {
            return Err("segment_duration_seconds must be greater than 0".to_string());
        }
        if self.tick_millis == 0 {
            return Err("tick_millis must be greater than 0".to_string());
        }
        if self.framerate == 0 {
            return Err("framerate must be greater than 0".to_string());
        }
        if !(1..=100).contains(&self.capacity_threshold_percent) {
            return Err(format!(
                "capacity_threshold_percent must be in 1..=100, got {}",
                self.capacity_threshold_percent
            ));
        }
        if self.thermal_normal_celsius >= self.thermal_high_celsius {
            return Err(format!(
                "thermal_normal_celsius ({}) must be below thermal_high_celsius ({})",
                self.thermal_normal_celsius, self.thermal_high_celsius
            ));
        }
        if self.sink_seal_threshold_bytes == 0 {
            return Err("sink_seal_threshold_bytes must be greater than 0".to_string());
        }
        if self.sink_queue_capacity == 0 {
            return Err("sink_queue_capacity must be greater than 0".to_string());
        }
        if self.control_queue_capacity == 0 {
            return Err("control_queue_capacity must be greater than 0".to_string());
        }
        for (name, res) in [("high_resolution", self.high_resolution), ("low_resolution", self.low_resolution)] {
            // H.264 4:2:0 needs even dimensions
            if res.width == 0 || res.height == 0 || res.width % 2 != 0 || res.height % 2 != 0 {
                return Err(format!("{} must have non-zero even dimensions, got {}", name, res));
            }
        }
        Ok(())
    }

    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_seconds)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn state_path(&self) -> PathBuf {
        self.records_location.join(&self.state_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.records_location.join(&self.snapshot_file)
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            seal_threshold: self.sink_seal_threshold_bytes,
            queue_capacity: self.sink_queue_capacity,
        }
    }
}

// Buffering limits of a SegmentSink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    pub seal_threshold: usize,
    pub queue_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            seal_threshold: default_seal_threshold(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// =============================================================================
// Persisted State
// =============================================================================

// Result of a capacity check at a segment boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityEvent {
    // Ring size fixed at this many segments
    Discovered(u64),
    Wrapped,
}

/// Ring-buffer position written before every segment.
///
/// Once `max_files` is non-zero it is never recomputed for the life of the
/// file; it is only consulted for wraparound.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    // Degrees, one of 0/90/180/270
    #[serde(default)]
    pub rotation: u16,

    #[serde(rename = "cindex", default)]
    pub current_index: u64,

    // 0 until capacity is discovered
    #[serde(rename = "max-files", default)]
    pub max_files: u64,

    #[serde(rename = "n-loops", default)]
    pub wrap_count: u64,
}

impl PersistedState {
    /// Apply the capacity policy for the segment about to start.
    ///
    /// `usage_percent` of `None` means the disk probe failed; discovery is
    /// skipped for this segment but wraparound on a known size still applies.
    pub fn apply_capacity(&mut self, usage_percent: Option<u8>, threshold_percent: u8) -> Option<CapacityEvent> {
        if self.max_files == 0 {
            let usage = usage_percent?;
            if usage >= threshold_percent {
                self.max_files = self.current_index;
                self.current_index = 0;
                self.wrap_count += 1;
                return Some(CapacityEvent::Discovered(self.max_files));
            }
            return None;
        }

        if self.current_index >= self.max_files {
            self.current_index = 0;
            self.wrap_count += 1;
            return Some(CapacityEvent::Wrapped);
        }

        None
    }

    /// Snap `rotation` to 0/90/180/270, rounding down within a quadrant.
    ///
    /// Returns true when the stored value had to change.
    pub fn normalize_rotation(&mut self) -> bool {
        let normalized = self.rotation % 360 / 90 * 90;
        let changed = normalized != self.rotation;
        self.rotation = normalized;
        changed
    }

    // Advance orientation by 90 degrees
    pub fn rotate(&mut self) -> u16 {
        self.rotation = (self.rotation + 90) % 360;
        self.rotation
    }
}

// =============================================================================
// Segment
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: u64,
    pub path: PathBuf,
    pub start_time: DateTime<Local>,
    pub resolution: Resolution,
    pub target_duration: Duration,
}

impl Segment {
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermalMode {
    #[default]
    Normal,
    Throttled,
}

impl fmt::Display for ThermalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThermalMode::Normal => write!(f, "NORMAL"),
            ThermalMode::Throttled => write!(f, "THROTTLED"),
        }
    }
}
