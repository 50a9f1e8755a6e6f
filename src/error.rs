/**
 * ============================================================================
 * ERROR MODULE
 * ============================================================================
 * 
 * PURPOSE: Crate-wide error type for the recorder daemon
 * 
 * CATEGORIES:
 * - Camera: unrecoverable device errors, stop the engine loop
 * - Sink/Muxer: downstream write failures, end only the current segment
 * - Telemetry: malformed BLE payloads, reject the single write
 * - Io/Json: persistence and storage failures
 * 
 * ============================================================================
 */

use crate::recording::sink::SinkError;
use crate::telemetry::TelemetryError;

// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Camera open/configure/capture failure
    #[error("Camera error: {0}")]
    Camera(String),

    // Failed to start or talk to the muxing process
    #[error("Muxer error: {0}")]
    Muxer(String),

    // Records directory or segment file housekeeping failed
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Segment sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Recording already running")]
    AlreadyRunning,

    #[error("Thread panicked: {0}")]
    ThreadPanicked(&'static str),

    // Privileged OS action (reboot, shutdown, clock set) failed
    #[error("System action failed: {0}")]
    SystemAction(String),

    #[error("{0}")]
    Other(String),
}
