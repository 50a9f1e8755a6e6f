/**
 * ============================================================================
 * LOOPCAM
 * ============================================================================
 * 
 * PURPOSE: Always-on loop recorder for a camera device
 * 
 * MODULES:
 * - recording: Segment loop, buffering sink, ring-buffer storage, thermal
 *   throttling, status publication
 * - command: Command tokens, coalescing gates, control routing
 * - telemetry: BLE Location and Speed / Date Time codecs
 * - error: Crate error type
 * 
 * FLOW:
 * web/BLE handlers -> CoalescingGate / Command -> RecordingEngine (per tick)
 *   -> Camera -> SegmentSink -> FFmpeg muxer -> {index}_{timestamp}.mp4
 * 
 * ============================================================================
 */

pub mod command;
pub mod error;
pub mod recording;
pub mod telemetry;

pub use command::{
    CoalescingGate, Command, CommandKind, CommandReceiver, CommandSender, ControlRouter,
    ShellSystemActions, SystemActions, WebGates, command_channel,
};
pub use error::{RecorderError, Result};
pub use recording::engine::{EngineParts, RecordingEngine};
pub use recording::manager::{RecorderControl, RecorderHandle};
pub use recording::sink::{SegmentSink, SinkError, SinkReport};
pub use recording::status::{RecorderStatus, StatusBoard};
pub use recording::types::{PersistedState, RecorderConfig, Resolution, SinkConfig, ThermalMode};
pub use telemetry::{GattDateTime, LocationSpeed, TelemetryError};
