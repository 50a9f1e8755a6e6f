/**
 * ============================================================================
 * RECORDING MODULE
 * ============================================================================
 * 
 * PURPOSE: Always-on loop recording of bounded-length video segments
 * 
 * SUBMODULES:
 * - camera: Capture device boundary + V4L2-through-FFmpeg camera
 * - config: Config and ring-state persistence
 * - engine: Segment state machine
 * - manager: Start/stop lifecycle of the engine thread
 * - muxer: Downstream MP4 muxer boundary + FFmpeg muxer
 * - probe: Disk usage and temperature readings
 * - sink: Bounded buffering writer between camera and muxer
 * - status: Status fields and subscriptions
 * - storage: Segment file naming and ring-slot cleanup
 * - thermal: Hysteresis governor
 * - types: Data structures and models
 * 
 * ARCHITECTURE:
 * 1. The engine thread owns the camera, the ring state and the governor
 * 2. Per segment, the camera streams H.264 into a fresh SegmentSink
 * 3. The sink's consumer thread feeds one FFmpeg muxer per segment
 * 4. Once the ring size is known, the oldest slot is overwritten
 * 
 * OUTPUT FORMAT:
 * - {index}_{YYYY-MM-DD_HH-MM-SS}.mp4 in the records directory
 * - cfg.json: {"rotation", "cindex", "max-files", "n-loops"}
 * 
 * ============================================================================
 */

pub mod camera;
pub mod config;
pub mod engine;
pub mod manager;
pub mod muxer;
pub mod probe;
pub mod sink;
pub mod status;
pub mod storage;
pub mod thermal;
pub mod types;
