/**
 * ============================================================================
 * RECORDING ENGINE
 * ============================================================================
 * 
 * PURPOSE: Owns the capture device for a session and runs the segment loop
 * 
 * STATE MACHINE:
 * STOPPED -> ACQUIRE_SEGMENT -> WRITING -> FINALIZE -> ACQUIRE_SEGMENT ...
 *                                                   \-> STOPPED (stop / error)
 * 
 * PER SEGMENT:
 * 1. Capacity: fix the ring size once disk usage crosses the threshold,
 *    wrap the index once the ring size is known
 * 2. Thermal: hysteresis between high and low resolution
 * 3. Allocation: "{index}_{timestamp}.mp4", older files in the slot removed
 * 4. Persist ring state before writing (crash resumes at index + 1)
 * 5. Write window: one tick at a time, serve commands, check the sink,
 *    refresh overlay, check stop
 * 6. Finalize: stop capture, close the sink, advance the index
 * 
 * ERRORS:
 * - Sink failures end the current segment at the next tick; the loop moves
 *   on to a fresh segment
 * - Everything else stops the loop; the operator has to start again
 * 
 * ============================================================================
 */

use crate::command::{Command, CommandKind, CommandReceiver, WebGates};
use crate::error::{RecorderError, Result};
use crate::recording::camera::Camera;
use crate::recording::muxer::MuxerFactory;
use crate::recording::probe::{DiskProbe, ThermalSensor};
use crate::recording::sink::SegmentSink;
use crate::recording::status::StatusBoard;
use crate::recording::thermal::ThermalGovernor;
use crate::recording::types::{
    CapacityEvent, PersistedState, RecorderConfig, Resolution, Segment, ThermalMode,
};
use crate::recording::{config, storage};
use chrono::Local;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Collaborators injected into the engine
pub struct EngineParts {
    pub camera: Box<dyn Camera>,
    pub muxers: Box<dyn MuxerFactory>,
    pub disk: Box<dyn DiskProbe>,
    pub thermal: Box<dyn ThermalSensor>,
}

// How a write window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEnd {
    Elapsed,
    StopRequested,
    // Downstream write failed; the rest of the window would be discarded
    SinkFailed,
}

pub struct RecordingEngine {
    config: RecorderConfig,
    parts: EngineParts,
    status: Arc<StatusBoard>,
    commands: CommandReceiver,
    gates: WebGates,

    state: PersistedState,
    governor: ThermalGovernor,
    resolution: Resolution,
    temperature: Option<f32>,
    location_text: Option<String>,
    gps_enabled: bool,
    host_tag: String,
    // Stop commands are completed once the segment is sealed
    pending_stops: Vec<Command>,
}

impl RecordingEngine {
    pub fn new(
        config: RecorderConfig,
        parts: EngineParts,
        status: Arc<StatusBoard>,
        commands: CommandReceiver,
        gates: WebGates,
    ) -> Self {
        let host_tag = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "loopcam".to_string());

        Self {
            governor: ThermalGovernor::new(config.thermal_high_celsius, config.thermal_normal_celsius),
            resolution: config.high_resolution,
            config,
            parts,
            status,
            commands,
            gates,
            state: PersistedState::default(),
            temperature: None,
            location_text: None,
            gps_enabled: true,
            host_tag,
            pending_stops: Vec::new(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Run the segment loop until `stop` is set, a stop is requested, or an
    /// unrecoverable error occurs.
    ///
    /// The camera is closed on every exit path.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        self.governor = ThermalGovernor::new(
            self.config.thermal_high_celsius,
            self.config.thermal_normal_celsius,
        );
        self.resolution = self.config.high_resolution;

        self.status.publish_status(format!(
            "Initializing camera to {} @ {} fps",
            self.resolution, self.config.framerate
        ));

        let result = self.open_session().and_then(|()| self.segment_loop(stop));

        self.parts.camera.close();
        self.status.set_recording(false);

        match &result {
            Ok(()) => {
                self.status.publish_status(format!(
                    "Recording stopped by user at {}. Camera closed.",
                    Local::now().format(TIMESTAMP_FORMAT)
                ));
                log::info!("Recording stopped at index {}", self.state.current_index);
            }
            Err(e) => {
                log::error!("Recording stopped on error: {}", e);
                self.status
                    .publish_status(format!("Internal error. Recording stopped. {}", e));
            }
        }

        // Acknowledge stop requests only after the segment is sealed
        for command in self.pending_stops.drain(..) {
            command.complete();
        }
        if self.gates.stop.is_requested() {
            self.gates.stop.acknowledge(Some(self.status.status_text()));
        }

        result
    }

    fn open_session(&mut self) -> Result<()> {
        let records = self.config.records_location.clone();
        storage::ensure_records_dir(&records).map_err(RecorderError::Storage)?;
        log::info!(
            "Records directory {:?}: {} segments, {} bytes",
            records,
            storage::count_segments(&records),
            storage::calculate_total_storage(&records)
        );

        self.state = config::load_state(&self.config.state_path())?;

        self.parts.camera.open(self.resolution, self.config.framerate)?;
        self.parts.camera.set_rotation(self.state.rotation)?;

        // Resume after the segment that was in progress when we last stopped
        self.state.current_index += 1;

        self.status.publish_status("Starting recording.");
        self.status.set_recording(true);
        Ok(())
    }

    fn segment_loop(&mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::SeqCst) {
            if self.record_segment(stop)? == WindowEnd::StopRequested {
                break;
            }
        }
        Ok(())
    }

    // =========================================================================
    // One segment
    // =========================================================================

    fn record_segment(&mut self, stop: &AtomicBool) -> Result<WindowEnd> {
        let (segment, disk_used) = self.prepare_segment()?;
        let name = segment.file_name();

        let muxer = self.parts.muxers.spawn(&segment.path, self.config.framerate)?;
        let sink = Arc::new(SegmentSink::new(muxer, self.config.sink_config(), name.clone())?);

        if let Err(e) = self.parts.camera.begin_segment(Arc::clone(&sink)) {
            if let Err(close_err) = sink.close() {
                log::warn!("Segment {} closed with error after failed start: {}", name, close_err);
            }
            return Err(e);
        }

        log::info!(
            "Segment started: {} at {} ({} mode)",
            name,
            segment.resolution,
            self.governor.mode()
        );
        self.status
            .segment_started(&name, self.state.wrap_count, disk_used);
        self.status.publish_status(self.health_text());

        let window = self.write_window(&segment, &sink, stop);
        let stopped = self.parts.camera.stop_segment();

        // Finalize: durability before advancing
        match sink.close() {
            Ok(report) => log::info!(
                "Segment finalized: {} ({} bytes)",
                name,
                report.bytes_written
            ),
            Err(e) => {
                log::error!("Segment {} incomplete: {}", name, e);
                self.status
                    .publish_status(format!("Segment {} incomplete: {}", name, e));
            }
        }

        let end = window?;
        stopped?;

        self.status.segment_finished(&name);
        self.state.current_index += 1;
        Ok(end)
    }

    fn prepare_segment(&mut self) -> Result<(Segment, Option<u8>)> {
        let records = self.config.records_location.clone();

        // 1. Capacity
        let disk_used = self.parts.disk.used_percent(&records);
        if disk_used.is_none() {
            log::warn!("Disk usage unknown, skipping capacity check for this segment");
        }
        match self
            .state
            .apply_capacity(disk_used, self.config.capacity_threshold_percent)
        {
            Some(CapacityEvent::Discovered(max_files)) => log::info!(
                "Disk usage reached {}%: ring size fixed at {} segments (loop {})",
                disk_used.unwrap_or_default(),
                max_files,
                self.state.wrap_count
            ),
            Some(CapacityEvent::Wrapped) => log::info!(
                "Ring wrapped to index 0 (loop {})",
                self.state.wrap_count
            ),
            None => {}
        }

        // 2. Thermal
        self.temperature = self.parts.thermal.read_celsius();
        if let Some(mode) = self.governor.update(self.temperature) {
            self.resolution = match mode {
                ThermalMode::Throttled => self.config.low_resolution,
                ThermalMode::Normal => self.config.high_resolution,
            };
            log::warn!(
                "Temperature {:?} C: switching to {} ({})",
                self.temperature,
                self.resolution,
                mode
            );
            self.parts.camera.set_resolution(self.resolution)?;
        }
        self.status.publish_temperature(self.temperature);

        // 3. Allocation
        let index = self.state.current_index;
        let now = Local::now();
        let path = storage::segment_path(&records, index, &now);
        storage::remove_segments_with_index(&records, index).map_err(RecorderError::Storage)?;

        // 4. Persist
        config::save_state(&self.config.state_path(), &self.state)?;

        let segment = Segment {
            index,
            path,
            start_time: now,
            resolution: self.resolution,
            target_duration: self.config.segment_duration(),
        };
        Ok((segment, disk_used))
    }

    fn write_window(&mut self, segment: &Segment, sink: &SegmentSink, stop: &AtomicBool) -> Result<WindowEnd> {
        let tick = self.config.tick();
        let tick_ms = tick.as_millis().max(1);
        let ticks = segment.target_duration.as_millis().div_ceil(tick_ms);

        for _ in 0..ticks {
            self.serve_requests()?;

            if let Some(message) = sink.failure() {
                log::warn!("Segment {} ended early, sink failed: {}", segment.index, message);
                return Ok(WindowEnd::SinkFailed);
            }

            let overlay = self.overlay_text(segment.index);
            self.parts.camera.set_overlay_text(&overlay)?;

            if stop.load(Ordering::SeqCst)
                || self.gates.stop.is_requested()
                || !self.pending_stops.is_empty()
            {
                log::info!("Stop requested during segment {}", segment.index);
                return Ok(WindowEnd::StopRequested);
            }

            self.parts.camera.wait_recording(tick)?;
        }

        Ok(WindowEnd::Elapsed)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn serve_requests(&mut self) -> Result<()> {
        if self.gates.rotate.is_requested() {
            let rotation = self.rotate()?;
            self.gates.rotate.acknowledge(Some(rotation.to_string()));
        }

        if self.gates.snapshot.is_requested() {
            let path = self.take_snapshot()?;
            self.gates.snapshot.acknowledge(Some(path));
        }

        while let Some(command) = self.commands.try_next() {
            self.handle_command(command)?;
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> Result<()> {
        log::debug!("Engine command: {}", command.kind().name());
        match command.kind() {
            CommandKind::Rotate => {
                self.rotate()?;
            }
            CommandKind::TakeSnapshot => {
                self.take_snapshot()?;
            }
            CommandKind::SetLocationSpeed(location) => {
                let text = location.to_string();
                self.location_text = if text.is_empty() { None } else { Some(text) };
            }
            CommandKind::EnableGpsLocation(enabled) => {
                log::info!("GPS overlay {}", if *enabled { "enabled" } else { "disabled" });
                self.gps_enabled = *enabled;
            }
            CommandKind::StopRecording => {
                self.pending_stops.push(command.clone());
                return Ok(());
            }
            CommandKind::StartRecording => {
                log::info!("Start requested while already recording");
            }
            CommandKind::Reboot | CommandKind::Shutdown | CommandKind::SetSystemDateTime(_) => {
                // System commands are routed elsewhere; leave them uncompleted
                log::warn!("Engine ignoring system command {}", command.kind().name());
                return Ok(());
            }
        }
        command.complete();
        Ok(())
    }

    fn rotate(&mut self) -> Result<u16> {
        let rotation = self.state.rotate();
        self.parts.camera.set_rotation(rotation)?;
        config::save_state(&self.config.state_path(), &self.state)?;
        log::info!("Rotation set to {} degrees", rotation);
        Ok(rotation)
    }

    fn take_snapshot(&mut self) -> Result<String> {
        let path = self.config.snapshot_path();
        self.parts.camera.capture_still(&path)?;
        log::info!("Snapshot saved to {:?}", path);
        Ok(path.to_string_lossy().into_owned())
    }

    // =========================================================================
    // Text
    // =========================================================================

    fn overlay_text(&self, index: u64) -> String {
        let temperature = match self.temperature {
            Some(t) => format!("T {:.1}C", t),
            None => "T n/a".to_string(),
        };
        let mut text = format!(
            "{} - {} - {} - LoopCam {} @ {}fps - {}",
            index,
            Local::now().format(TIMESTAMP_FORMAT),
            temperature,
            self.resolution,
            self.config.framerate,
            self.host_tag
        );

        if self.gps_enabled {
            if let Some(location) = &self.location_text {
                text.push('\n');
                text.push_str(location);
            }
        }
        text
    }

    fn health_text(&self) -> String {
        match self.governor.mode() {
            ThermalMode::Normal => "All OK".to_string(),
            ThermalMode::Throttled => format!(
                "Temperature exceeded {} C, video resolution reduced to {}. \
                 High resolution will be restored after temperature drops below {} C",
                self.config.thermal_high_celsius,
                self.resolution,
                self.config.thermal_normal_celsius
            ),
        }
    }
}
