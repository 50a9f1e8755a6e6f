/**
 * ============================================================================
 * RECORDING MANAGER MODULE
 * ============================================================================
 * 
 * PURPOSE: Start/stop lifecycle of the recording engine thread
 * 
 * RESPONSIBILITIES:
 * - Run the engine on a dedicated named thread
 * - Hand the engine back after the loop ends (stop or error) so it can be
 *   started again; there is no automatic restart
 * - Cooperative stop through a shared flag polled once per tick
 * 
 * ============================================================================
 */

use crate::error::{RecorderError, Result};
use crate::recording::engine::RecordingEngine;
use crate::recording::status::StatusBoard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

// Start/stop surface used by the control router
pub trait RecorderControl: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn is_running(&self) -> bool;
}

type EngineThread = JoinHandle<(RecordingEngine, Result<()>)>;

// Recording state holder
enum Slot {
    Idle(Box<RecordingEngine>),
    Running(EngineThread),
    // Engine thread panicked or could not be spawned
    Lost,
}

pub struct RecorderHandle {
    slot: Mutex<Slot>,
    stop: Arc<AtomicBool>,
    status: Arc<StatusBoard>,
}

impl RecorderHandle {
    pub fn new(engine: RecordingEngine) -> Self {
        let status = Arc::clone(engine.status());
        Self {
            slot: Mutex::new(Slot::Idle(Box::new(engine))),
            stop: Arc::new(AtomicBool::new(false)),
            status,
        }
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Join a finished engine thread and put the engine back to Idle
    fn reclaim(slot: &mut Slot) -> Result<()> {
        let Slot::Running(handle) = std::mem::replace(slot, Slot::Lost) else {
            return Ok(());
        };

        match handle.join() {
            Ok((engine, result)) => {
                *slot = Slot::Idle(Box::new(engine));
                if let Err(e) = result {
                    log::warn!("Previous recording session ended with error: {}", e);
                }
                Ok(())
            }
            Err(_) => {
                log::error!("Recording engine thread panicked");
                Err(RecorderError::ThreadPanicked("recording-engine"))
            }
        }
    }
}

impl RecorderControl for RecorderHandle {
    // Start recording on a new engine thread
    fn start(&self) -> Result<()> {
        let mut slot = self.lock();

        if let Slot::Running(handle) = &*slot {
            if !handle.is_finished() {
                return Err(RecorderError::AlreadyRunning);
            }
            Self::reclaim(&mut slot)?;
        }

        let engine = match std::mem::replace(&mut *slot, Slot::Lost) {
            Slot::Idle(engine) => engine,
            Slot::Running(handle) => {
                *slot = Slot::Running(handle);
                return Err(RecorderError::AlreadyRunning);
            }
            Slot::Lost => return Err(RecorderError::ThreadPanicked("recording-engine")),
        };

        log::info!("Starting recording engine");
        self.stop.store(false, Ordering::SeqCst);

        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("recording-engine".to_string())
            .spawn(move || {
                let mut engine = *engine;
                let result = engine.run(&stop);
                (engine, result)
            })?;

        *slot = Slot::Running(handle);
        Ok(())
    }

    // Signal stop and wait for the current segment to be sealed
    fn stop(&self) -> Result<()> {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Running(_)) {
            log::info!("Stop requested but recording is not running");
            return Ok(());
        }

        log::info!("Stopping recording engine");
        self.stop.store(true, Ordering::SeqCst);
        Self::reclaim(&mut slot)
    }

    fn is_running(&self) -> bool {
        matches!(&*self.lock(), Slot::Running(handle) if !handle.is_finished())
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Failed to stop recording on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{WebGates, command_channel};
    use crate::recording::camera::Camera;
    use crate::recording::engine::EngineParts;
    use crate::recording::muxer::{Muxer, MuxerFactory};
    use crate::recording::probe::{DiskProbe, ThermalSensor};
    use crate::recording::sink::SegmentSink;
    use crate::recording::sink::tests::{FakeMuxer, MuxerLog};
    use crate::recording::types::{RecorderConfig, Resolution};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    // Camera that records until told to stop
    struct IdleCamera {
        fail_open: bool,
    }

    impl Camera for IdleCamera {
        fn open(&mut self, _r: Resolution, _fps: u32) -> Result<()> {
            if self.fail_open {
                return Err(RecorderError::Camera("no device".to_string()));
            }
            Ok(())
        }
        fn set_resolution(&mut self, _r: Resolution) -> Result<()> {
            Ok(())
        }
        fn set_rotation(&mut self, _d: u16) -> Result<()> {
            Ok(())
        }
        fn set_overlay_text(&mut self, _t: &str) -> Result<()> {
            Ok(())
        }
        fn capture_still(&mut self, _p: &Path) -> Result<()> {
            Ok(())
        }
        fn begin_segment(&mut self, _sink: Arc<SegmentSink>) -> Result<()> {
            Ok(())
        }
        fn wait_recording(&mut self, timeout: Duration) -> Result<()> {
            thread::sleep(timeout);
            Ok(())
        }
        fn stop_segment(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    struct Muxers;

    impl MuxerFactory for Muxers {
        fn spawn(&self, _p: &Path, _fps: u32) -> Result<Box<dyn Muxer>> {
            Ok(Box::new(FakeMuxer::new(MuxerLog::default())))
        }
    }

    struct Probe;

    impl DiskProbe for Probe {
        fn used_percent(&mut self, _p: &Path) -> Option<u8> {
            Some(5)
        }
    }

    impl ThermalSensor for Probe {
        fn read_celsius(&mut self) -> Option<f32> {
            Some(40.0)
        }
    }

    fn handle(dir: &TempDir, fail_open: bool) -> RecorderHandle {
        let mut config = RecorderConfig::default();
        config.records_location = dir.path().to_path_buf();
        config.tick_millis = 5;

        let parts = EngineParts {
            camera: Box::new(IdleCamera { fail_open }),
            muxers: Box::new(Muxers),
            disk: Box::new(Probe),
            thermal: Box::new(Probe),
        };
        let (_tx, rx) = command_channel(4);
        let engine = RecordingEngine::new(config, parts, Arc::new(StatusBoard::new()), rx, WebGates::default());
        RecorderHandle::new(engine)
    }

    #[test]
    fn test_start_stop_restart() {
        let dir = TempDir::new().unwrap();
        let recorder = handle(&dir, false);

        recorder.start().unwrap();
        assert!(recorder.is_running());
        assert!(matches!(recorder.start(), Err(RecorderError::AlreadyRunning)));

        recorder.stop().unwrap();
        assert!(!recorder.is_running());
        assert!(!recorder.status().is_recording());

        // Engine handed back and can run again
        recorder.start().unwrap();
        assert!(recorder.is_running());
        recorder.stop().unwrap();
    }

    #[test]
    fn test_failed_session_can_be_restarted() {
        let dir = TempDir::new().unwrap();
        let recorder = handle(&dir, true);

        recorder.start().unwrap();
        while recorder.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(recorder.status().status_text().starts_with("Internal error"));

        // No auto-restart, but an explicit start works
        recorder.start().unwrap();
        while recorder.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        recorder.stop().unwrap();
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let dir = TempDir::new().unwrap();
        let recorder = handle(&dir, false);
        recorder.stop().unwrap();
        assert!(!recorder.is_running());
    }
}
