/**
 * ============================================================================
 * CONTROL ROUTER
 * ============================================================================
 * 
 * PURPOSE: Single worker that serves control intents from the BLE and web
 * layers, in place of one thread per request
 * 
 * ROUTING:
 * - START_REC / STOP_REC        -> recorder lifecycle
 * - REBOOT / SHUTDOWN           -> stop recorder (seal segment), then OS
 * - SET_SYSTEM_DATETIME         -> OS clock
 * - ROTATE / TAKE_SNAPSHOT /
 *   SET_LOCATION_SPEED /
 *   ENABLE_GPS_LOCATION         -> engine command queue (completed there)
 * 
 * Decoding of raw BLE payloads happens at submit time, so a malformed write
 * is rejected to its caller and never reaches the queue.
 * 
 * ============================================================================
 */

use crate::command::{Command, CommandKind, CommandReceiver, CommandSender, command_channel};
use crate::error::{RecorderError, Result};
use crate::recording::manager::RecorderControl;
use crate::telemetry::{TelemetryError, decode_gatt_datetime, decode_location_speed};
use chrono::NaiveDateTime;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// How often the worker re-checks its shutdown flag while idle
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Privileged OS actions.
pub trait SystemActions: Send + Sync {
    fn reboot(&self) -> Result<()>;
    fn shutdown(&self) -> Result<()>;
    fn set_datetime(&self, datetime: NaiveDateTime) -> Result<()>;
}

// systemd/coreutils backed actions
pub struct ShellSystemActions;

impl ShellSystemActions {
    fn run(program: &str, args: &[&str]) -> Result<()> {
        log::info!("Running {} {}", program, args.join(" "));
        let status = process::Command::new(program)
            .args(args)
            .status()
            .map_err(|e| RecorderError::SystemAction(format!("Failed to run {}: {}", program, e)))?;

        if !status.success() {
            return Err(RecorderError::SystemAction(format!(
                "{} exited with error: {:?}",
                program,
                status.code()
            )));
        }
        Ok(())
    }
}

impl SystemActions for ShellSystemActions {
    fn reboot(&self) -> Result<()> {
        Self::run("systemctl", &["reboot"])
    }

    fn shutdown(&self) -> Result<()> {
        Self::run("systemctl", &["poweroff"])
    }

    fn set_datetime(&self, datetime: NaiveDateTime) -> Result<()> {
        let value = datetime.format("%Y-%m-%d %H:%M:%S").to_string();
        Self::run("date", &["-s", &value])
    }
}

// =============================================================================
// Router
// =============================================================================

pub struct ControlRouter {
    sender: CommandSender,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ControlRouter {
    pub fn spawn(
        capacity: usize,
        recorder: Arc<dyn RecorderControl>,
        engine: CommandSender,
        actions: Arc<dyn SystemActions>,
    ) -> Result<Self> {
        let (sender, receiver) = command_channel(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("control-router".to_string())
            .spawn(move || {
                let router = Worker {
                    recorder,
                    engine,
                    actions,
                };
                router.run(receiver, &worker_shutdown);
            })?;

        Ok(Self {
            sender,
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub fn submit(&self, kind: CommandKind) -> Command {
        self.sender.submit(kind)
    }

    // One-byte control characteristic write; may carry several intents
    pub fn submit_control_byte(&self, payload: &[u8]) -> std::result::Result<Vec<Command>, TelemetryError> {
        let [byte] = payload else {
            return Err(TelemetryError::UnexpectedLength {
                record: "Control",
                expected: 1,
                actual: payload.len(),
            });
        };

        let kinds = CommandKind::from_control_byte(*byte)?;
        Ok(kinds.into_iter().map(|kind| self.submit(kind)).collect())
    }

    pub fn submit_location_speed(&self, payload: &[u8]) -> std::result::Result<Command, TelemetryError> {
        let location = decode_location_speed(payload)?;
        Ok(self.submit(CommandKind::SetLocationSpeed(location)))
    }

    pub fn submit_datetime(&self, payload: &[u8]) -> std::result::Result<Command, TelemetryError> {
        let datetime = decode_gatt_datetime(payload)?;
        Ok(self.submit(CommandKind::SetSystemDateTime(datetime)))
    }

    // One byte, non-zero enables the location line on the overlay
    pub fn submit_gps_enable(&self, payload: &[u8]) -> std::result::Result<Command, TelemetryError> {
        let [byte] = payload else {
            return Err(TelemetryError::UnexpectedLength {
                record: "GPS enable",
                expected: 1,
                actual: payload.len(),
            });
        };
        Ok(self.submit(CommandKind::EnableGpsLocation(*byte != 0)))
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Control router thread panicked");
            }
        }
    }
}

impl Drop for ControlRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    recorder: Arc<dyn RecorderControl>,
    engine: CommandSender,
    actions: Arc<dyn SystemActions>,
}

impl Worker {
    fn run(&self, receiver: CommandReceiver, shutdown: &AtomicBool) {
        log::info!("Control router started");
        while !shutdown.load(Ordering::SeqCst) {
            if let Some(command) = receiver.next_timeout(IDLE_POLL) {
                self.dispatch(command);
            }
        }
        log::info!("Control router stopped");
    }

    fn dispatch(&self, command: Command) {
        log::info!("Control command: {}", command.kind().name());

        let result = match command.kind() {
            CommandKind::StartRecording => match self.recorder.start() {
                Err(RecorderError::AlreadyRunning) => {
                    log::info!("Recording already running");
                    Ok(())
                }
                other => other,
            },
            CommandKind::StopRecording => self.recorder.stop(),
            CommandKind::Reboot => self.recorder.stop().and_then(|()| self.actions.reboot()),
            CommandKind::Shutdown => self.recorder.stop().and_then(|()| self.actions.shutdown()),
            CommandKind::SetSystemDateTime(datetime) => match datetime.to_naive_datetime() {
                Some(dt) => self.actions.set_datetime(dt),
                None => Err(RecorderError::SystemAction(format!(
                    "Invalid date time {}",
                    datetime
                ))),
            },
            CommandKind::Rotate
            | CommandKind::TakeSnapshot
            | CommandKind::SetLocationSpeed(_)
            | CommandKind::EnableGpsLocation(_) => {
                // Completed by the engine when served
                self.engine.send(command.clone());
                return;
            }
        };

        match result {
            Ok(()) => command.complete(),
            Err(e) => log::error!("Control command {} failed: {}", command.kind().name(), e),
        }
    }
}
