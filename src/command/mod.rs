/**
 * ============================================================================
 * COMMAND MODULE
 * ============================================================================
 * 
 * PURPOSE: Typed control intents carried from request handlers to the
 * recording engine and the control router
 * 
 * FUNCTIONALITY:
 * - CommandKind: closed set of intents with per-variant payloads
 * - Command: one-shot request/acknowledgement token with timed wait
 * - Bounded command channel (sender side never blocks the request handler)
 * - Control byte decoding for the BLE control characteristic
 * 
 * SUBMODULES:
 * - gate: CoalescingGate for idempotent web intents (rotate/snapshot/stop)
 * - control: ControlRouter worker and privileged system actions
 * 
 * ============================================================================
 */

pub mod control;
pub mod gate;

pub use control::{ControlRouter, ShellSystemActions, SystemActions};
pub use gate::{CoalescingGate, WebGates};

use crate::telemetry::{GattDateTime, LocationSpeed, TelemetryError};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// Control byte bit layout
const CTRL_REBOOT: u8 = 1 << 0;
const CTRL_SHUTDOWN: u8 = 1 << 1;
const CTRL_STOP_REC: u8 = 1 << 2;
const CTRL_START_REC: u8 = 1 << 3;
const CTRL_DISABLE_ADVERTISEMENT: u8 = 1 << 4;
const CTRL_RESERVED_MASK: u8 = 0b1110_0000;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    StopRecording,
    StartRecording,
    Reboot,
    Shutdown,
    Rotate,
    TakeSnapshot,
    SetSystemDateTime(GattDateTime),
    EnableGpsLocation(bool),
    SetLocationSpeed(LocationSpeed),
}

impl CommandKind {
    // Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::StopRecording => "STOP_REC",
            CommandKind::StartRecording => "START_REC",
            CommandKind::Reboot => "REBOOT",
            CommandKind::Shutdown => "SHUTDOWN",
            CommandKind::Rotate => "ROTATE",
            CommandKind::TakeSnapshot => "TAKE_SNAPSHOT",
            CommandKind::SetSystemDateTime(_) => "SET_SYSTEM_DATETIME",
            CommandKind::EnableGpsLocation(_) => "ENABLE_GPS_LOCATION",
            CommandKind::SetLocationSpeed(_) => "SET_LOCATION_SPEED",
        }
    }

    /// Decode a one-byte control write into the intents it carries.
    ///
    /// Several bits may be set in one write; intents are returned in
    /// bit order. The advertisement bit belongs to the BLE transport and is
    /// not turned into a command. Any reserved bit rejects the whole byte.
    pub fn from_control_byte(byte: u8) -> Result<Vec<CommandKind>, TelemetryError> {
        if byte & CTRL_RESERVED_MASK != 0 {
            return Err(TelemetryError::InvalidControlByte(byte));
        }

        let mut kinds = Vec::new();
        if byte & CTRL_REBOOT != 0 {
            kinds.push(CommandKind::Reboot);
        }
        if byte & CTRL_SHUTDOWN != 0 {
            kinds.push(CommandKind::Shutdown);
        }
        if byte & CTRL_STOP_REC != 0 {
            kinds.push(CommandKind::StopRecording);
        }
        if byte & CTRL_START_REC != 0 {
            kinds.push(CommandKind::StartRecording);
        }
        if byte & CTRL_DISABLE_ADVERTISEMENT != 0 {
            log::info!("Control byte requests advertisement disable (handled by transport)");
        }

        Ok(kinds)
    }
}

// =============================================================================
// Completion Signal
// =============================================================================

// Single-fire completion flag shared by every clone of a Command
#[derive(Debug, Default)]
struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

/// One-shot request token.
///
/// Cloning shares the completion signal, so the requester keeps one clone to
/// wait on while the handler owns the other. A timed-out `wait_for` does not
/// cancel anything: the handler may still complete the command afterwards,
/// so callers must read `false` as "outcome unknown".
#[derive(Clone)]
pub struct Command {
    kind: CommandKind,
    completion: Arc<Completion>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            completion: Arc::new(Completion::default()),
        }
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    // Mark complete and wake all waiters. Later calls are no-ops.
    pub fn complete(&self) {
        let mut done = self
            .completion
            .done
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *done {
            return;
        }
        *done = true;
        self.completion.cond.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        *self
            .completion
            .done
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    // Block until completion or timeout; returns whether completion occurred
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self
            .completion
            .done
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .completion
                .cond
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            done = guard;
        }

        true
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({}, completed={})", self.kind.name(), self.is_completed())
    }
}

// =============================================================================
// Command Channel
// =============================================================================

// Create a bounded command channel
pub fn command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (CommandSender { tx }, CommandReceiver { rx })
}

#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Queue a command without blocking the caller.
    ///
    /// When the queue is full or the consumer is gone the command is dropped
    /// and the returned token never completes.
    pub fn submit(&self, kind: CommandKind) -> Command {
        let command = Command::new(kind);
        self.send(command.clone());
        command
    }

    pub fn send(&self, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(c)) => {
                log::warn!("Command queue full, dropping {}", c.kind().name());
            }
            Err(TrySendError::Disconnected(c)) => {
                log::warn!("Command consumer gone, dropping {}", c.kind().name());
            }
        }
    }
}

pub struct CommandReceiver {
    rx: Receiver<Command>,
}

impl CommandReceiver {
    // Non-blocking poll
    pub fn try_next(&self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    // Blocking receive with timeout, used by worker loops
    pub fn next_timeout(&self, timeout: Duration) -> Option<Command> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_for_returns_after_completion() {
        let command = Command::new(CommandKind::Rotate);
        let handler = command.clone();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handler.complete();
        });

        assert!(command.wait_for(Duration::from_secs(5)));
        assert!(command.is_completed());
        t.join().unwrap();
    }

    #[test]
    fn test_wait_for_timeout_is_outcome_unknown() {
        let command = Command::new(CommandKind::TakeSnapshot);
        assert!(!command.wait_for(Duration::from_millis(10)));

        // Late completion is still recorded
        command.complete();
        assert!(command.is_completed());
        assert!(command.wait_for(Duration::from_millis(0)));
    }

    #[test]
    fn test_complete_is_idempotent_and_wakes_all_waiters() {
        let command = Command::new(CommandKind::StopRecording);
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let c = command.clone();
                thread::spawn(move || c.wait_for(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        command.complete();
        command.complete();

        for w in waiters {
            assert!(w.join().unwrap());
        }
    }

    #[test]
    fn test_control_byte_decoding() {
        assert_eq!(
            CommandKind::from_control_byte(0b0000_0100).unwrap(),
            vec![CommandKind::StopRecording]
        );
        assert_eq!(
            CommandKind::from_control_byte(0b0000_1001).unwrap(),
            vec![CommandKind::Reboot, CommandKind::StartRecording]
        );
        assert!(CommandKind::from_control_byte(0b0001_0000).unwrap().is_empty());
        assert!(CommandKind::from_control_byte(0).unwrap().is_empty());
    }

    #[test]
    fn test_control_byte_rejects_reserved_bits() {
        assert_eq!(
            CommandKind::from_control_byte(0b1000_0100),
            Err(TelemetryError::InvalidControlByte(0x84))
        );
        assert!(CommandKind::from_control_byte(0x20).is_err());
    }

    #[test]
    fn test_channel_drops_when_full() {
        let (tx, rx) = command_channel(1);
        let first = tx.submit(CommandKind::Rotate);
        let second = tx.submit(CommandKind::TakeSnapshot);

        assert_eq!(rx.len(), 1);
        let got = rx.try_next().unwrap();
        assert_eq!(got.kind(), &CommandKind::Rotate);
        got.complete();
        assert!(first.is_completed());

        // Dropped command never completes
        assert!(rx.try_next().is_none());
        assert!(!second.wait_for(Duration::from_millis(5)));
    }
}
