/**
 * ============================================================================
 * STATUS BOARD
 * ============================================================================
 * 
 * PURPOSE: Read-only view of the recorder for web/BLE layers, plus push
 * subscriptions for status text and temperature
 * 
 * CONCURRENCY:
 * - Fields are written only by the engine thread
 * - Subscribers are called synchronously under the subscriber-list lock;
 *   callbacks must be fast and must not block or subscribe again
 * 
 * ============================================================================
 */

use std::sync::{Mutex, MutexGuard};

pub type StatusCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type TemperatureCallback = Box<dyn Fn(Option<f32>) + Send + Sync>;

pub const NO_SEGMENT_YET: &str = "Please wait for one recording to be over";

// Snapshot of recorder state for display
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderStatus {
    pub status_text: String,
    pub current_segment: String,
    pub last_segment: String,
    pub wrap_count: u64,
    pub recording_on: bool,
    pub temperature: Option<f32>,
    pub disk_used_percent: Option<u8>,
}

impl Default for RecorderStatus {
    fn default() -> Self {
        Self {
            status_text: "Not yet set".to_string(),
            current_segment: String::new(),
            last_segment: NO_SEGMENT_YET.to_string(),
            wrap_count: 0,
            recording_on: false,
            temperature: None,
            disk_used_percent: None,
        }
    }
}

#[derive(Default)]
struct Subscribers {
    status: Vec<StatusCallback>,
    temperature: Vec<TemperatureCallback>,
}

#[derive(Default)]
pub struct StatusBoard {
    status: Mutex<RecorderStatus>,
    subscribers: Mutex<Subscribers>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RecorderStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subs(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> RecorderStatus {
        self.state().clone()
    }

    pub fn status_text(&self) -> String {
        self.state().status_text.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state().recording_on
    }

    pub fn subscribe_status(&self, callback: StatusCallback) {
        self.subs().status.push(callback);
    }

    pub fn subscribe_temperature(&self, callback: TemperatureCallback) {
        self.subs().temperature.push(callback);
    }

    // =========================================================================
    // Engine-side updates
    // =========================================================================

    pub fn publish_status(&self, text: impl Into<String>) {
        let text = text.into();
        log::info!("Status: {}", text);
        self.state().status_text = text.clone();

        for callback in &self.subs().status {
            callback(&text);
        }
    }

    pub fn publish_temperature(&self, celsius: Option<f32>) {
        self.state().temperature = celsius;

        for callback in &self.subs().temperature {
            callback(celsius);
        }
    }

    pub(crate) fn set_recording(&self, on: bool) {
        let mut state = self.state();
        state.recording_on = on;
        if !on {
            state.current_segment.clear();
        }
    }

    pub(crate) fn segment_started(&self, name: &str, wrap_count: u64, disk_used_percent: Option<u8>) {
        let mut state = self.state();
        state.current_segment = name.to_string();
        state.wrap_count = wrap_count;
        state.disk_used_percent = disk_used_percent;
    }

    pub(crate) fn segment_finished(&self, name: &str) {
        self.state().last_segment = name.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_status() {
        let board = StatusBoard::new();
        let status = board.snapshot();
        assert_eq!(status.last_segment, NO_SEGMENT_YET);
        assert!(!status.recording_on);
        assert_eq!(status.temperature, None);
    }

    #[test]
    fn test_subscribers_receive_updates() {
        let board = StatusBoard::new();
        let texts = Arc::new(Mutex::new(Vec::new()));
        let temps = Arc::new(Mutex::new(Vec::new()));

        {
            let texts = Arc::clone(&texts);
            board.subscribe_status(Box::new(move |t| texts.lock().unwrap().push(t.to_string())));
        }
        {
            let temps = Arc::clone(&temps);
            board.subscribe_temperature(Box::new(move |c| temps.lock().unwrap().push(c)));
        }

        board.publish_status("Starting recording.");
        board.publish_status("All OK");
        board.publish_temperature(Some(48.5));
        board.publish_temperature(None);

        assert_eq!(*texts.lock().unwrap(), vec!["Starting recording.", "All OK"]);
        assert_eq!(*temps.lock().unwrap(), vec![Some(48.5), None]);
        assert_eq!(board.status_text(), "All OK");
    }

    #[test]
    fn test_segment_fields() {
        let board = StatusBoard::new();
        board.set_recording(true);
        board.segment_started("3_2025-01-15_08-00-00.mp4", 2, Some(41));
        board.segment_finished("3_2025-01-15_08-00-00.mp4");

        let status = board.snapshot();
        assert_eq!(status.current_segment, "3_2025-01-15_08-00-00.mp4");
        assert_eq!(status.last_segment, "3_2025-01-15_08-00-00.mp4");
        assert_eq!(status.wrap_count, 2);
        assert_eq!(status.disk_used_percent, Some(41));

        board.set_recording(false);
        assert!(board.snapshot().current_segment.is_empty());
    }
}
