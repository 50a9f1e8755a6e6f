/**
 * ============================================================================
 * SEGMENT SINK MODULE
 * ============================================================================
 * 
 * PURPOSE: Bounded buffering writer between the capture thread and the
 * muxer of the current segment
 * 
 * PIPELINE:
 * producer --append--> accumulation buffer --seal--> bounded queue
 *          --consumer thread--> Muxer (ffmpeg stdin)
 * 
 * GUARANTEES:
 * - Ordering: bytes reach the muxer in exactly the order append() saw them
 * - No loss: a full queue blocks append() instead of dropping data
 * - Clean shutdown: close() drains the queue, closes the muxer input and
 *   waits for the muxer to exit, even after a write failure
 * - Write failures end the consumer; they are reported by close() and
 *   failure(), never raised into the producer
 * 
 * ============================================================================
 */

use crate::recording::muxer::Muxer;
use crate::recording::types::SinkConfig;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to start sink consumer: {0}")]
    Spawn(String),

    #[error("Sink already closed")]
    Closed,

    // Write to the muxer failed; the rest of the segment was discarded
    #[error("Downstream write failed after {bytes_written} bytes: {message}")]
    Downstream { bytes_written: u64, message: String },

    #[error("Muxer exited with failure")]
    MuxerFailed,

    #[error("Failed to wait for muxer: {0}")]
    Wait(String),

    #[error("Sink consumer thread panicked")]
    ConsumerPanicked,
}

// Delivery totals for a closed sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub bytes_written: u64,
    pub buffers_written: u64,
}

// Sealed buffer, or None as the end-of-stream sentinel
type Sealed = Option<Vec<u8>>;

struct Accumulator {
    buf: Vec<u8>,
    closed: bool,
    // Consumer hung up after a write failure; further data is discarded
    consumer_gone: bool,
}

struct ConsumerOutcome {
    report: SinkReport,
    write_error: Option<String>,
    exit: Result<bool, String>,
}

pub struct SegmentSink {
    label: String,
    config: SinkConfig,
    acc: Mutex<Accumulator>,
    tx: Sender<Sealed>,
    consumer: Mutex<Option<JoinHandle<ConsumerOutcome>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl SegmentSink {
    // Start the consumer thread for `muxer`
    pub fn new(muxer: Box<dyn Muxer>, config: SinkConfig, label: impl Into<String>) -> Result<Self, SinkError> {
        let label = label.into();
        let (tx, rx) = crossbeam_channel::bounded::<Sealed>(config.queue_capacity);
        let failure = Arc::new(Mutex::new(None));

        let consumer_failure = Arc::clone(&failure);
        let consumer_label = label.clone();
        let handle = thread::Builder::new()
            .name("segment-sink".to_string())
            .spawn(move || consume(muxer, rx, consumer_failure, consumer_label))
            .map_err(|e| SinkError::Spawn(e.to_string()))?;

        Ok(Self {
            label,
            config,
            acc: Mutex::new(Accumulator {
                buf: Vec::with_capacity(config.seal_threshold),
                closed: false,
                consumer_gone: false,
            }),
            tx,
            consumer: Mutex::new(Some(handle)),
            failure,
        })
    }

    fn lock_acc(&self) -> MutexGuard<'_, Accumulator> {
        self.acc.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append frame bytes.
    ///
    /// Blocks while the queue is full. Only fails once the sink is closed.
    pub fn append(&self, bytes: &[u8]) -> Result<(), SinkError> {
        let mut acc = self.lock_acc();
        if acc.closed {
            return Err(SinkError::Closed);
        }
        if acc.consumer_gone {
            return Ok(());
        }

        acc.buf.extend_from_slice(bytes);
        if acc.buf.len() >= self.config.seal_threshold {
            self.seal(&mut acc);
        }
        Ok(())
    }

    // Seal and enqueue any partial buffer now
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut acc = self.lock_acc();
        if acc.closed {
            return Err(SinkError::Closed);
        }
        self.seal(&mut acc);
        Ok(())
    }

    // The accumulation lock is held across the send so sealed buffers enter
    // the queue in append order.
    fn seal(&self, acc: &mut Accumulator) {
        if acc.buf.is_empty() || acc.consumer_gone {
            acc.buf.clear();
            return;
        }

        let sealed = std::mem::replace(&mut acc.buf, Vec::with_capacity(self.config.seal_threshold));
        if self.tx.send(Some(sealed)).is_err() {
            acc.consumer_gone = true;
            log::warn!("Sink {}: consumer stopped, discarding further data", self.label);
        }
    }

    /// Flush, send the end-of-stream sentinel and wait for the consumer to
    /// drain, close the muxer input and reap the muxer.
    pub fn close(&self) -> Result<SinkReport, SinkError> {
        {
            let mut acc = self.lock_acc();
            if acc.closed {
                return Err(SinkError::Closed);
            }
            self.seal(&mut acc);
            acc.closed = true;
            // Fails only when the consumer already hung up
            let _ = self.tx.send(None);
        }

        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(SinkError::Closed)?;
        let outcome = handle.join().map_err(|_| SinkError::ConsumerPanicked)?;

        if let Some(message) = outcome.write_error {
            return Err(SinkError::Downstream {
                bytes_written: outcome.report.bytes_written,
                message,
            });
        }

        match outcome.exit {
            Ok(true) => {
                log::debug!(
                    "Sink {} closed: {} bytes in {} buffers",
                    self.label,
                    outcome.report.bytes_written,
                    outcome.report.buffers_written
                );
                Ok(outcome.report)
            }
            Ok(false) => Err(SinkError::MuxerFailed),
            Err(e) => Err(SinkError::Wait(e)),
        }
    }

    // Downstream failure observed so far, if any
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_acc().closed
    }

    pub fn queued_buffers(&self) -> usize {
        self.tx.len()
    }
}

impl Drop for SegmentSink {
    fn drop(&mut self) {
        // Never leave the consumer or the muxer process behind
        if !self.is_closed() {
            if let Err(e) = self.close() {
                log::warn!("Sink {} closed on drop with error: {}", self.label, e);
            }
        }
    }
}

// Consumer loop: strictly in queue order, one full write per buffer
fn consume(
    mut muxer: Box<dyn Muxer>,
    rx: Receiver<Sealed>,
    failure: Arc<Mutex<Option<String>>>,
    label: String,
) -> ConsumerOutcome {
    let mut report = SinkReport::default();
    let mut write_error = None;

    while let Ok(Some(buf)) = rx.recv() {
        // write_all retries partial writes
        if let Err(e) = muxer.write_all(&buf) {
            log::error!("Sink {}: failed to write to muxer: {}", label, e);
            *failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
            write_error = Some(e.to_string());
            break;
        }
        report.bytes_written += buf.len() as u64;
        report.buffers_written += 1;
    }

    // Unblock a producer waiting on a full queue
    drop(rx);

    if write_error.is_none() {
        if let Err(e) = muxer.flush() {
            log::warn!("Sink {}: failed to flush muxer: {}", label, e);
        }
    }
    muxer.close_input();

    let exit = muxer.wait_for_exit().map_err(|e| e.to_string());
    ConsumerOutcome {
        report,
        write_error,
        exit,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    // Records every write and lifecycle call
    #[derive(Clone, Default)]
    pub(crate) struct MuxerLog {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MuxerLog {
        pub fn bytes(&self) -> Vec<u8> {
            self.writes.lock().unwrap().concat()
        }

        pub fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    pub(crate) struct FakeMuxer {
        pub log: MuxerLog,
        pub fail_after_writes: Option<usize>,
        pub hold: Option<crossbeam_channel::Receiver<()>>,
        pub exit_ok: bool,
    }

    impl FakeMuxer {
        pub fn new(log: MuxerLog) -> Self {
            Self {
                log,
                fail_after_writes: None,
                hold: None,
                exit_ok: true,
            }
        }
    }

    impl Write for FakeMuxer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(hold) = &self.hold {
                let _ = hold.recv();
            }
            let mut writes = self.log.writes.lock().unwrap();
            if self.fail_after_writes.map(|n| writes.len() >= n).unwrap_or(false) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Muxer for FakeMuxer {
        fn close_input(&mut self) {
            self.log.events.lock().unwrap().push("close_input");
        }

        fn wait_for_exit(&mut self) -> io::Result<bool> {
            self.log.events.lock().unwrap().push("exit");
            Ok(self.exit_ok)
        }
    }

    fn config(seal_threshold: usize, queue_capacity: usize) -> SinkConfig {
        SinkConfig {
            seal_threshold,
            queue_capacity,
        }
    }

    #[test]
    fn test_flush_delivers_small_appends_in_order() {
        let log = MuxerLog::default();
        let sink = SegmentSink::new(Box::new(FakeMuxer::new(log.clone())), config(1024, 4), "t").unwrap();

        sink.append(b"AAA").unwrap();
        sink.append(b"BB").unwrap();
        sink.append(b"C").unwrap();
        sink.flush().unwrap();

        let report = sink.close().unwrap();
        assert_eq!(log.writes.lock().unwrap().clone(), vec![b"AAABBC".to_vec()]);
        assert_eq!(report.bytes_written, 6);
        assert_eq!(report.buffers_written, 1);
        // close after flush adds no writes and still reaps the muxer
        assert_eq!(log.events(), vec!["close_input", "exit"]);
    }

    #[test]
    fn test_seals_at_threshold() {
        let log = MuxerLog::default();
        let sink = SegmentSink::new(Box::new(FakeMuxer::new(log.clone())), config(4, 8), "t").unwrap();

        for chunk in [&b"ab"[..], b"cd", b"efg", b"h", b"ij"] {
            sink.append(chunk).unwrap();
        }
        sink.close().unwrap();

        assert_eq!(
            log.writes.lock().unwrap().clone(),
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
        );
    }

    #[test]
    fn test_full_queue_blocks_producer() {
        let log = MuxerLog::default();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let mut muxer = FakeMuxer::new(log.clone());
        muxer.hold = Some(release_rx);

        let sink = Arc::new(SegmentSink::new(Box::new(muxer), config(1, 1), "t").unwrap());

        // First buffer is held inside the muxer, second fills the queue
        sink.append(b"1").unwrap();
        sink.append(b"2").unwrap();
        while sink.queued_buffers() < 1 {
            thread::sleep(Duration::from_millis(1));
        }

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let sink = Arc::clone(&sink);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                sink.append(b"3").unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));

        sink.close().unwrap();
        assert_eq!(log.bytes(), b"123".to_vec());
    }

    #[test]
    fn test_write_failure_still_closes_muxer() {
        let log = MuxerLog::default();
        let mut muxer = FakeMuxer::new(log.clone());
        muxer.fail_after_writes = Some(1);

        let sink = SegmentSink::new(Box::new(muxer), config(2, 4), "t").unwrap();
        sink.append(b"ok").unwrap();
        sink.append(b"xx").unwrap();
        sink.append(b"yy").unwrap();

        let err = sink.close().unwrap_err();
        assert_eq!(
            err,
            SinkError::Downstream {
                bytes_written: 2,
                message: "pipe closed".to_string(),
            }
        );
        assert!(sink.failure().is_some());
        assert_eq!(log.bytes(), b"ok".to_vec());
        assert_eq!(log.events(), vec!["close_input", "exit"]);
    }

    #[test]
    fn test_append_after_consumer_failure_is_dropped() {
        let log = MuxerLog::default();
        let mut muxer = FakeMuxer::new(log.clone());
        muxer.fail_after_writes = Some(0);

        let sink = SegmentSink::new(Box::new(muxer), config(1, 1), "t").unwrap();
        sink.append(b"a").unwrap();
        while sink.failure().is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        // Producer is never blocked or failed by the dead consumer
        for _ in 0..10 {
            sink.append(b"b").unwrap();
        }
        assert!(sink.close().is_err());
        assert!(log.bytes().is_empty());
    }

    #[test]
    fn test_closed_sink_rejects_appends() {
        let log = MuxerLog::default();
        let sink = SegmentSink::new(Box::new(FakeMuxer::new(log.clone())), config(8, 2), "t").unwrap();
        sink.close().unwrap();

        assert_eq!(sink.append(b"late"), Err(SinkError::Closed));
        assert_eq!(sink.flush(), Err(SinkError::Closed));
        assert_eq!(sink.close(), Err(SinkError::Closed));
    }

    #[test]
    fn test_muxer_failed_exit_is_reported() {
        let log = MuxerLog::default();
        let mut muxer = FakeMuxer::new(log.clone());
        muxer.exit_ok = false;

        let sink = SegmentSink::new(Box::new(muxer), config(8, 2), "t").unwrap();
        sink.append(b"data").unwrap();
        assert_eq!(sink.close(), Err(SinkError::MuxerFailed));
    }

    #[test]
    fn test_drop_closes_muxer() {
        let log = MuxerLog::default();
        {
            let sink = SegmentSink::new(Box::new(FakeMuxer::new(log.clone())), config(8, 2), "t").unwrap();
            sink.append(b"tail").unwrap();
        }
        assert_eq!(log.bytes(), b"tail".to_vec());
        assert_eq!(log.events(), vec!["close_input", "exit"]);
    }
}
