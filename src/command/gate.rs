/**
 * ============================================================================
 * COALESCING GATE
 * ============================================================================
 * 
 * PURPOSE: Merge concurrent identical requests into one pending request that
 * a single consumer serves, with pulse-style acknowledgement to requesters
 * 
 * STATES:
 * - Idle (initial)
 * - Requested: at least one request since the last acknowledge
 * 
 * Any number of request() calls while Requested collapse into one. The
 * consumer polls is_requested() once per tick and calls acknowledge() after
 * serving; every requester blocked in wait() at that moment wakes exactly
 * once and the gate is ready for the next round.
 * 
 * ============================================================================
 */

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Requested,
}

// Acknowledgement observed by a waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pulse {
    pub generation: u64,
    pub context: Option<String>,
}

#[derive(Debug)]
struct GateInner {
    state: GateState,
    last_context: Option<String>,
    // Bumped on every acknowledge; waiters wake when it moves past their snapshot
    generation: u64,
    waiting: usize,
}

#[derive(Debug)]
pub struct CoalescingGate {
    name: &'static str,
    inner: Mutex<GateInner>,
    pulse: Condvar,
}

impl CoalescingGate {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(GateInner {
                state: GateState::Idle,
                last_context: None,
                generation: 0,
                waiting: 0,
            }),
            pulse: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Idle -> Requested; no-op when already requested
    pub fn request(&self) {
        let mut inner = self.lock();
        if inner.state == GateState::Idle {
            log::debug!("Gate {} requested", self.name);
            inner.state = GateState::Requested;
        }
    }

    // Consumer-side poll; does not clear the request
    pub fn is_requested(&self) -> bool {
        self.lock().state == GateState::Requested
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    /// Serve the pending request: back to Idle, remember `context`, and wake
    /// every requester currently blocked in `wait` exactly once.
    pub fn acknowledge(&self, context: Option<String>) {
        let mut inner = self.lock();
        inner.state = GateState::Idle;
        inner.last_context = context;
        inner.generation += 1;
        log::debug!(
            "Gate {} acknowledged (pulse {}, {} waiting)",
            self.name,
            inner.generation,
            inner.waiting
        );
        self.pulse.notify_all();
    }

    /// Block until the next acknowledge after this call, or timeout.
    ///
    /// A timeout does not withdraw the request.
    pub fn wait(&self, timeout: Duration) -> Option<Pulse> {
        let inner = self.lock();
        let seen = inner.generation;
        self.wait_past(inner, seen, timeout)
    }

    /// Request and wait for the acknowledge that serves it.
    ///
    /// The generation snapshot is taken under the same lock as the request,
    /// so an acknowledge racing with this call is never missed.
    pub fn request_and_wait(&self, timeout: Duration) -> Option<Pulse> {
        let mut inner = self.lock();
        if inner.state == GateState::Idle {
            log::debug!("Gate {} requested", self.name);
            inner.state = GateState::Requested;
        }
        let seen = inner.generation;
        self.wait_past(inner, seen, timeout)
    }

    fn wait_past(
        &self,
        mut inner: MutexGuard<'_, GateInner>,
        seen: u64,
        timeout: Duration,
    ) -> Option<Pulse> {
        let deadline = Instant::now() + timeout;
        inner.waiting += 1;

        while inner.generation == seen {
            let now = Instant::now();
            if now >= deadline {
                inner.waiting -= 1;
                return None;
            }
            let (guard, _) = self
                .pulse
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }

        inner.waiting -= 1;
        Some(Pulse {
            generation: inner.generation,
            context: inner.last_context.clone(),
        })
    }

    // Number of acknowledges so far
    pub fn pulses(&self) -> u64 {
        self.lock().generation
    }

    pub fn waiting_count(&self) -> usize {
        self.lock().waiting
    }

    pub fn last_context(&self) -> Option<String> {
        self.lock().last_context.clone()
    }
}

// =============================================================================
// Web Gates
// =============================================================================

// Gates shared by the web handlers and the engine loop
#[derive(Debug, Clone)]
pub struct WebGates {
    pub rotate: Arc<CoalescingGate>,
    pub snapshot: Arc<CoalescingGate>,
    pub stop: Arc<CoalescingGate>,
}

impl Default for WebGates {
    fn default() -> Self {
        Self {
            rotate: Arc::new(CoalescingGate::new("rotate")),
            snapshot: Arc::new(CoalescingGate::new("snapshot")),
            stop: Arc::new(CoalescingGate::new("stop")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_concurrent_requests_coalesce() {
        let gate = Arc::new(CoalescingGate::new("rotate"));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gate.request();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Consumer sees exactly one pending request
        let mut observed = 0;
        for _ in 0..3 {
            if gate.is_requested() {
                observed += 1;
                gate.acknowledge(None);
            }
        }
        assert_eq!(observed, 1);
        assert_eq!(gate.pulses(), 1);
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn test_acknowledge_wakes_all_waiters_once() {
        let gate = Arc::new(CoalescingGate::new("snapshot"));

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.request_and_wait(Duration::from_secs(5)))
            })
            .collect();

        while gate.waiting_count() < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(gate.is_requested());
        gate.acknowledge(Some("records/live_snap.jpg".to_string()));

        for w in waiters {
            let pulse = w.join().unwrap().unwrap();
            assert_eq!(pulse.generation, 1);
            assert_eq!(pulse.context.as_deref(), Some("records/live_snap.jpg"));
        }
        assert_eq!(gate.pulses(), 1);
        assert_eq!(gate.waiting_count(), 0);
        assert!(!gate.is_requested());
    }

    #[test]
    fn test_wait_times_out_without_clearing_request() {
        let gate = CoalescingGate::new("stop");
        assert!(gate.request_and_wait(Duration::from_millis(10)).is_none());
        assert!(gate.is_requested());
        assert_eq!(gate.waiting_count(), 0);
    }

    #[test]
    fn test_wait_ignores_earlier_pulses() {
        let gate = Arc::new(CoalescingGate::new("rotate"));
        gate.request();
        gate.acknowledge(Some("first".to_string()));

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait(Duration::from_secs(5)))
        };
        while gate.waiting_count() < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        gate.acknowledge(Some("second".to_string()));

        let pulse = waiter.join().unwrap().unwrap();
        assert_eq!(pulse.generation, 2);
        assert_eq!(pulse.context.as_deref(), Some("second"));
        assert_eq!(gate.last_context().as_deref(), Some("second"));
    }
}
