//! Watchdog for node calls that hold up an event loop
//!
//! Every node sharing a location runs on one event loop, so a `process` or
//! `run` call that takes too long stalls its neighbours. Each tracked call
//! stores its start time in an atomic; a monitoring thread scans those
//! timestamps and reports calls running past the threshold.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

struct CallState {
    /// ms since epoch when the current call started, 0 when idle
    started: AtomicU64,
    has_warned: AtomicBool,
    node: String,
    operation: &'static str,
}

/// Tracking handle for one kind of call on one node
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<CallState>,
}

impl WatchdogHandle {
    #[inline(always)]
    fn start_call(&self) {
        self.state.has_warned.store(false, Ordering::Relaxed);
        self.state.started.store(now_millis(), Ordering::Relaxed);
    }

    #[inline(always)]
    fn finish_call(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            info!(
                "[{}] {} returned after being reported slow",
                self.state.node, self.state.operation
            );
        }
        self.state.started.store(0, Ordering::Relaxed);
    }
}

struct WatchdogInner {
    calls: Mutex<Vec<Weak<CallState>>>,
    threshold_ms: u64,
    enabled: AtomicBool,
}

/// Shared watchdog; clones observe the same calls
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<WatchdogInner>,
}

impl Watchdog {
    pub fn new(threshold: Duration) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                calls: Mutex::new(Vec::new()),
                threshold_ms: threshold.as_millis() as u64,
                enabled: AtomicBool::new(true),
            }),
        }
    }

    /// Track `operation` ("process", "run", ...) of `node`
    pub fn register(&self, node: &str, operation: &'static str) -> WatchdogHandle {
        let state = Arc::new(CallState {
            started: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            node: node.to_string(),
            operation,
        });
        self.inner.calls.lock().push(Arc::downgrade(&state));
        WatchdogHandle { state }
    }

    /// Report calls running past the threshold. Returns how many are slow.
    pub fn check(&self) -> usize {
        let now = now_millis();
        let mut slow = 0;

        self.inner.calls.lock().retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let started = state.started.load(Ordering::Relaxed);
            if started > 0 {
                let elapsed = now.saturating_sub(started);
                if elapsed > self.inner.threshold_ms {
                    slow += 1;
                    if !state.has_warned.swap(true, Ordering::Relaxed) {
                        warn!(
                            "[{}] {} has been running for {:.1}s",
                            state.node,
                            state.operation,
                            elapsed as f64 / 1000.0
                        );
                    }
                }
            }
            true
        });

        slow
    }

    /// Start the monitoring thread; it exits after [`stop`](Watchdog::stop)
    pub fn start_monitoring_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let watchdog = self.clone();
        let interval = Duration::from_millis((self.inner.threshold_ms / 4).clamp(10, 1000));
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while watchdog.inner.enabled.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    watchdog.check();
                }
            })
    }

    pub fn stop(&self) {
        self.inner.enabled.store(false, Ordering::Relaxed);
    }
}

/// Marks a tracked call as running for the guard's lifetime
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_call();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_call();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_call_reported() {
        let watchdog = Watchdog::new(Duration::from_millis(20));
        let handle = watchdog.register("slow", "process");

        {
            let _guard = OperationGuard::new(&handle);
            thread::sleep(Duration::from_millis(60));
            assert_eq!(watchdog.check(), 1);
        }
        assert_eq!(watchdog.check(), 0);
    }

    #[test]
    fn test_fast_call_not_reported() {
        let watchdog = Watchdog::new(Duration::from_secs(5));
        let handle = watchdog.register("fast", "run");
        let _guard = OperationGuard::new(&handle);
        assert_eq!(watchdog.check(), 0);
    }

    #[test]
    fn test_dropped_handles_are_forgotten() {
        let watchdog = Watchdog::new(Duration::from_millis(1));
        let handle = watchdog.register("gone", "process");
        drop(handle);
        watchdog.check();
        assert!(watchdog.inner.calls.lock().is_empty());
    }
}
