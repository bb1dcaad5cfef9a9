//! Throughput counters shared between the relay loop and the sampler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Bytes moved in each direction since the current window opened.
///
/// The relay loop only ever adds; the sampler closes a window with
/// [`take_window`](Self::take_window), which swaps each counter with zero.
/// An increment racing the swap lands either in the closing window or in
/// the next one, never nowhere.
#[derive(Debug)]
pub struct ThroughputCounters {
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    window_start: Mutex<Instant>,
}

/// A closed counter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWindow {
    /// Interface -> socket bytes
    pub bytes_up: u64,
    /// Socket -> interface bytes
    pub bytes_down: u64,
    /// How long the window was open
    pub elapsed: Duration,
}

impl ThroughputCounters {
    /// Create zeroed counters with a window opening now.
    pub fn new() -> Self {
        Self {
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    /// Record bytes read from the interface and sent to the relay.
    pub fn record_up(&self, bytes: usize) {
        self.bytes_up.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record bytes received from the relay and written to the interface.
    pub fn record_down(&self, bytes: usize) {
        self.bytes_down.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Bytes sent up in the current window.
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes received down in the current window.
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    /// When the current window opened.
    pub fn window_start(&self) -> Instant {
        *self.window_start.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the current window at `now` and open the next one.
    ///
    /// Returns `None` and leaves the counters untouched when no time has
    /// passed since the window opened.
    pub fn take_window(&self, now: Instant) -> Option<CounterWindow> {
        let mut start = self.window_start.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(*start);
        if elapsed.is_zero() {
            return None;
        }

        let bytes_up = self.bytes_up.swap(0, Ordering::AcqRel);
        let bytes_down = self.bytes_down.swap(0, Ordering::AcqRel);
        *start = now;

        Some(CounterWindow {
            bytes_up,
            bytes_down,
            elapsed,
        })
    }

    /// Zero both counters and restart the window.
    pub fn reset(&self) {
        let mut start = self.window_start.lock().unwrap_or_else(PoisonError::into_inner);
        self.bytes_up.store(0, Ordering::Release);
        self.bytes_down.store(0, Ordering::Release);
        *start = Instant::now();
    }
}

impl Default for ThroughputCounters {
    fn default() -> Self {
        Self::new()
    }
}
