//! Throughput Sampler
//!
//! Turns the byte counters into rates once per interval and publishes
//! the result through a `watch` channel. Each sample replaces the
//! previous one; nothing is accumulated across windows.

use crate::counters::{CounterWindow, ThroughputCounters};
use crate::session::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Default sampling interval
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Upload/download rate derived from one counter window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ThroughputSample {
    /// Interface -> relay, bytes per second
    pub upload_bytes_per_second: u64,
    /// Relay -> interface, bytes per second
    pub download_bytes_per_second: u64,
}

impl ThroughputSample {
    /// No traffic
    pub const ZERO: Self = Self {
        upload_bytes_per_second: 0,
        download_bytes_per_second: 0,
    };

    /// Compute rates for a closed window
    ///
    /// Returns `None` for an empty window rather than dividing by zero.
    /// Rates are truncated to whole bytes per second.
    pub fn from_window(window: &CounterWindow) -> Option<Self> {
        let secs = window.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        Some(Self {
            upload_bytes_per_second: (window.bytes_up as f64 / secs) as u64,
            download_bytes_per_second: (window.bytes_down as f64 / secs) as u64,
        })
    }

    /// Check for an idle sample
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "Upload: {} | Download: {}",
            format_speed(self.upload_bytes_per_second),
            format_speed(self.download_bytes_per_second)
        )
    }
}

/// Format a rate for display
pub fn format_speed(bytes_per_second: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes_per_second < KB {
        format!("{} B/s", bytes_per_second)
    } else if bytes_per_second < MB {
        format!("{} KB/s", bytes_per_second / KB)
    } else {
        format!("{:.2} MB/s", bytes_per_second as f64 / MB as f64)
    }
}

/// Periodic counter sampler for one session
pub struct ThroughputSampler {
    counters: Arc<ThroughputCounters>,
    interval: Duration,
    publish: watch::Sender<ThroughputSample>,
}

impl ThroughputSampler {
    /// Create a sampler publishing into `publish`
    pub fn new(
        counters: Arc<ThroughputCounters>,
        interval: Duration,
        publish: watch::Sender<ThroughputSample>,
    ) -> Self {
        Self {
            counters,
            interval,
            publish,
        }
    }

    /// Close the current window at `now` and publish its rates.
    pub fn sample_at(&self, now: Instant) -> Option<ThroughputSample> {
        let window = self.counters.take_window(now)?;
        let sample = ThroughputSample::from_window(&window)?;
        self.publish.send_replace(sample);
        Some(sample)
    }

    /// Sample every interval until shutdown.
    pub(crate) async fn run(self, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Throughput sampler started ({:?} interval)", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.requested() => break,
                _ = ticker.tick() => {
                    match self.sample_at(Instant::now()) {
                        Some(sample) => trace!("Throughput: {}", sample.format()),
                        None => debug!("Skipping empty sampling window"),
                    }
                }
            }
        }

        debug!("Throughput sampler stopped");
    }
}
