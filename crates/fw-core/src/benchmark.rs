//! Rolling per-(slot, project) frame-time benchmarks.
//!
//! Benchmarks are the fallback when live frame data is insufficient
//! (see [`crate::metrics`]). Updates are synchronized per key, not
//! globally, so parallel retrieval tasks for unrelated clients never
//! serialize against each other.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::Duration;

use crate::types::SlotIdentifier;

/// Maximum samples retained per key.
const MAX_SAMPLES: usize = 300;

/// Benchmark key: slot identity plus project number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BenchmarkKey {
    pub slot: SlotIdentifier,
    pub project: u32,
}

#[derive(Debug, Default)]
struct Window {
    /// Frame durations in seconds, oldest first.
    samples: Vec<i64>,
}

impl Window {
    fn push(&mut self, duration: Duration) {
        let secs = duration.num_seconds();
        if secs <= 0 {
            return;
        }
        if self.samples.len() == MAX_SAMPLES {
            self.samples.remove(0);
        }
        self.samples.push(secs);
    }

    fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().sum();
        Some(Duration::seconds(
            sum / i64::try_from(self.samples.len()).unwrap_or(i64::MAX),
        ))
    }
}

/// Rolling frame-duration samples keyed by (slot, project).
#[derive(Debug, Default)]
pub struct BenchmarkStore {
    windows: RwLock<HashMap<BenchmarkKey, Mutex<Window>>>,
}

impl BenchmarkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends new frame durations for a key.
    ///
    /// Existing keys update under their own lock while the map stays
    /// readable; only a first-seen key takes the map write lock.
    pub fn update(&self, key: &BenchmarkKey, durations: &[Duration]) {
        if durations.is_empty() {
            return;
        }
        {
            let windows = self.windows.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(window) = windows.get(key) {
                let mut window = window.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                for &duration in durations {
                    window.push(duration);
                }
                return;
            }
        }
        let mut windows = self
            .windows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = windows.entry(key.clone()).or_default();
        let window = window.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        for &duration in durations {
            window.push(duration);
        }
    }

    /// Mean frame duration for a key, or `None` when no samples exist.
    #[must_use]
    pub fn average_frame_time(&self, key: &BenchmarkKey) -> Option<Duration> {
        let windows = self.windows.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = windows.get(key)?;
        let window = window.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        window.average()
    }

    /// Number of samples stored for a key.
    #[must_use]
    pub fn sample_count(&self, key: &BenchmarkKey) -> usize {
        let windows = self.windows.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        windows.get(key).map_or(0, |window| {
            window
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .samples
                .len()
        })
    }
}
