//! Progress reporting for long passes.
//!
//! Importers call [`ProgressSink::begin`] before walking their rows,
//! [`ProgressSink::tick`] per row and [`ProgressSink::end`] when done. Sinks
//! throttle their own output.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

use crate::core::lock;

/// Ticks between two reports for large passes.
const REPORT_EVERY: u64 = 1000;

/// Receiver of per-row progress.
pub trait ProgressSink: Send + Sync {
    /// A pass of a unit starts over `total` rows.
    fn begin(&self, unit: &str, pass: &str, total: u64);

    /// `done` rows of the current pass are processed.
    fn tick(&self, done: u64);

    /// The current pass finished.
    fn end(&self);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn begin(&self, _unit: &str, _pass: &str, _total: u64) {}
    fn tick(&self, _done: u64) {}
    fn end(&self) {}
}

/// Shared counters of the current pass.
#[derive(Debug)]
struct PassTracker {
    label: Mutex<(String, String)>,
    total: AtomicU64,
    done: AtomicU64,
    last_reported: AtomicU64,
    started: Mutex<Instant>,
}

impl PassTracker {
    fn new() -> Self {
        Self {
            label: Mutex::new((String::new(), String::new())),
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
            last_reported: AtomicU64::new(0),
            started: Mutex::new(Instant::now()),
        }
    }

    fn begin(&self, unit: &str, pass: &str, total: u64) {
        *lock(&self.label) = (unit.to_string(), pass.to_string());
        *lock(&self.started) = Instant::now();
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
        self.last_reported.store(0, Ordering::Relaxed);
    }

    /// Record a tick; true when it should be reported.
    fn tick(&self, done: u64) -> bool {
        self.done.store(done, Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let step = (total / 10).clamp(1, REPORT_EVERY);
        let last = self.last_reported.load(Ordering::Relaxed);
        if done >= last + step || (total > 0 && done == total && last != done) {
            self.last_reported.store(done, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn label(&self) -> (String, String) {
        lock(&self.label).clone()
    }

    fn elapsed_secs(&self) -> f64 {
        lock(&self.started).elapsed().as_secs_f64()
    }

    fn rows_per_second(&self) -> f64 {
        let elapsed = self.elapsed_secs();
        if elapsed > 0.0 {
            self.done.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Writes throttled progress lines to the log.
#[derive(Debug)]
pub struct LogProgress {
    tracker: PassTracker,
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            tracker: PassTracker::new(),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for LogProgress {
    fn begin(&self, unit: &str, pass: &str, total: u64) {
        self.tracker.begin(unit, pass, total);
    }

    fn tick(&self, done: u64) {
        if self.tracker.tick(done) {
            let (unit, pass) = self.tracker.label();
            let total = self.tracker.total.load(Ordering::Relaxed);
            info!(
                "{} {}: {}/{} ({:.0} rows/s)",
                unit,
                pass,
                done,
                total,
                self.tracker.rows_per_second()
            );
        }
    }

    fn end(&self) {}
}

/// One JSON progress line.
#[derive(Debug, Serialize)]
pub struct ProgressUpdate {
    pub unit: String,
    pub pass: String,
    pub done: u64,
    pub total: u64,
    pub elapsed_seconds: f64,
    pub finished: bool,
}

/// Writes progress as JSON lines to stderr.
#[derive(Debug)]
pub struct JsonProgress {
    tracker: PassTracker,
}

impl JsonProgress {
    pub fn new() -> Self {
        Self {
            tracker: PassTracker::new(),
        }
    }

    fn update(&self, finished: bool) -> ProgressUpdate {
        let (unit, pass) = self.tracker.label();
        ProgressUpdate {
            unit,
            pass,
            done: self.tracker.done.load(Ordering::Relaxed),
            total: self.tracker.total.load(Ordering::Relaxed),
            elapsed_seconds: self.tracker.elapsed_secs(),
            finished,
        }
    }

    fn emit(&self, update: &ProgressUpdate) {
        if let Ok(line) = serde_json::to_string(update) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
        }
    }
}

impl Default for JsonProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for JsonProgress {
    fn begin(&self, unit: &str, pass: &str, total: u64) {
        self.tracker.begin(unit, pass, total);
        self.emit(&self.update(false));
    }

    fn tick(&self, done: u64) {
        if self.tracker.tick(done) {
            self.emit(&self.update(false));
        }
    }

    fn end(&self) {
        self.emit(&self.update(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_pass_reports_every_row() {
        let tracker = PassTracker::new();
        tracker.begin("Member", "import", 3);
        assert!(tracker.tick(1));
        assert!(tracker.tick(2));
        assert!(tracker.tick(3));
    }

    #[test]
    fn test_large_pass_is_throttled() {
        let tracker = PassTracker::new();
        tracker.begin("Member", "import", 50_000);
        let reported = (1..=50_000).filter(|done| tracker.tick(*done)).count();
        assert_eq!(reported, 50);
    }

    #[test]
    fn test_last_row_always_reported() {
        let tracker = PassTracker::new();
        tracker.begin("Member", "import", 25);
        let reported: Vec<u64> = (1..=25).filter(|done| tracker.tick(*done)).collect();
        assert_eq!(reported.last(), Some(&25));
    }

    #[test]
    fn test_json_update_shape() {
        let progress = JsonProgress::new();
        progress.tracker.begin("Tag", "identify", 4);
        progress.tracker.tick(2);
        let json = serde_json::to_value(progress.update(false)).unwrap();
        assert_eq!(json["unit"], "Tag");
        assert_eq!(json["done"], 2);
        assert_eq!(json["total"], 4);
        assert_eq!(json["finished"], false);
    }
}
