use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

// Check names are part of the driver's observable surface, the final report
// aggregates by these strings.
pub const STATUS_IS_101: &str = "status is 101";
pub const HAS_SENDER: &str = "has sender field";
pub const HAS_CONTENT: &str = "has content field";
pub const HAS_TIMESTAMP: &str = "has timestamp field";

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    passed: u64,
    failed: u64,
}

// Per-check pass/fail counts, as reported at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckStat {
    pub name: String,
    pub passed: u64,
    pub failed: u64,
}

impl CheckStat {
    pub fn rate(&self) -> f64 {
        let total = self.passed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.passed as f64 / total as f64
    }
}

// Shared accumulator for check outcomes across all virtual users. It is
// increment-only and order-independent, every active client records into it
// concurrently. The global counters are atomics so the aggregate pass rate
// never needs the map lock.
#[derive(Debug, Default)]
pub struct Checks {
    by_name: Mutex<HashMap<String, Tally>>,
    passed: AtomicU64,
    failed: AtomicU64,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, outcome: bool) {
        if outcome {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut by_name = self.by_name.lock().unwrap_or_else(|e| e.into_inner());
        let tally = by_name.entry(name.to_string()).or_default();
        if outcome {
            tally.passed += 1;
        } else {
            tally.failed += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.passed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    // Fraction of recorded outcomes that passed. A run that recorded nothing
    // is reported as clean, the threshold can only fail on actual data.
    pub fn pass_rate(&self) -> f64 {
        let passed = self.passed.load(Ordering::Relaxed);
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        passed as f64 / total as f64
    }

    // Overall verdict: the pass rate has to exceed the threshold strictly,
    // sitting exactly on it is a failure.
    pub fn meets(&self, threshold: f64) -> bool {
        self.pass_rate() > threshold
    }

    pub fn snapshot(&self) -> Vec<CheckStat> {
        let by_name = self.by_name.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats: Vec<CheckStat> = by_name
            .iter()
            .map(|(name, tally)| CheckStat {
                name: name.clone(),
                passed: tally.passed,
                failed: tally.failed,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
