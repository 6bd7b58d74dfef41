use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Counter {
    FilesProcessed,
    TestCasesParsed,
    TestCasesMapped,
    TestCasesSkippedUnmapped,
    ExecutionsPosted,
    ExecutionsFailed,
}

impl Counter {
    pub const ALL: [Counter; 6] = [
        Counter::FilesProcessed,
        Counter::TestCasesParsed,
        Counter::TestCasesMapped,
        Counter::TestCasesSkippedUnmapped,
        Counter::ExecutionsPosted,
        Counter::ExecutionsFailed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Counter::FilesProcessed => "importer.files_processed",
            Counter::TestCasesParsed => "importer.test_cases_parsed",
            Counter::TestCasesMapped => "importer.test_cases_mapped",
            Counter::TestCasesSkippedUnmapped => "importer.test_cases_skipped_unmapped",
            Counter::ExecutionsPosted => "aqua.executions_posted",
            Counter::ExecutionsFailed => "aqua.executions_failed",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

pub trait RunCounters: Send + Sync {
    fn add(&self, counter: Counter, value: u64);

    fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }
}

/// In-process counters that can be read back with [`AtomicCounters::get`].
#[derive(Debug, Default)]
pub struct AtomicCounters {
    values: [AtomicU64; 6],
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.slot()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        Counter::ALL
            .iter()
            .map(|counter| (counter.name(), self.get(*counter)))
            .collect()
    }
}

impl RunCounters for AtomicCounters {
    fn add(&self, counter: Counter, value: u64) {
        if value == 0 {
            return;
        }
        let total = self.values[counter.slot()].fetch_add(value, Ordering::Relaxed) + value;
        debug!(counter = counter.name(), value, total, "counter incremented");
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_name() {
        let counters = AtomicCounters::new();
        counters.increment(Counter::FilesProcessed);
        counters.add(Counter::TestCasesParsed, 4);
        counters.add(Counter::TestCasesParsed, 0);
        counters.add(Counter::ExecutionsFailed, 2);

        assert_eq!(counters.get(Counter::FilesProcessed), 1);
        assert_eq!(counters.get(Counter::TestCasesParsed), 4);
        assert_eq!(counters.get(Counter::ExecutionsPosted), 0);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), 6);
        assert!(snapshot.contains(&("aqua.executions_failed", 2)));
        assert!(snapshot.contains(&("importer.files_processed", 1)));
    }
}
