//! Rolling 5-minute event-count buckets, pushed into by the pipeline and the
//! position monitor alongside their own `tracing` calls. Shape follows
//! `monitoring_alerting.rs`'s push-based `record_error`/`update_*_metrics`
//! texture rather than intercepting the `tracing` subscriber directly.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use crate::constants::now_ms;

const BUCKET_WIDTH_MS: u64 = 5 * 60 * 1000;
const MAX_FINALIZED_BUCKETS: usize = 24; // 2 hours of history

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogBucket {
    pub bucket_start_ms: u64,
    pub info_count: u64,
    pub warn_count: u64,
    pub error_count: u64,
}

impl LogBucket {
    fn new(bucket_start_ms: u64) -> Self {
        Self { bucket_start_ms, info_count: 0, warn_count: 0, error_count: 0 }
    }

    fn record(&mut self, level: LogLevel) {
        match level {
            LogLevel::Info => self.info_count += 1,
            LogLevel::Warn => self.warn_count += 1,
            LogLevel::Error => self.error_count += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSummarySnapshot {
    pub current_bucket: LogBucket,
    pub finalized_buckets: Vec<LogBucket>,
}

pub struct LogSummaryRecorder {
    current: Mutex<LogBucket>,
    finalized: Mutex<VecDeque<LogBucket>>,
}

impl LogSummaryRecorder {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(LogBucket::new(bucket_start(now_ms()))),
            finalized: Mutex::new(VecDeque::with_capacity(MAX_FINALIZED_BUCKETS)),
        }
    }

    pub fn record(&self, level: LogLevel) {
        self.roll_if_needed();
        self.current.lock().record(level);
    }

    fn roll_if_needed(&self) {
        let now_bucket = bucket_start(now_ms());
        let mut current = self.current.lock();
        if current.bucket_start_ms != now_bucket {
            let finished = std::mem::replace(&mut *current, LogBucket::new(now_bucket));
            let mut finalized = self.finalized.lock();
            if finalized.len() >= MAX_FINALIZED_BUCKETS {
                finalized.pop_front();
            }
            finalized.push_back(finished);
        }
    }

    pub fn snapshot(&self, last_n: usize) -> LogSummarySnapshot {
        self.roll_if_needed();
        let current_bucket = self.current.lock().clone();
        let finalized = self.finalized.lock();
        let finalized_buckets = finalized.iter().rev().take(last_n).cloned().collect();
        LogSummarySnapshot { current_bucket, finalized_buckets }
    }

    pub fn compact_report(&self) -> String {
        let snapshot = self.snapshot(3);
        let current = &snapshot.current_bucket;
        format!(
            "current_bucket: info={} warn={} error={}; prior_buckets={}",
            current.info_count,
            current.warn_count,
            current.error_count,
            snapshot.finalized_buckets.len()
        )
    }
}

impl Default for LogSummaryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_start(ts_ms: u64) -> u64 {
    ts_ms - (ts_ms % BUCKET_WIDTH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_in_current_bucket() {
        let recorder = LogSummaryRecorder::new();
        recorder.record(LogLevel::Info);
        recorder.record(LogLevel::Info);
        recorder.record(LogLevel::Warn);
        let snapshot = recorder.snapshot(5);
        assert_eq!(snapshot.current_bucket.info_count, 2);
        assert_eq!(snapshot.current_bucket.warn_count, 1);
        assert_eq!(snapshot.current_bucket.error_count, 0);
    }

    #[test]
    fn compact_report_mentions_counts() {
        let recorder = LogSummaryRecorder::new();
        recorder.record(LogLevel::Error);
        let report = recorder.compact_report();
        assert!(report.contains("error=1"));
    }
}
