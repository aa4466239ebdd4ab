use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::STATS_HISTORY_SIZE;

/// Width of the requests-per-minute window (seconds).
const RPM_WINDOW_SECS: u64 = 60;

/// Errors stored in `last_error` are truncated to this many characters.
const MAX_ERROR_LEN: usize = 500;

/// Rolling request statistics for one proxied service.
///
/// `record` is the only mutator and runs O(1); it is called by the proxy
/// after every upstream response (or failure) completes.
#[derive(Debug, Default)]
pub struct ServiceStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_response_time_ms: u64,
    min_response_time_ms: Option<u64>,
    max_response_time_ms: Option<u64>,
    recent_response_times: VecDeque<u64>,
    requests_last_minute: VecDeque<Instant>,
    tokens_generated: u64,
    tokens_per_second_avg: f64,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of `ServiceStats`, served by the HTTP surface and
/// included in heartbeats. Field names match the wire format.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
    pub requests_per_minute: usize,
    pub tokens_generated: u64,
    /// Running mean of per-request token throughput. Token counts come from
    /// whitespace-splitting streamed text, so this is an approximation of the
    /// upstream tokenizer's rate.
    pub tokens_per_second_avg: f64,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(&mut self, duration_ms: u64, success: bool, error: Option<&str>, tokens: u64) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        self.total_response_time_ms += duration_ms;
        self.min_response_time_ms = Some(match self.min_response_time_ms {
            Some(min) => min.min(duration_ms),
            None => duration_ms,
        });
        self.max_response_time_ms = Some(match self.max_response_time_ms {
            Some(max) => max.max(duration_ms),
            None => duration_ms,
        });

        self.recent_response_times.push_back(duration_ms);
        while self.recent_response_times.len() > STATS_HISTORY_SIZE {
            self.recent_response_times.pop_front();
        }

        self.requests_last_minute.push_back(Instant::now());
        self.prune_window();

        if tokens > 0 {
            self.tokens_generated += tokens;
            let secs = (duration_ms as f64 / 1000.0).max(0.001);
            let current = tokens as f64 / secs;
            self.tokens_per_second_avg = if self.tokens_per_second_avg == 0.0 {
                current
            } else {
                (self.tokens_per_second_avg + current) / 2.0
            };
        }

        if !success {
            if let Some(message) = error {
                let mut truncated = message.to_string();
                truncated.truncate(MAX_ERROR_LEN);
                self.last_error = Some(truncated);
                self.last_error_time = Some(Utc::now());
            }
        }
    }

    /// Drop all counters and windows back to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Average of the recent-response window (0 when empty).
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.recent_response_times.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.recent_response_times.iter().sum();
        sum as f64 / self.recent_response_times.len() as f64
    }

    /// Success rate in percent; 100 when no requests have been seen.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 100.0;
        }
        self.successful_requests as f64 / self.total_requests as f64 * 100.0
    }

    /// Produce the wire-format snapshot, pruning the rpm window first.
    pub fn snapshot(&mut self) -> StatsSnapshot {
        self.prune_window();
        StatsSnapshot {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            success_rate: self.success_rate(),
            avg_response_time_ms: self.avg_response_time_ms(),
            min_response_time_ms: self.min_response_time_ms,
            max_response_time_ms: self.max_response_time_ms,
            requests_per_minute: self.requests_last_minute.len(),
            tokens_generated: self.tokens_generated,
            tokens_per_second_avg: self.tokens_per_second_avg,
            last_error: self.last_error.clone(),
            last_error_time: self.last_error_time,
        }
    }

    fn prune_window(&mut self) {
        let now = Instant::now();
        while let Some(oldest) = self.requests_last_minute.front() {
            if now.duration_since(*oldest).as_secs() >= RPM_WINDOW_SECS {
                self.requests_last_minute.pop_front();
            } else {
                break;
            }
        }
    }
}
