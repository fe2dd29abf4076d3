// Copyright 2025 Modalith (https://github.com/modalith)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Pure batch-sizing and admission policies for the edge gateway.

use serde::{Deserialize, Serialize};

/// Piecewise-linear batch tuning between two backlog watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveBatchPolicy {
    pub min_batch: u32,
    pub max_batch: u32,
    pub low_watermark: u64,
    pub high_watermark: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for AdaptiveBatchPolicy {
    fn default() -> Self {
        Self {
            min_batch: 1,
            max_batch: 50,
            low_watermark: 10,
            high_watermark: 100,
            min_delay_ms: 0,
            max_delay_ms: 2000,
        }
    }
}

impl AdaptiveBatchPolicy {
    /// `(batch_size, delay_ms)` for the given backlog. A latency hint adds a
    /// quarter of the average latency to the delay, clamped at the maximum.
    pub fn tune(&self, backlog: u64, avg_latency_ms: Option<f64>) -> (u32, u64) {
        let (mut batch, mut delay) = if backlog <= self.low_watermark {
            (self.min_batch, self.min_delay_ms)
        } else if backlog >= self.high_watermark {
            (self.max_batch, self.max_delay_ms)
        } else {
            let span = (self.high_watermark - self.low_watermark) as f64;
            let ratio = (backlog - self.low_watermark) as f64 / span;
            let batch =
                self.min_batch as f64 + ratio * (self.max_batch as f64 - self.min_batch as f64);
            let delay = self.min_delay_ms as f64
                + ratio * (self.max_delay_ms as f64 - self.min_delay_ms as f64);
            (batch as u32, delay as u64)
        };

        if let Some(latency) = avg_latency_ms {
            if latency > 0.0 {
                delay = delay
                    .saturating_add((latency * 0.25) as u64)
                    .min(self.max_delay_ms);
            }
        }

        batch = batch.clamp(self.min_batch, self.max_batch);
        delay = delay.clamp(self.min_delay_ms, self.max_delay_ms);
        (batch, delay)
    }
}

/// Admission control ahead of the request body read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressurePolicy {
    pub max_backlog: u64,
    pub hard_limit: u64,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self {
            max_backlog: 1000,
            hard_limit: 2000,
        }
    }
}

impl BackpressurePolicy {
    pub fn should_accept(&self, backlog: u64) -> bool {
        if backlog >= self.hard_limit {
            return false;
        }
        backlog < self.max_backlog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tune_pins_at_watermarks() {
        let policy = AdaptiveBatchPolicy::default();
        assert_eq!(policy.tune(0, None), (1, 0));
        assert_eq!(policy.tune(10, None), (1, 0));
        assert_eq!(policy.tune(100, None), (50, 2000));
        assert_eq!(policy.tune(5000, None), (50, 2000));
    }

    #[test]
    fn tune_interpolates_between_watermarks() {
        let policy = AdaptiveBatchPolicy::default();
        let (batch, delay) = policy.tune(55, None);
        assert!(batch > 1 && batch < 50);
        assert!(delay > 0 && delay < 2000);
    }

    #[test]
    fn latency_hint_adds_quarter_clamped() {
        let policy = AdaptiveBatchPolicy::default();
        let (_, delay) = policy.tune(0, Some(400.0));
        assert_eq!(delay, 100);
        let (_, delay) = policy.tune(100, Some(100_000.0));
        assert_eq!(delay, policy.max_delay_ms);
    }

    #[test]
    fn should_accept_respects_limits() {
        let policy = BackpressurePolicy {
            max_backlog: 5,
            hard_limit: 10,
        };
        assert!(policy.should_accept(0));
        assert!(policy.should_accept(4));
        assert!(!policy.should_accept(5));
        assert!(!policy.should_accept(10));
        assert!(!policy.should_accept(500));
    }

    proptest! {
        // Accepting a backlog implies accepting every smaller backlog.
        #[test]
        fn backpressure_is_monotonic(backlog in 0u64..10_000, smaller in 0u64..10_000) {
            let policy = BackpressurePolicy::default();
            if policy.should_accept(backlog) && smaller <= backlog {
                prop_assert!(policy.should_accept(smaller));
            }
        }

        #[test]
        fn tuned_values_stay_in_bounds(
            backlog in 0u64..1_000_000,
            latency in proptest::option::of(0.0f64..1e6),
        ) {
            let policy = AdaptiveBatchPolicy::default();
            let (batch, delay) = policy.tune(backlog, latency);
            prop_assert!(batch >= policy.min_batch && batch <= policy.max_batch);
            prop_assert!(delay >= policy.min_delay_ms && delay <= policy.max_delay_ms);
        }

        #[test]
        fn batch_grows_with_backlog(a in 0u64..10_000, b in 0u64..10_000) {
            let policy = AdaptiveBatchPolicy::default();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let (batch_low, _) = policy.tune(low, None);
            let (batch_high, _) = policy.tune(high, None);
            prop_assert!(batch_low <= batch_high);
        }
    }
}
