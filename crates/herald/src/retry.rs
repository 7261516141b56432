/*
 *  Copyright 2025 Herald Developers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Backoff policies for reconnecting to gateways and the backing store.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between consecutive attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// The same delay before every attempt.
    Fixed,
    /// `initial_delay * multiplier * attempt`.
    Linear { multiplier: f64 },
    /// `initial_delay * multiplier * base^(attempt - 1)`.
    Exponential { base: f64, multiplier: f64 },
}

/// Retry configuration: how many attempts and how long to wait between them.
///
/// `max_attempts` bounds operations that give up (store reconnects, see
/// [`should_retry`](Self::should_retry)); gateway reconnection for transient
/// errors ignores it and retries until stopped, using only the delay curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_strategy: BackoffStrategy,
    /// Randomize each delay by up to ±25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_strategy: BackoffStrategy::Exponential {
                base: 2.0,
                multiplier: 1.0,
            },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_strategy: BackoffStrategy::Fixed,
            jitter: false,
        }
    }

    /// Delay to wait before the given attempt (1-based), capped at `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = self.initial_delay.as_secs_f64();

        let raw = match &self.backoff_strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear { multiplier } => initial * multiplier * attempt as f64,
            BackoffStrategy::Exponential { base, multiplier } => {
                initial * multiplier * base.powi(attempt as i32 - 1)
            }
        };

        let capped = raw.min(self.max_delay.as_secs_f64()).max(0.0);

        let delayed = if self.jitter && capped > 0.0 {
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(delayed)
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
