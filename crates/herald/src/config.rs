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

//! Configuration for the delivery daemon.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for the daemon, its feeder and every app runner.
///
/// # Construction
///
/// ```rust,ignore
/// let config = DaemonConfig::builder()
///     .batch_size(500)
///     .push_poll(Duration::from_secs(1))
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DaemonConfig {
    batch_size: usize,
    push_poll: Duration,
    push: bool,
    embedded: bool,
    feedback_poll: Duration,
    sync_interval: Duration,
    queue_capacity: usize,
    delivery_timeout: Duration,
    max_retries: i32,
    reconnect_policy: RetryPolicy,
    store_retry_policy: RetryPolicy,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfigBuilder::default().build()
    }
}

impl DaemonConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    /// Maximum notifications fetched per feed pass (ignored in push mode).
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sleep between feed passes in loop mode.
    pub fn push_poll(&self) -> Duration {
        self.push_poll
    }

    /// Run exactly one feed pass, without a batch limit.
    pub fn push(&self) -> bool {
        self.push
    }

    /// Run the feeder loop on a background task.
    pub fn embedded(&self) -> bool {
        self.embedded
    }

    /// Interval between feedback channel checks.
    pub fn feedback_poll(&self) -> Duration {
        self.feedback_poll
    }

    /// Interval of the periodic app reconciliation. Zero disables it.
    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    /// Capacity of each app's delivery queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Upper bound for one delivery attempt.
    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Transport failures tolerated before a notification is marked failed.
    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Attempts made by the feeder after a store connection error.
    pub fn store_retry_attempts(&self) -> u32 {
        self.store_retry_policy.max_attempts
    }

    /// Backoff used when a worker reconnects to its gateway.
    pub fn reconnect_policy(&self) -> &RetryPolicy {
        &self.reconnect_policy
    }

    /// Backoff used between store reconnect attempts.
    pub fn store_retry_policy(&self) -> &RetryPolicy {
        &self.store_retry_policy
    }
}

/// Builder for [`DaemonConfig`].
#[derive(Debug, Clone)]
pub struct DaemonConfigBuilder {
    config: DaemonConfig,
}

impl Default for DaemonConfigBuilder {
    fn default() -> Self {
        Self {
            config: DaemonConfig {
                batch_size: 5000,
                push_poll: Duration::from_secs(2),
                push: false,
                embedded: false,
                feedback_poll: Duration::from_secs(60),
                sync_interval: Duration::from_secs(60),
                queue_capacity: 1000,
                delivery_timeout: Duration::from_secs(30),
                max_retries: 3,
                reconnect_policy: RetryPolicy::default(),
                store_retry_policy: RetryPolicy {
                    max_attempts: 3,
                    initial_delay: Duration::from_millis(500),
                    max_delay: Duration::from_secs(10),
                    ..RetryPolicy::default()
                },
            },
        }
    }
}

impl DaemonConfigBuilder {
    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    pub fn push_poll(mut self, value: Duration) -> Self {
        self.config.push_poll = value;
        self
    }

    pub fn push(mut self, value: bool) -> Self {
        self.config.push = value;
        self
    }

    pub fn embedded(mut self, value: bool) -> Self {
        self.config.embedded = value;
        self
    }

    pub fn feedback_poll(mut self, value: Duration) -> Self {
        self.config.feedback_poll = value;
        self
    }

    /// Sets the reconciliation interval; `Duration::ZERO` turns the timer off.
    pub fn sync_interval(mut self, value: Duration) -> Self {
        self.config.sync_interval = value;
        self
    }

    /// Sets the queue capacity. Values below 1 are raised to 1.
    pub fn queue_capacity(mut self, value: usize) -> Self {
        self.config.queue_capacity = value.max(1);
        self
    }

    pub fn delivery_timeout(mut self, value: Duration) -> Self {
        self.config.delivery_timeout = value;
        self
    }

    /// Sets the retry ceiling. Values below 1 are raised to 1.
    pub fn max_retries(mut self, value: i32) -> Self {
        self.config.max_retries = value.max(1);
        self
    }

    /// Sets `max_attempts` on the store retry policy.
    pub fn store_retry_attempts(mut self, value: u32) -> Self {
        self.config.store_retry_policy.max_attempts = value;
        self
    }

    pub fn reconnect_policy(mut self, value: RetryPolicy) -> Self {
        self.config.reconnect_policy = value;
        self
    }

    pub fn store_retry_policy(mut self, value: RetryPolicy) -> Self {
        self.config.store_retry_policy = value;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DaemonConfig {
        self.config
    }
}
