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

//! The producer: polls the store and hands eligible notifications to idle runners.
//!
//! Only runners that are idle when a pass begins receive notifications. A
//! runner still working through its previous batch is skipped; its
//! notifications stay pending and are reconsidered on the next pass, so no
//! queue grows ahead of a slow gateway. A pass hands each runner at most one
//! queue's worth, so it never waits on any single application.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AppRunners, StopSignal};
use crate::config::DaemonConfig;
use crate::error::StoreError;
use crate::reflect::{Event, Reflector};
use crate::store::NotificationStore;

pub struct Feeder {
    registry: Arc<AppRunners>,
    notifications: Arc<dyn NotificationStore>,
    reflector: Arc<dyn Reflector>,
    config: DaemonConfig,
    stop: StopSignal,
}

impl Feeder {
    pub fn new(
        registry: Arc<AppRunners>,
        notifications: Arc<dyn NotificationStore>,
        reflector: Arc<dyn Reflector>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            registry,
            notifications,
            reflector,
            config,
            stop: StopSignal::new(),
        }
    }

    /// Starts feeding according to the configured mode.
    ///
    /// - push mode: runs a single pass and returns `None`;
    /// - embedded mode: spawns the loop and returns its handle;
    /// - otherwise: runs the loop on the caller's task until stopped.
    pub async fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.push() {
            self.feed_once().await;
            return None;
        }

        if self.config.embedded() {
            let feeder = self.clone();
            return Some(tokio::spawn(async move { feeder.feed_forever().await }));
        }

        self.feed_forever().await;
        None
    }

    /// Feeds until stopped, sleeping `push_poll` between passes.
    pub async fn feed_forever(&self) {
        info!("Feeder started (poll every {:?})", self.config.push_poll());
        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.feed_once().await;
            if !self.stop.sleep(self.config.push_poll()).await {
                break;
            }
        }
        info!("Feeder stopped");
    }

    /// One pass, reconnecting to the store and retrying on connection errors.
    pub async fn feed_once(&self) -> usize {
        let policy = self.config.store_retry_policy();
        let mut attempt = 0;
        loop {
            match self.enqueue_notifications().await {
                Ok(count) => return count,
                Err(e) if e.is_connection() && policy.should_retry(attempt) => {
                    attempt += 1;
                    let delay = policy.calculate_delay(attempt);
                    warn!(
                        "Lost connection to the store ({}); reconnecting, attempt {} of {}",
                        e,
                        attempt,
                        policy.max_attempts
                    );
                    if let Err(e) = self.notifications.reconnect().await {
                        warn!("Store reconnect failed: {}", e);
                    }
                    if !self.stop.sleep(delay).await {
                        return 0;
                    }
                }
                Err(e) => {
                    error!("Error enqueuing notifications: {}", e);
                    return 0;
                }
            }
        }
    }

    /// Enqueues every eligible notification whose runner is idle.
    ///
    /// Returns the number of notifications enqueued.
    pub async fn enqueue_notifications(&self) -> Result<usize, StoreError> {
        let idle: HashSet<i64> = self
            .registry
            .idle()
            .iter()
            .filter(|runner| runner.in_service())
            .map(|runner| runner.app_id())
            .collect();
        if idle.is_empty() {
            debug!("No idle runners; skipping feed pass");
            return Ok(0);
        }

        let limit = if self.config.push() {
            None
        } else {
            Some(self.config.batch_size())
        };
        let notifications = self.notifications.list_eligible(limit).await?;

        // A push pass hands over everything and lets the queues apply backpressure.
        let capacity = if self.config.push() {
            usize::MAX
        } else {
            self.config.queue_capacity()
        };
        let mut handed: HashMap<i64, usize> = HashMap::new();
        let mut deferred = 0;
        let mut enqueued = 0;
        for notification in notifications {
            if !idle.contains(&notification.app_id) {
                continue;
            }
            let count = handed.entry(notification.app_id).or_default();
            if *count >= capacity {
                deferred += 1;
                continue;
            }
            *count += 1;
            self.reflector.reflect(&Event::NotificationEnqueued {
                notification_id: notification.id,
                app_id: notification.app_id,
            });
            self.registry.enqueue(notification).await;
            enqueued += 1;
        }

        if enqueued > 0 {
            debug!("Enqueued {} notification(s)", enqueued);
        }
        if deferred > 0 {
            debug!("Deferred {} notification(s) to a later pass", deferred);
        }
        Ok(enqueued)
    }

    /// Stops the loop, interrupting its sleep.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{Runner, RunnerFactory, RunnerState};
    use crate::error::RunnerError;
    use crate::models::{
        App, Credentials, Environment, NewApp, NewNotification, Notification, ProviderKind,
    };
    use crate::reflect::TracingReflector;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingRunner {
        app_id: i64,
        busy: AtomicBool,
        out_of_service: AtomicBool,
        enqueued: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        fn app_id(&self) -> i64 {
            self.app_id
        }

        fn app_name(&self) -> String {
            format!("app-{}", self.app_id)
        }

        async fn start(&self) -> Result<(), RunnerError> {
            Ok(())
        }

        async fn enqueue(&self, notification: Notification) {
            self.enqueued.lock().push(notification.id);
        }

        async fn sync(&self, _app: App) {}

        async fn stop(&self) {}

        fn is_idle(&self) -> bool {
            !self.busy.load(Ordering::SeqCst)
        }

        fn in_service(&self) -> bool {
            !self.out_of_service.load(Ordering::SeqCst)
        }

        fn debug_state(&self) -> RunnerState {
            RunnerState {
                name: self.app_name(),
                handlers: 1,
                queued: 0,
                idle: self.is_idle(),
            }
        }
    }

    #[derive(Default)]
    struct Factory(Mutex<HashMap<i64, Arc<RecordingRunner>>>);

    impl RunnerFactory for Factory {
        fn create(&self, app: &App) -> Result<Arc<dyn Runner>, RunnerError> {
            let runner = Arc::new(RecordingRunner {
                app_id: app.id,
                ..Default::default()
            });
            self.0.lock().insert(app.id, runner.clone());
            Ok(runner as Arc<dyn Runner>)
        }
    }

    /// Wraps a store, failing `list_eligible` with a connection error a set
    /// number of times.
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        failures: AtomicUsize,
        queries: Mutex<Vec<Option<usize>>>,
        reconnects: AtomicUsize,
    }

    #[async_trait]
    impl NotificationStore for FlakyStore {
        async fn list_eligible(
            &self,
            limit: Option<usize>,
        ) -> Result<Vec<Notification>, StoreError> {
            self.queries.lock().push(limit);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Connection("server has gone away".into()));
            }
            self.inner.list_eligible(limit).await
        }

        async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.mark_delivered(id, at).await
        }

        async fn mark_failed(
            &self,
            id: i64,
            code: Option<i32>,
            description: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.mark_failed(id, code, description, at).await
        }

        async fn increment_retry(&self, id: i64) -> Result<i32, StoreError> {
            self.inner.increment_retry(id).await
        }

        async fn reconnect(&self) -> Result<(), StoreError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        flaky: Arc<FlakyStore>,
        factory: Arc<Factory>,
        app: App,
        registry: Arc<AppRunners>,
    }

    async fn fixture(failures: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let app = store.insert_app(NewApp {
            name: "my_app".into(),
            provider: ProviderKind::Apns,
            environment: Environment::Sandbox,
            credentials: Credentials::ApiKey("key".into()),
            connections: 1,
        });
        let factory = Arc::new(Factory::default());
        let registry = Arc::new(AppRunners::new(store.clone(), factory.clone()));
        registry.sync().await.unwrap();
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            failures: AtomicUsize::new(failures),
            queries: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
        });
        Fixture {
            store,
            flaky,
            factory,
            app,
            registry,
        }
    }

    fn feeder(f: &Fixture, config: DaemonConfig) -> Arc<Feeder> {
        Arc::new(Feeder::new(
            f.registry.clone(),
            f.flaky.clone(),
            Arc::new(TracingReflector),
            config,
        ))
    }

    fn loop_config() -> DaemonConfig {
        DaemonConfig::builder()
            .push_poll(Duration::from_millis(10))
            .store_retry_policy(crate::retry::RetryPolicy::immediate(3))
            .build()
    }

    fn enqueued(f: &Fixture) -> Vec<i64> {
        f.factory.0.lock()[&f.app.id].enqueued.lock().clone()
    }

    #[tokio::test]
    async fn test_enqueues_eligible_notifications_oldest_first() {
        let f = fixture(0).await;
        let now = Utc::now();
        let plain = f
            .store
            .insert_notification(NewNotification::new(f.app.id, "a".repeat(64), json!({})));
        let past = f.store.insert_notification(
            NewNotification::new(f.app.id, "a".repeat(64), json!({}))
                .deliver_after(now - ChronoDuration::hours(1)),
        );
        f.store.insert_notification(
            NewNotification::new(f.app.id, "a".repeat(64), json!({}))
                .deliver_after(now + ChronoDuration::hours(1)),
        );

        let count = feeder(&f, loop_config())
            .enqueue_notifications()
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(enqueued(&f), vec![plain.id, past.id]);
    }

    #[tokio::test]
    async fn test_skips_delivered_and_failed_notifications() {
        let f = fixture(0).await;
        let delivered = f
            .store
            .insert_notification(NewNotification::new(f.app.id, "aa", json!({})));
        f.store
            .mark_delivered(delivered.id, Utc::now())
            .await
            .unwrap();
        let failed = f
            .store
            .insert_notification(NewNotification::new(f.app.id, "aa", json!({})));
        f.store
            .mark_failed(failed.id, None, "bork", Utc::now())
            .await
            .unwrap();

        feeder(&f, loop_config())
            .enqueue_notifications()
            .await
            .unwrap();
        assert!(enqueued(&f).is_empty());
    }

    #[tokio::test]
    async fn test_busy_runner_is_skipped_until_idle() {
        let f = fixture(0).await;
        let n = f
            .store
            .insert_notification(NewNotification::new(f.app.id, "aa", json!({})));
        let runner = f.factory.0.lock()[&f.app.id].clone();
        let feeder = feeder(&f, loop_config());

        runner.busy.store(true, Ordering::SeqCst);
        assert_eq!(feeder.enqueue_notifications().await.unwrap(), 0);
        assert!(enqueued(&f).is_empty());

        runner.busy.store(false, Ordering::SeqCst);
        assert_eq!(feeder.enqueue_notifications().await.unwrap(), 1);
        assert_eq!(enqueued(&f), vec![n.id]);
    }

    #[tokio::test]
    async fn test_batches_are_limited_unless_in_push_mode() {
        let f = fixture(0).await;
        feeder(&f, loop_config())
            .enqueue_notifications()
            .await
            .unwrap();
        feeder(&f, DaemonConfig::builder().push(true).build())
            .enqueue_notifications()
            .await
            .unwrap();

        assert_eq!(*f.flaky.queries.lock(), vec![Some(5000), None]);
    }

    #[tokio::test]
    async fn test_each_runner_gets_at_most_one_queue_per_pass() {
        let f = fixture(0).await;
        let ids: Vec<i64> = (0..5)
            .map(|_| {
                f.store
                    .insert_notification(NewNotification::new(f.app.id, "aa", json!({})))
                    .id
            })
            .collect();
        let config = DaemonConfig::builder().queue_capacity(2).build();

        let count = feeder(&f, config).enqueue_notifications().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(enqueued(&f), ids[..2].to_vec());
    }

    #[tokio::test]
    async fn test_runner_without_workers_is_not_fed() {
        let f = fixture(0).await;
        f.store
            .insert_notification(NewNotification::new(f.app.id, "aa", json!({})));
        let runner = f.factory.0.lock()[&f.app.id].clone();
        runner.out_of_service.store(true, Ordering::SeqCst);

        let count = feeder(&f, loop_config())
            .enqueue_notifications()
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(enqueued(&f).is_empty());
    }

    #[tokio::test]
    async fn test_push_mode_runs_a_single_pass() {
        let f = fixture(0).await;
        let n = f
            .store
            .insert_notification(NewNotification::new(f.app.id, "aa", json!({})));

        let handle = feeder(&f, DaemonConfig::builder().push(true).build())
            .start()
            .await;
        assert!(handle.is_none());
        assert_eq!(f.flaky.queries.lock().len(), 1);
        assert_eq!(enqueued(&f), vec![n.id]);
    }

    #[tokio::test]
    async fn test_embedded_mode_runs_in_background_until_stopped() {
        let f = fixture(0).await;
        let config = DaemonConfig::builder()
            .embedded(true)
            .push_poll(Duration::from_millis(10))
            .build();
        let feeder = feeder(&f, config);

        let handle = feeder.clone().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(f.flaky.queries.lock().len() >= 2);

        feeder.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_interrupts_a_long_poll() {
        let f = fixture(0).await;
        let config = DaemonConfig::builder()
            .push_poll(Duration::from_secs(3600))
            .build();
        let feeder = feeder(&f, config);

        let running = {
            let feeder = feeder.clone();
            tokio::spawn(async move { feeder.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        feeder.stop();

        let handle = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_none());
        assert!(feeder.is_stopped());
    }

    #[tokio::test]
    async fn test_connection_errors_reconnect_and_retry() {
        let f = fixture(2).await;
        let n = f
            .store
            .insert_notification(NewNotification::new(f.app.id, "aa", json!({})));

        let count = feeder(&f, loop_config()).feed_once().await;
        assert_eq!(count, 1);
        assert_eq!(f.flaky.reconnects.load(Ordering::SeqCst), 2);
        assert_eq!(enqueued(&f), vec![n.id]);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_gives_up_after_retry_attempts_and_logs() {
        let f = fixture(10).await;
        let count = feeder(&f, loop_config()).feed_once().await;

        assert_eq!(count, 0);
        assert_eq!(f.flaky.reconnects.load(Ordering::SeqCst), 3);
        assert!(logs_contain("Error enqueuing notifications"));
        assert!(logs_contain("server has gone away"));
    }
}
