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

//! Per-application delivery pipelines.
//!
//! An [`AppRunner`] owns one [`DeliveryQueue`](super::DeliveryQueue), a pool of
//! [`DeliveryWorker`]s sized by the app's `connections` and, when the provider
//! has a feedback channel, one [`FeedbackReceiver`].

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AppContext, DeliveryWorker, FeedbackReceiver, StopSignal};
use crate::config::DaemonConfig;
use crate::error::{ConnectError, RunnerError};
use crate::models::{App, Notification};
use crate::provider::Provider;
use crate::reflect::{Event, Reflector};
use crate::store::Stores;

/// Snapshot of a runner for status dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerState {
    pub name: String,
    pub handlers: usize,
    pub queued: usize,
    pub idle: bool,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\n{}:\n  handlers: {}\n  queued: {}\n  idle: {}\n",
            self.name, self.handlers, self.queued, self.idle
        )
    }
}

/// A delivery pipeline for one application, as seen by the registry.
#[async_trait]
pub trait Runner: Send + Sync {
    fn app_id(&self) -> i64;

    fn app_name(&self) -> String;

    /// Connects and starts the pipeline.
    async fn start(&self) -> Result<(), RunnerError>;

    /// Hands a notification to the pipeline.
    ///
    /// Dropped, and left pending in the store, if the runner is stopped, has
    /// no workers or its queue is full. Only push mode waits for room.
    async fn enqueue(&self, notification: Notification);

    /// Applies an updated application record.
    async fn sync(&self, app: App);

    /// Stops the pipeline and waits for in-flight work to finish.
    async fn stop(&self);

    /// No queued notifications and no delivery in progress.
    fn is_idle(&self) -> bool;

    /// Whether the runner has workers to deliver what it is handed.
    fn in_service(&self) -> bool {
        true
    }

    async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn debug_state(&self) -> RunnerState;
}

/// Counts a worker as running until its task ends, however it ends.
///
/// When the last worker goes, buffered notifications are dropped from the
/// queue so the runner reads as idle; they stay pending in the store.
struct RunningWorker {
    exited: Arc<AtomicBool>,
    handlers: Arc<AtomicUsize>,
    context: Arc<AppContext>,
}

impl Drop for RunningWorker {
    fn drop(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
        if self.handlers.fetch_sub(1, Ordering::SeqCst) == 1 {
            let discarded = self.context.queue().discard();
            if discarded > 0 {
                warn!(
                    "No delivery workers left for app '{}'; {} queued notification(s) stay pending",
                    self.context.app_name(),
                    discarded
                );
            }
        }
    }
}

struct WorkerHandle {
    worker_id: Uuid,
    stop: StopSignal,
    exited: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    async fn join(self, app_name: &str) {
        if let Err(e) = self.handle.await {
            error!(
                "Worker {} for app '{}' panicked: {}",
                self.worker_id, app_name, e
            );
        }
    }
}

/// The default [`Runner`].
pub struct AppRunner {
    context: Arc<AppContext>,
    workers: tokio::sync::Mutex<Vec<WorkerHandle>>,
    handlers: Arc<AtomicUsize>,
    feedback: tokio::sync::Mutex<Option<(StopSignal, JoinHandle<()>)>>,
    stopped: AtomicBool,
}

impl AppRunner {
    pub fn new(
        app: App,
        provider: Arc<dyn Provider>,
        stores: Stores,
        reflector: Arc<dyn Reflector>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            context: Arc::new(AppContext::new(app, provider, stores, reflector, config)),
            workers: tokio::sync::Mutex::new(Vec::new()),
            handlers: Arc::new(AtomicUsize::new(0)),
            feedback: tokio::sync::Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Number of running delivery workers.
    pub fn handlers(&self) -> usize {
        self.handlers.load(Ordering::SeqCst)
    }

    fn spawn_worker(&self, worker: DeliveryWorker, stop: StopSignal) -> WorkerHandle {
        let worker_id = worker.worker_id();
        let exited = Arc::new(AtomicBool::new(false));
        self.handlers.fetch_add(1, Ordering::SeqCst);
        let running = RunningWorker {
            exited: exited.clone(),
            handlers: self.handlers.clone(),
            context: self.context.clone(),
        };
        let handle = tokio::spawn(async move {
            let _running = running;
            worker.run().await;
        });
        WorkerHandle {
            worker_id,
            stop,
            exited,
            handle,
        }
    }

    /// Builds a worker and makes one connection attempt before spawning it.
    ///
    /// Fatal errors are returned and nothing is spawned. Transient ones are
    /// logged and left to the worker's reconnect loop.
    async fn connect_worker(&self, index: usize) -> Result<WorkerHandle, ConnectError> {
        let stop = StopSignal::new();
        let mut worker = DeliveryWorker::new(index, self.context.clone(), stop.clone());
        match worker.connect().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(
                "Worker {} for app '{}' could not connect yet, will retry: {}",
                index,
                self.context.app_name(),
                e
            ),
        }
        Ok(self.spawn_worker(worker, stop))
    }

    async fn stop_workers(&self, workers: Vec<WorkerHandle>) {
        for worker in &workers {
            worker.stop.stop();
        }
        let app_name = self.context.app_name();
        for worker in workers {
            worker.join(&app_name).await;
        }
    }

    /// Joins workers that already exited, after a fatal connection error.
    async fn prune_finished(&self, workers: &mut Vec<WorkerHandle>) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(workers)
            .into_iter()
            .partition(|worker| worker.exited.load(Ordering::SeqCst));
        *workers = running;
        if finished.is_empty() {
            return;
        }
        let app_name = self.context.app_name();
        info!(
            "Replacing {} stopped worker(s) for app '{}'",
            finished.len(),
            app_name
        );
        for worker in finished {
            worker.join(&app_name).await;
        }
    }

    async fn start_feedback(&self) {
        if !self.context.provider().supports_feedback() {
            return;
        }
        let stop = StopSignal::new();
        let receiver = FeedbackReceiver::new(self.context.clone(), stop.clone());
        let handle = tokio::spawn(receiver.run());
        *self.feedback.lock().await = Some((stop, handle));
    }

    async fn resize(&self, workers: &mut Vec<WorkerHandle>, target: usize) {
        let current = workers.len();
        if target > current {
            info!(
                "Growing pool for app '{}' from {} to {} connections",
                self.context.app_name(),
                current,
                target
            );
            for index in current..target {
                match self.connect_worker(index).await {
                    Ok(worker) => workers.push(worker),
                    Err(e) => {
                        error!(
                            "Worker {} for app '{}' could not connect: {}; retrying on the next sync",
                            index,
                            self.context.app_name(),
                            e
                        );
                        self.context.reflect(Event::ConnectionFailed {
                            app_id: self.context.app_id(),
                            app_name: self.context.app_name(),
                            fatal: true,
                            error: e.to_string(),
                        });
                        break;
                    }
                }
            }
        } else if target < current {
            info!(
                "Shrinking pool for app '{}' from {} to {} connections",
                self.context.app_name(),
                current,
                target
            );
            let removed = workers.split_off(target);
            self.stop_workers(removed).await;
        }
    }
}

#[async_trait]
impl Runner for AppRunner {
    fn app_id(&self) -> i64 {
        self.context.app_id()
    }

    fn app_name(&self) -> String {
        self.context.app_name()
    }

    async fn start(&self) -> Result<(), RunnerError> {
        let app = self.context.app();
        let mut workers = self.workers.lock().await;

        for index in 0..app.pool_size() {
            match self.connect_worker(index).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    let spawned = std::mem::take(&mut *workers);
                    self.stop_workers(spawned).await;
                    return Err(RunnerError::Connect {
                        app: app.name.clone(),
                        source: e,
                    });
                }
            }
        }
        drop(workers);

        self.start_feedback().await;

        info!(
            "Started app '{}' with {} connection(s)",
            app.name,
            app.pool_size()
        );
        self.context.reflect(Event::RunnerStarted {
            app_id: app.id,
            app_name: app.name,
        });
        Ok(())
    }

    async fn enqueue(&self, notification: Notification) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(
                "Runner for app '{}' is stopped; dropping notification {}",
                self.context.app_name(),
                notification.id
            );
            return;
        }
        if !self.in_service() {
            debug!(
                "App '{}' has no delivery workers; notification {} stays pending",
                self.context.app_name(),
                notification.id
            );
            return;
        }
        let id = notification.id;
        let queued = if self.context.config().push() {
            self.context.queue().push(notification).await
        } else {
            self.context.queue().try_push(notification)
        };
        if let Err(e) = queued {
            debug!(
                "Not queueing notification {} for app '{}' ({}); it stays pending",
                id,
                self.context.app_name(),
                e
            );
        }
    }

    async fn sync(&self, app: App) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let target = app.pool_size();
        let name = app.name.clone();
        if self.context.update_app(app) {
            info!(
                "Credentials changed for app '{}'; connections will be re-established",
                name
            );
        }

        let mut workers = self.workers.lock().await;
        self.prune_finished(&mut workers).await;
        self.resize(&mut workers, target).await;
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.context.queue().stop();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        self.stop_workers(workers).await;

        if let Some((stop, handle)) = self.feedback.lock().await.take() {
            stop.stop();
            if let Err(e) = handle.await {
                error!(
                    "Feedback receiver for app '{}' panicked: {}",
                    self.context.app_name(),
                    e
                );
            }
        }

        info!("Stopped app '{}'", self.context.app_name());
        self.context.reflect(Event::RunnerStopped {
            app_id: self.context.app_id(),
            app_name: self.context.app_name(),
        });
    }

    fn is_idle(&self) -> bool {
        !self.in_service() || self.context.queue().is_idle()
    }

    fn in_service(&self) -> bool {
        self.handlers() > 0
    }

    async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::select! {
                _ = self.context.queue().wait_idle() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    fn debug_state(&self) -> RunnerState {
        RunnerState {
            name: self.context.app_name(),
            handlers: self.handlers(),
            queued: self.context.queue().len(),
            idle: self.is_idle(),
        }
    }
}

impl fmt::Debug for AppRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRunner")
            .field("app_id", &self.context.app_id())
            .field("state", &self.debug_state())
            .finish()
    }
}
