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

//! The table of running application pipelines.
//!
//! [`AppRunners`] maps application ids to [`Runner`]s and reconciles that table
//! against the store's current set of applications. Reconciliation passes are
//! serialized; every other operation works on an immutable snapshot of the
//! table, so readers never wait for a pass to finish.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{AppRunner, Runner};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, RunnerError, StoreError};
use crate::models::{App, Notification};
use crate::provider::ProviderSet;
use crate::reflect::Reflector;
use crate::store::{AppStore, Stores};

/// Builds the runner for a newly discovered application.
pub trait RunnerFactory: Send + Sync {
    fn create(&self, app: &App) -> Result<Arc<dyn Runner>, RunnerError>;
}

/// Builds [`AppRunner`]s, choosing the provider by the app's
/// [`ProviderKind`](crate::models::ProviderKind).
pub struct ProviderRunnerFactory {
    providers: ProviderSet,
    stores: Stores,
    reflector: Arc<dyn Reflector>,
    config: DaemonConfig,
}

impl ProviderRunnerFactory {
    pub fn new(
        providers: ProviderSet,
        stores: Stores,
        reflector: Arc<dyn Reflector>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            providers,
            stores,
            reflector,
            config,
        }
    }
}

impl RunnerFactory for ProviderRunnerFactory {
    fn create(&self, app: &App) -> Result<Arc<dyn Runner>, RunnerError> {
        let provider =
            self.providers
                .get(app.provider)
                .ok_or_else(|| RunnerError::UnsupportedProvider {
                    app: app.name.clone(),
                    kind: app.provider.to_string(),
                })?;
        Ok(Arc::new(AppRunner::new(
            app.clone(),
            provider,
            self.stores.clone(),
            self.reflector.clone(),
            self.config.clone(),
        )))
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Runners created and started for new applications.
    pub started: usize,
    /// Runners stopped because their application disappeared.
    pub stopped: usize,
    /// Existing runners updated from their application record.
    pub synced: usize,
    /// New applications whose runner could not be created or started.
    pub failed: usize,
}

type RunnerTable = HashMap<i64, Arc<dyn Runner>>;

/// Application id to runner table.
pub struct AppRunners {
    runners: RwLock<Arc<RunnerTable>>,
    sync_lock: tokio::sync::Mutex<()>,
    apps: Arc<dyn AppStore>,
    factory: Arc<dyn RunnerFactory>,
}

impl AppRunners {
    pub fn new(apps: Arc<dyn AppStore>, factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            runners: RwLock::new(Arc::new(HashMap::new())),
            sync_lock: tokio::sync::Mutex::new(()),
            apps,
            factory,
        }
    }

    fn snapshot(&self) -> Arc<RunnerTable> {
        self.runners.read().clone()
    }

    /// Runners ordered by application id.
    fn sorted(&self) -> Vec<Arc<dyn Runner>> {
        let snapshot = self.snapshot();
        let mut ids: Vec<i64> = snapshot.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| snapshot.get(&id).cloned())
            .collect()
    }

    /// Reconciles the table against the store's applications.
    ///
    /// New applications get a started runner, vanished ones are stopped and
    /// removed, and the rest receive their current record. Failures to build
    /// or start a runner are logged and counted; the app is retried on the
    /// next pass. A store error aborts the pass and leaves the table as is.
    pub async fn sync(&self) -> Result<SyncSummary, StoreError> {
        let _guard = self.sync_lock.lock().await;

        let apps = self.apps.list_all().await.map_err(|e| {
            error!("Failed to load apps for reconciliation: {}", e);
            e
        })?;

        let current = self.snapshot();
        let mut next: RunnerTable = (*current).clone();
        let mut summary = SyncSummary::default();
        let present: HashSet<i64> = apps.iter().map(|app| app.id).collect();

        for app in apps {
            if let Some(runner) = current.get(&app.id) {
                runner.sync(app).await;
                summary.synced += 1;
                continue;
            }

            let runner = match self.factory.create(&app) {
                Ok(runner) => runner,
                Err(e) => {
                    error!("Failed to create runner for app '{}': {}", app.name, e);
                    summary.failed += 1;
                    continue;
                }
            };
            match runner.start().await {
                Ok(()) => {
                    next.insert(app.id, runner);
                    summary.started += 1;
                }
                Err(e) => {
                    error!("Failed to start app '{}': {}", app.name, e);
                    summary.failed += 1;
                }
            }
        }

        let removed: Vec<Arc<dyn Runner>> = current
            .iter()
            .filter(|(id, _)| !present.contains(*id))
            .filter_map(|(id, _)| next.remove(id))
            .collect();

        *self.runners.write() = Arc::new(next);

        for runner in removed {
            info!("Stopping runner for removed app '{}'", runner.app_name());
            runner.stop().await;
            summary.stopped += 1;
        }

        debug!(
            "App reconciliation: {} started, {} stopped, {} synced, {} failed",
            summary.started, summary.stopped, summary.synced, summary.failed
        );
        Ok(summary)
    }

    /// Routes a notification to its application's runner.
    pub async fn enqueue(&self, notification: Notification) {
        let runner = self.snapshot().get(&notification.app_id).cloned();
        match runner {
            Some(runner) => runner.enqueue(notification).await,
            None => error!(
                "No such app '{}' for notification {}.",
                notification.app_id, notification.id
            ),
        }
    }

    pub fn get(&self, app_id: i64) -> Option<Arc<dyn Runner>> {
        self.snapshot().get(&app_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Application ids with a runner, ascending.
    pub fn app_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.snapshot().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runners with nothing queued and no delivery in progress.
    pub fn idle(&self) -> Vec<Arc<dyn Runner>> {
        self.sorted().into_iter().filter(|r| r.is_idle()).collect()
    }

    /// Waits until every runner is idle at the same time.
    pub async fn wait(&self) {
        loop {
            let runners = self.sorted();
            for runner in &runners {
                runner.wait_idle().await;
            }
            if self.sorted().iter().all(|r| r.is_idle()) {
                return;
            }
        }
    }

    /// [`AppRunners::wait`] bounded by `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), DaemonError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| DaemonError::WaitTimeout(timeout))
    }

    /// Stops every runner concurrently and empties the table.
    pub async fn stop(&self) {
        let _guard = self.sync_lock.lock().await;
        let runners = std::mem::replace(&mut *self.runners.write(), Arc::new(HashMap::new()));
        futures::future::join_all(runners.values().map(|runner| runner.stop())).await;
    }

    /// Status block for every runner, ordered by application id.
    pub fn debug_report(&self) -> String {
        self.sorted()
            .iter()
            .map(|runner| runner.debug_state().to_string())
            .collect()
    }

    /// Logs [`AppRunners::debug_report`] at info level.
    pub fn debug(&self) {
        for runner in self.sorted() {
            info!("Runner status{}", runner.debug_state());
        }
    }
}
