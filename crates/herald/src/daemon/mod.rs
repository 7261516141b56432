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

//! The delivery engine.
//!
//! [`Daemon`] composes the pieces: an [`AppRunners`] registry reconciled against
//! the store (once at start and then every `sync_interval`), and a [`Feeder`]
//! that moves eligible notifications into idle runners.

mod app_runner;
mod connection;
mod context;
mod delivery_queue;
mod feeder;
mod feedback;
mod registry;
mod signal;

pub use app_runner::{AppRunner, Runner, RunnerState};
pub use connection::{DeliveryOutcome, DeliveryWorker, DEVICE_TOKEN_INVALIDATED};
pub use context::AppContext;
pub use delivery_queue::DeliveryQueue;
pub use feeder::Feeder;
pub use feedback::FeedbackReceiver;
pub use registry::{AppRunners, ProviderRunnerFactory, RunnerFactory, SyncSummary};
pub use signal::StopSignal;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::provider::ProviderSet;
use crate::reflect::Reflector;
use crate::store::Stores;

/// A running delivery engine.
///
/// In loop mode [`Daemon::start`] feeds on the caller's task until
/// [`Daemon::shutdown`] is called from elsewhere; share the daemon through an
/// `Arc` in that case. Embedded mode feeds on a background task and returns
/// immediately. Push mode runs one feed pass and waits for every runner to go
/// idle.
pub struct Daemon {
    config: DaemonConfig,
    stores: Stores,
    registry: Arc<AppRunners>,
    feeder: Arc<Feeder>,
    sync_stop: StopSignal,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    /// Creates a daemon building [`AppRunner`]s from `providers`.
    pub fn new(
        config: DaemonConfig,
        stores: Stores,
        providers: ProviderSet,
        reflector: Arc<dyn Reflector>,
    ) -> Self {
        let factory = Arc::new(ProviderRunnerFactory::new(
            providers,
            stores.clone(),
            reflector.clone(),
            config.clone(),
        ));
        Self::with_factory(config, stores, factory, reflector)
    }

    /// Creates a daemon with a custom runner factory.
    pub fn with_factory(
        config: DaemonConfig,
        stores: Stores,
        factory: Arc<dyn RunnerFactory>,
        reflector: Arc<dyn Reflector>,
    ) -> Self {
        let registry = Arc::new(AppRunners::new(stores.apps.clone(), factory));
        let feeder = Arc::new(Feeder::new(
            registry.clone(),
            stores.notifications.clone(),
            reflector,
            config.clone(),
        ));
        Self {
            config,
            stores,
            registry,
            feeder,
            sync_stop: StopSignal::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn registry(&self) -> &Arc<AppRunners> {
        &self.registry
    }

    pub fn feeder(&self) -> &Arc<Feeder> {
        &self.feeder
    }

    /// Reconciles runners, starts the reconciliation timer and the feeder.
    pub async fn start(&self) -> Result<(), DaemonError> {
        let summary = self.registry.sync().await?;
        info!(
            "Daemon starting with {} app(s) ({} failed to start)",
            self.registry.len(),
            summary.failed
        );

        self.start_sync_timer().await;

        if self.config.push() {
            self.feeder.clone().start().await;
            self.registry.wait().await;
            return Ok(());
        }

        if let Some(handle) = self.feeder.clone().start().await {
            self.tasks.lock().await.push(handle);
        }
        Ok(())
    }

    async fn start_sync_timer(&self) {
        let interval = self.config.sync_interval();
        if interval.is_zero() {
            return;
        }
        let registry = self.registry.clone();
        let stop = self.sync_stop.clone();
        let handle = tokio::spawn(async move {
            while stop.sleep(interval).await {
                if let Err(e) = registry.sync().await {
                    warn!("Periodic app reconciliation failed: {}", e);
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Stops the feeder and the reconciliation timer, then every runner.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.feeder.stop();
        self.sync_stop.stop();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task panicked: {}", e);
            }
        }

        self.registry.stop().await;
        info!("Shutdown complete");
    }
}
