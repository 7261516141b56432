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

//! State shared by everything that works on behalf of one application.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::DeliveryQueue;
use crate::config::DaemonConfig;
use crate::models::App;
use crate::provider::Provider;
use crate::reflect::{Event, Reflector};
use crate::store::Stores;

/// Per-application context handed to delivery workers and the feedback receiver.
///
/// Holds the current [`App`] snapshot. Replacing it with different credentials
/// bumps the credentials generation; workers holding a session from an older
/// generation reconnect before their next delivery.
pub struct AppContext {
    app: RwLock<App>,
    generation: AtomicU64,
    provider: Arc<dyn Provider>,
    queue: Arc<DeliveryQueue>,
    stores: Stores,
    reflector: Arc<dyn Reflector>,
    config: DaemonConfig,
}

impl AppContext {
    pub fn new(
        app: App,
        provider: Arc<dyn Provider>,
        stores: Stores,
        reflector: Arc<dyn Reflector>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            app: RwLock::new(app),
            generation: AtomicU64::new(0),
            provider,
            queue: Arc::new(DeliveryQueue::new(config.queue_capacity())),
            stores,
            reflector,
            config,
        }
    }

    /// Current snapshot of the application.
    pub fn app(&self) -> App {
        self.app.read().clone()
    }

    pub fn app_id(&self) -> i64 {
        self.app.read().id
    }

    pub fn app_name(&self) -> String {
        self.app.read().name.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replaces the snapshot. Returns `true` if the credentials changed.
    pub fn update_app(&self, app: App) -> bool {
        let mut current = self.app.write();
        let rotated = current.credentials != app.credentials
            || current.environment != app.environment;
        *current = app;
        if rotated {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        rotated
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn reflect(&self, event: Event) {
        self.reflector.reflect(&event);
    }
}
