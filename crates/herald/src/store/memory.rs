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

//! In-memory store for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{AppStore, DeviceStore, NotificationStore};
use crate::error::StoreError;
use crate::models::{App, NewApp, NewNotification, Notification};

#[derive(Default)]
struct State {
    next_notification_id: i64,
    next_app_id: i64,
    notifications: BTreeMap<i64, Notification>,
    apps: BTreeMap<i64, App>,
    invalid_devices: HashMap<(i64, String), DateTime<Utc>>,
}

/// A store holding every record in process memory.
///
/// Implements [`NotificationStore`], [`AppStore`] and [`DeviceStore`] with the
/// same eligibility rules as the SQLite DAL.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an application and returns it with its assigned id.
    pub fn insert_app(&self, new_app: NewApp) -> App {
        let mut state = self.state.lock();
        state.next_app_id += 1;
        let app = App {
            id: state.next_app_id,
            name: new_app.name,
            provider: new_app.provider,
            environment: new_app.environment,
            credentials: new_app.credentials,
            connections: new_app.connections,
        };
        state.apps.insert(app.id, app.clone());
        app
    }

    /// Replaces an application record, keyed by its id.
    pub fn update_app(&self, app: App) {
        self.state.lock().apps.insert(app.id, app);
    }

    pub fn remove_app(&self, app_id: i64) -> Option<App> {
        self.state.lock().apps.remove(&app_id)
    }

    /// Creates a pending notification and returns it with its assigned id.
    pub fn insert_notification(&self, new: NewNotification) -> Notification {
        let mut state = self.state.lock();
        state.next_notification_id += 1;
        let notification = Notification {
            id: state.next_notification_id,
            app_id: new.app_id,
            device_token: new.device_token,
            payload: new.payload,
            expiry: new.expiry,
            deliver_after: new.deliver_after,
            delivered: false,
            delivered_at: None,
            failed: false,
            failed_at: None,
            error_code: None,
            error_description: None,
            retries: 0,
            created_at: Utc::now(),
        };
        state
            .notifications
            .insert(notification.id, notification.clone());
        notification
    }

    pub fn notification(&self, id: i64) -> Option<Notification> {
        self.state.lock().notifications.get(&id).cloned()
    }

    /// All notifications, ordered by id.
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.values().cloned().collect()
    }

    fn with_notification<T>(
        &self,
        id: i64,
        f: impl FnOnce(&mut Notification) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock();
        let notification = state
            .notifications
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "notification",
                id,
            })?;
        Ok(f(notification))
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn list_eligible(&self, limit: Option<usize>) -> Result<Vec<Notification>, StoreError> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut eligible: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.is_eligible_at(now))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            eligible.truncate(limit);
        }
        Ok(eligible)
    }

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_notification(id, |n| {
            n.delivered = true;
            n.delivered_at = Some(at);
        })
    }

    async fn mark_failed(
        &self,
        id: i64,
        code: Option<i32>,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_notification(id, |n| {
            n.failed = true;
            n.failed_at = Some(at);
            n.error_code = code;
            n.error_description = Some(description.to_string());
        })
    }

    async fn increment_retry(&self, id: i64) -> Result<i32, StoreError> {
        self.with_notification(id, |n| {
            n.retries += 1;
            n.retries
        })
    }
}

#[async_trait]
impl AppStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<App>, StoreError> {
        Ok(self.state.lock().apps.values().cloned().collect())
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn mark_invalid(
        &self,
        app_id: i64,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .invalid_devices
            .insert((app_id, device_token.to_string()), at);
        Ok(())
    }

    async fn is_invalid(&self, app_id: i64, device_token: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .invalid_devices
            .contains_key(&(app_id, device_token.to_string())))
    }
}
