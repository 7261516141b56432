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

//! Persistence interfaces used by the delivery engine.
//!
//! The engine reads eligible notifications and registered applications and
//! records delivery outcomes and device invalidations through these traits.
//! [`MemoryStore`] implements all three in memory; the `sqlite` feature adds
//! [`crate::dal::DAL`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::StoreError;
use crate::models::{App, Notification};

mod memory;

pub use memory::MemoryStore;

/// Access to notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Pending notifications whose `deliver_after` is unset or in the past,
    /// oldest first, at most `limit` of them when a limit is given.
    async fn list_eligible(&self, limit: Option<usize>) -> Result<Vec<Notification>, StoreError>;

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn mark_failed(
        &self,
        id: i64,
        code: Option<i32>,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Increments the transport retry counter and returns the new value.
    async fn increment_retry(&self, id: i64) -> Result<i32, StoreError>;

    /// Re-establishes the connection to the backing store.
    async fn reconnect(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Access to registered applications.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<App>, StoreError>;
}

/// Access to device token invalidations.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn mark_invalid(
        &self,
        app_id: i64,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn is_invalid(&self, app_id: i64, device_token: &str) -> Result<bool, StoreError>;
}

/// The three store handles the daemon works with.
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationStore>,
    pub apps: Arc<dyn AppStore>,
    pub devices: Arc<dyn DeviceStore>,
}

impl Stores {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        apps: Arc<dyn AppStore>,
        devices: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            notifications,
            apps,
            devices,
        }
    }

    /// Uses one backend for all three stores.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: NotificationStore + AppStore + DeviceStore + 'static,
    {
        Self {
            notifications: store.clone(),
            apps: store.clone(),
            devices: store,
        }
    }
}
