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

//! SQLite Data Access Layer
//!
//! [`DAL`] implements the store traits on top of a pooled SQLite database.
//! Each table has an accessor (`apps()`, `notifications()`, `devices()`)
//! carrying the queries for that table, including the create and lookup
//! operations client code uses to enqueue work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_diesel::sqlite::Object;
use diesel::result::DatabaseErrorKind;

use crate::database::{Database, DatabaseError};
use crate::error::StoreError;
use crate::models::{App, Notification};
use crate::store::{AppStore, DeviceStore, NotificationStore};

pub mod app;
pub mod device;
pub mod models;
pub mod notification;

pub use app::AppDAL;
pub use device::DeviceDAL;
pub use notification::NotificationDAL;

/// The main Data Access Layer struct for SQLite.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Opens `url`, applies pending migrations and returns a ready DAL.
    pub async fn open(url: &str) -> Result<Self, DatabaseError> {
        let database = Database::new(url, 1)?;
        database.run_migrations().await?;
        Ok(DAL::new(database))
    }

    pub fn apps(&self) -> AppDAL<'_> {
        AppDAL { dal: self }
    }

    pub fn notifications(&self) -> NotificationDAL<'_> {
        NotificationDAL { dal: self }
    }

    pub fn devices(&self) -> DeviceDAL<'_> {
        DeviceDAL { dal: self }
    }

    pub(crate) async fn conn(&self) -> Result<Object, StoreError> {
        self.database
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

pub(crate) fn interact_error(error: deadpool_diesel::InteractError) -> StoreError {
    StoreError::Connection(error.to_string())
}

impl From<diesel::result::Error> for StoreError {
    fn from(error: diesel::result::Error) -> Self {
        match &error {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
                StoreError::Connection(error.to_string())
            }
            _ => StoreError::Query(error.to_string()),
        }
    }
}

#[async_trait]
impl NotificationStore for DAL {
    async fn list_eligible(&self, limit: Option<usize>) -> Result<Vec<Notification>, StoreError> {
        self.notifications().list_eligible(Utc::now(), limit).await
    }

    async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.notifications().mark_delivered(id, at).await
    }

    async fn mark_failed(
        &self,
        id: i64,
        code: Option<i32>,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.notifications()
            .mark_failed(id, code, description, at)
            .await
    }

    async fn increment_retry(&self, id: i64) -> Result<i32, StoreError> {
        self.notifications().increment_retry(id).await
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.database.discard_idle();
        self.conn().await.map(|_| ())
    }
}

#[async_trait]
impl AppStore for DAL {
    async fn list_all(&self) -> Result<Vec<App>, StoreError> {
        self.apps().list_all().await
    }
}

#[async_trait]
impl DeviceStore for DAL {
    async fn mark_invalid(
        &self,
        app_id: i64,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.devices().mark_invalid(app_id, device_token, at).await
    }

    async fn is_invalid(&self, app_id: i64, device_token: &str) -> Result<bool, StoreError> {
        self.devices().is_invalid(app_id, device_token).await
    }
}
