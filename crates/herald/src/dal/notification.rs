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

//! Notification Data Access Layer

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::warn;

use super::models::{
    current_timestamp_string, datetime_to_string, NewSqliteNotification, SqliteNotification,
};
use super::{interact_error, DAL};
use crate::database::schema::notifications;
use crate::error::StoreError;
use crate::models::{NewNotification, Notification};

pub struct NotificationDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> NotificationDAL<'a> {
    /// Queues a notification for delivery.
    pub async fn create(&self, new: NewNotification) -> Result<Notification, StoreError> {
        let conn = self.dal.conn().await?;
        let now = current_timestamp_string();
        let row = NewSqliteNotification {
            app_id: new.app_id,
            device_token: new.device_token,
            payload: new.payload.to_string(),
            expiry: new.expiry,
            deliver_after: new.deliver_after.map(datetime_to_string),
            delivered: false,
            failed: false,
            retries: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let created: SqliteNotification = conn
            .interact(move |conn| {
                diesel::insert_into(notifications::table)
                    .values(&row)
                    .returning(SqliteNotification::as_returning())
                    .get_result(conn)
            })
            .await
            .map_err(interact_error)??;
        created.try_into()
    }

    pub async fn get(&self, id: i64) -> Result<Notification, StoreError> {
        let conn = self.dal.conn().await?;
        let row: Option<SqliteNotification> = conn
            .interact(move |conn| {
                notifications::table
                    .find(id)
                    .select(SqliteNotification::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(interact_error)??;
        row.ok_or(StoreError::NotFound {
            entity: "notification",
            id,
        })?
        .try_into()
    }

    /// Pending notifications due at `now`, oldest first.
    ///
    /// Rows that cannot be converted are logged and skipped.
    pub async fn list_eligible(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Notification>, StoreError> {
        let conn = self.dal.conn().await?;
        let now_str = datetime_to_string(now);
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows: Vec<SqliteNotification> = conn
            .interact(move |conn| {
                let query = notifications::table
                    .filter(notifications::delivered.eq(false))
                    .filter(notifications::failed.eq(false))
                    .filter(
                        notifications::deliver_after
                            .is_null()
                            .or(notifications::deliver_after.le(now_str)),
                    )
                    .order((notifications::created_at.asc(), notifications::id.asc()))
                    .select(SqliteNotification::as_select());
                match limit {
                    Some(limit) => query.limit(limit).load(conn),
                    None => query.load(conn),
                }
            })
            .await
            .map_err(interact_error)??;

        Ok(rows
            .into_iter()
            .filter_map(|row| match Notification::try_from(row) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    warn!("Skipping notification: {}", e);
                    None
                }
            })
            .collect())
    }

    pub async fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.dal.conn().await?;
        let at = datetime_to_string(at);
        let now = current_timestamp_string();

        let updated = conn
            .interact(move |conn| {
                diesel::update(notifications::table.find(id))
                    .set((
                        notifications::delivered.eq(true),
                        notifications::delivered_at.eq(Some(at)),
                        notifications::updated_at.eq(now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(interact_error)??;
        found(updated, id)
    }

    pub async fn mark_failed(
        &self,
        id: i64,
        code: Option<i32>,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.dal.conn().await?;
        let description = description.to_string();
        let at = datetime_to_string(at);
        let now = current_timestamp_string();

        let updated = conn
            .interact(move |conn| {
                diesel::update(notifications::table.find(id))
                    .set((
                        notifications::failed.eq(true),
                        notifications::failed_at.eq(Some(at)),
                        notifications::error_code.eq(code),
                        notifications::error_description.eq(Some(description)),
                        notifications::updated_at.eq(now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(interact_error)??;
        found(updated, id)
    }

    /// Bumps the retry counter in one statement and returns the new value.
    pub async fn increment_retry(&self, id: i64) -> Result<i32, StoreError> {
        let conn = self.dal.conn().await?;
        let now = current_timestamp_string();

        let retries: Option<i32> = conn
            .interact(move |conn| {
                diesel::update(notifications::table.find(id))
                    .set((
                        notifications::retries.eq(notifications::retries + 1),
                        notifications::updated_at.eq(now),
                    ))
                    .returning(notifications::retries)
                    .get_result(conn)
                    .optional()
            })
            .await
            .map_err(interact_error)??;
        retries.ok_or(StoreError::NotFound {
            entity: "notification",
            id,
        })
    }
}

fn found(affected: usize, id: i64) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::NotFound {
            entity: "notification",
            id,
        });
    }
    Ok(())
}
