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

//! Invalid device Data Access Layer

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::models::{datetime_to_string, NewSqliteInvalidDevice};
use super::{interact_error, DAL};
use crate::database::schema::invalid_devices;
use crate::error::StoreError;

pub struct DeviceDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> DeviceDAL<'a> {
    /// Records `device_token` as invalid for `app_id`. A later report for
    /// the same token replaces the timestamp.
    pub async fn mark_invalid(
        &self,
        app_id: i64,
        device_token: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.dal.conn().await?;
        let at = datetime_to_string(at);
        let row = NewSqliteInvalidDevice {
            app_id,
            device_token: device_token.to_string(),
            invalidated_at: at.clone(),
        };

        conn.interact(move |conn| {
            diesel::insert_into(invalid_devices::table)
                .values(&row)
                .on_conflict((invalid_devices::app_id, invalid_devices::device_token))
                .do_update()
                .set(invalid_devices::invalidated_at.eq(at))
                .execute(conn)
        })
        .await
        .map_err(interact_error)??;
        Ok(())
    }

    pub async fn is_invalid(&self, app_id: i64, device_token: &str) -> Result<bool, StoreError> {
        let conn = self.dal.conn().await?;
        let device_token = device_token.to_string();

        let invalid = conn
            .interact(move |conn| {
                diesel::select(diesel::dsl::exists(
                    invalid_devices::table
                        .filter(invalid_devices::app_id.eq(app_id))
                        .filter(invalid_devices::device_token.eq(device_token)),
                ))
                .get_result::<bool>(conn)
            })
            .await
            .map_err(interact_error)??;
        Ok(invalid)
    }

    /// Forgets an invalidation, e.g. after the device registers again.
    pub async fn clear(&self, app_id: i64, device_token: &str) -> Result<bool, StoreError> {
        let conn = self.dal.conn().await?;
        let device_token = device_token.to_string();

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    invalid_devices::table
                        .filter(invalid_devices::app_id.eq(app_id))
                        .filter(invalid_devices::device_token.eq(device_token)),
                )
                .execute(conn)
            })
            .await
            .map_err(interact_error)??;
        Ok(deleted > 0)
    }
}
