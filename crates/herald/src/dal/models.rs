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

//! SQLite row types and their conversion to domain values.
//!
//! Timestamps are stored as RFC 3339 text with a fixed microsecond precision
//! and a `Z` suffix, so they compare correctly as strings. Payloads are
//! stored as JSON text.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;

use crate::database::schema::{apps, invalid_devices, notifications};
use crate::error::StoreError;
use crate::models::{App, Credentials, Notification, ProviderKind};

pub fn datetime_to_string(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn current_timestamp_string() -> String {
    datetime_to_string(Utc::now())
}

fn parse_optional(
    entity: &'static str,
    id: i64,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|s| parse_timestamp(entity, id, &s))
        .transpose()
}

fn parse_timestamp(entity: &'static str, id: i64, s: &str) -> Result<DateTime<Utc>, StoreError> {
    string_to_datetime(s).map_err(|e| StoreError::InvalidRecord {
        entity,
        id,
        message: format!("bad timestamp '{}': {}", s, e),
    })
}

// ============================================================================
// Application Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = apps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteApp {
    pub id: i64,
    pub name: String,
    pub provider: String,
    pub environment: String,
    pub certificate: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub connections: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = apps)]
pub struct NewSqliteApp {
    pub name: String,
    pub provider: String,
    pub environment: String,
    pub certificate: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub connections: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteApp> for App {
    type Error = StoreError;

    fn try_from(row: SqliteApp) -> Result<Self, Self::Error> {
        let id = row.id;
        let invalid = move |message: String| StoreError::InvalidRecord {
            entity: "app",
            id,
            message,
        };
        let provider: ProviderKind = row.provider.parse().map_err(invalid)?;
        let environment = row.environment.parse().map_err(invalid)?;
        // Missing secrets surface as a fatal connect error, not a load error.
        let credentials = match provider {
            ProviderKind::Apns => Credentials::Certificate {
                pem: row.certificate.unwrap_or_default(),
                password: row.password,
            },
            ProviderKind::Gcm => Credentials::ApiKey(row.api_key.unwrap_or_default()),
        };

        Ok(App {
            id: row.id,
            name: row.name,
            provider,
            environment,
            credentials,
            connections: row.connections.max(0) as u32,
        })
    }
}

// ============================================================================
// Notification Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteNotification {
    pub id: i64,
    pub app_id: i64,
    pub device_token: String,
    pub payload: String,
    pub expiry: Option<i64>,
    pub deliver_after: Option<String>,
    pub delivered: bool,
    pub delivered_at: Option<String>,
    pub failed: bool,
    pub failed_at: Option<String>,
    pub error_code: Option<i32>,
    pub error_description: Option<String>,
    pub retries: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewSqliteNotification {
    pub app_id: i64,
    pub device_token: String,
    pub payload: String,
    pub expiry: Option<i64>,
    pub deliver_after: Option<String>,
    pub delivered: bool,
    pub failed: bool,
    pub retries: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteNotification> for Notification {
    type Error = StoreError;

    fn try_from(row: SqliteNotification) -> Result<Self, Self::Error> {
        const ENTITY: &str = "notification";
        let payload =
            serde_json::from_str(&row.payload).map_err(|e| StoreError::InvalidRecord {
                entity: ENTITY,
                id: row.id,
                message: format!("payload is not JSON: {}", e),
            })?;

        Ok(Notification {
            id: row.id,
            app_id: row.app_id,
            device_token: row.device_token,
            payload,
            expiry: row.expiry,
            deliver_after: parse_optional(ENTITY, row.id, row.deliver_after)?,
            delivered: row.delivered,
            delivered_at: parse_optional(ENTITY, row.id, row.delivered_at)?,
            failed: row.failed,
            failed_at: parse_optional(ENTITY, row.id, row.failed_at)?,
            error_code: row.error_code,
            error_description: row.error_description,
            retries: row.retries,
            created_at: parse_timestamp(ENTITY, row.id, &row.created_at)?,
        })
    }
}

// ============================================================================
// Device Models
// ============================================================================

#[derive(Debug, Insertable)]
#[diesel(table_name = invalid_devices)]
pub struct NewSqliteInvalidDevice {
    pub app_id: i64,
    pub device_token: String,
    pub invalidated_at: String,
}
