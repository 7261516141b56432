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

//! Notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A queued push notification.
///
/// A notification moves from pending to either delivered or failed exactly once.
/// Once either flag is set it is never handed to a delivery pipeline again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub app_id: i64,
    /// Hex encoded device token.
    pub device_token: String,
    /// Provider payload (alert, badge, sound, custom data).
    pub payload: serde_json::Value,
    /// Seconds since the epoch after which the provider may discard the notification.
    pub expiry: Option<i64>,
    /// Not eligible for delivery before this instant.
    pub deliver_after: Option<DateTime<Utc>>,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed: bool,
    pub failed_at: Option<DateTime<Utc>>,
    /// Provider status code of the rejection, when the provider reported one.
    pub error_code: Option<i32>,
    pub error_description: Option<String>,
    /// Transport failures recorded so far.
    pub retries: i32,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Neither delivered nor failed.
    pub fn is_pending(&self) -> bool {
        !self.delivered && !self.failed
    }

    /// Pending and not scheduled for later than `now`.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.deliver_after.map_or(true, |after| after <= now)
    }
}

/// Fields supplied by client code when creating a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub app_id: i64,
    pub device_token: String,
    pub payload: serde_json::Value,
    pub expiry: Option<i64>,
    pub deliver_after: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(app_id: i64, device_token: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            app_id,
            device_token: device_token.into(),
            payload,
            expiry: None,
            deliver_after: None,
        }
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn deliver_after(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_after = Some(at);
        self
    }
}
