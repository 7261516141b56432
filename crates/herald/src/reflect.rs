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

//! Observability hook for notable delivery transitions.
//!
//! The engine reports transitions as [`Event`]s to a [`Reflector`] without
//! depending on a particular logging or metrics backend. [`TracingReflector`]
//! writes them to `tracing` and counts them with `metrics`.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// A notable transition in the delivery pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NotificationEnqueued {
        notification_id: i64,
        app_id: i64,
    },
    NotificationDelivered {
        notification_id: i64,
        app_id: i64,
    },
    NotificationFailed {
        notification_id: i64,
        app_id: i64,
        code: Option<i32>,
        description: String,
    },
    /// A transport failure put the notification back at the head of its queue.
    NotificationRequeued {
        notification_id: i64,
        app_id: i64,
        retries: i32,
    },
    FeedbackReceived {
        app_id: i64,
        device_token: String,
        invalidated_at: DateTime<Utc>,
    },
    RunnerStarted {
        app_id: i64,
        app_name: String,
    },
    RunnerStopped {
        app_id: i64,
        app_name: String,
    },
    ConnectionFailed {
        app_id: i64,
        app_name: String,
        fatal: bool,
        error: String,
    },
}

impl Event {
    /// Stable snake_case name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::NotificationEnqueued { .. } => "notification_enqueued",
            Event::NotificationDelivered { .. } => "notification_delivered",
            Event::NotificationFailed { .. } => "notification_failed",
            Event::NotificationRequeued { .. } => "notification_requeued",
            Event::FeedbackReceived { .. } => "feedback_received",
            Event::RunnerStarted { .. } => "runner_started",
            Event::RunnerStopped { .. } => "runner_stopped",
            Event::ConnectionFailed { .. } => "connection_failed",
        }
    }
}

/// Receives delivery events.
///
/// Called inline on delivery tasks, so implementations must not block.
pub trait Reflector: Send + Sync {
    fn reflect(&self, event: &Event);
}

/// Reflector that logs events and counts them as metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReflector;

impl Reflector for TracingReflector {
    fn reflect(&self, event: &Event) {
        match event {
            Event::NotificationEnqueued {
                notification_id,
                app_id,
            } => {
                tracing::debug!(notification_id, app_id, "Notification enqueued");
                metrics::counter!("herald_notifications_enqueued_total").increment(1);
            }
            Event::NotificationDelivered {
                notification_id,
                app_id,
            } => {
                info!(notification_id, app_id, "Notification delivered");
                metrics::counter!("herald_notifications_delivered_total").increment(1);
            }
            Event::NotificationFailed {
                notification_id,
                app_id,
                code,
                description,
            } => {
                warn!(
                    notification_id,
                    app_id,
                    code = ?code,
                    description = %description,
                    "Notification failed"
                );
                metrics::counter!("herald_notifications_failed_total").increment(1);
            }
            Event::NotificationRequeued {
                notification_id,
                app_id,
                retries,
            } => {
                info!(notification_id, app_id, retries, "Notification requeued");
                metrics::counter!("herald_notifications_requeued_total").increment(1);
            }
            Event::FeedbackReceived {
                app_id,
                device_token,
                invalidated_at,
            } => {
                info!(
                    app_id,
                    device_token = %device_token,
                    invalidated_at = %invalidated_at,
                    "Device token invalidated by feedback"
                );
                metrics::counter!("herald_feedback_received_total").increment(1);
            }
            Event::RunnerStarted { app_id, app_name } => {
                info!(app_id, app = %app_name, "Started runner");
            }
            Event::RunnerStopped { app_id, app_name } => {
                info!(app_id, app = %app_name, "Stopped runner");
            }
            Event::ConnectionFailed {
                app_id,
                app_name,
                fatal,
                error,
            } => {
                warn!(app_id, app = %app_name, fatal, error = %error, "Gateway connection failed");
            }
        }
    }
}
