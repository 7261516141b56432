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

//! Delivery workers: one persistent gateway connection each.
//!
//! A worker pops one notification at a time from its app's queue, sends it
//! over its session and records the outcome:
//!
//! - accepted: the notification is marked delivered;
//! - rejected by the gateway: marked failed with the provider's code, never retried;
//! - transport failure: the session is dropped and the retry counter bumped;
//!   under the limit the notification goes back to the head of the queue,
//!   at the limit it is marked failed.
//!
//! Store errors while recording an outcome are logged and leave the
//! notification pending, so a later feed pass picks it up again.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AppContext, StopSignal};
use crate::error::{ConnectError, TransportError};
use crate::models::Notification;
use crate::provider::{GatewayResponse, GatewaySession};
use crate::reflect::Event;

/// Reason recorded for notifications addressed to a token reported invalid.
pub const DEVICE_TOKEN_INVALIDATED: &str = "device token invalidated";

/// What happened to a notification handed to [`DeliveryWorker::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
    /// Put back at the head of the queue after a transport failure.
    Requeued,
    /// Left pending in the store, to be fed again by a later pass.
    Abandoned,
}

/// A worker owning at most one gateway session for its application.
pub struct DeliveryWorker {
    worker_id: Uuid,
    index: usize,
    context: Arc<AppContext>,
    stop: StopSignal,
    session: Option<Box<dyn GatewaySession>>,
    session_generation: u64,
}

impl DeliveryWorker {
    pub fn new(index: usize, context: Arc<AppContext>, stop: StopSignal) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            index,
            context,
            stop,
            session: None,
            session_generation: 0,
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the worker holds a session usable for the current credentials.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
            && self.session_generation == self.context.generation()
    }

    /// Makes one connection attempt, replacing any current session.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        self.close().await;

        let generation = self.context.generation();
        let app = self.context.app();
        let session = self.context.provider().connect(&app).await?;

        debug!(
            "Worker {} ({}) connected for app '{}'",
            self.index, self.worker_id, app.name
        );
        self.session = Some(session);
        self.session_generation = generation;
        Ok(())
    }

    /// Closes the current session, if any.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    /// Connects, retrying transient failures with backoff until stopped.
    ///
    /// Returns `Ok(false)` if the worker was stopped before a session was
    /// established.
    pub async fn ensure_connected(&mut self) -> Result<bool, ConnectError> {
        if self.is_connected() {
            return Ok(true);
        }

        let policy = self.context.config().reconnect_policy().clone();
        let mut attempt = 0;
        loop {
            if self.stop.is_stopped() {
                return Ok(false);
            }

            attempt += 1;
            match self.connect().await {
                Ok(()) => return Ok(true),
                Err(e) if e.is_fatal() => {
                    self.reflect_connection_failure(&e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = policy.calculate_delay(attempt);
                    warn!(
                        "Worker {} for app '{}' failed to connect (attempt {}): {}; retrying in {:?}",
                        self.index,
                        self.context.app_name(),
                        attempt,
                        e,
                        delay
                    );
                    self.reflect_connection_failure(&e);
                    if !self.stop.sleep(delay).await {
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn reflect_connection_failure(&self, error: &ConnectError) {
        self.context.reflect(Event::ConnectionFailed {
            app_id: self.context.app_id(),
            app_name: self.context.app_name(),
            fatal: error.is_fatal(),
            error: error.to_string(),
        });
    }

    /// Delivers one notification over the current session and records the outcome.
    pub async fn deliver(&mut self, notification: Notification) -> DeliveryOutcome {
        let devices = self.context.stores().devices.clone();
        match devices
            .is_invalid(notification.app_id, &notification.device_token)
            .await
        {
            Ok(true) => {
                return self
                    .record_failure(&notification, None, DEVICE_TOKEN_INVALIDATED)
                    .await;
            }
            Ok(false) => {}
            Err(e) => warn!(
                "Could not check device token for notification {}: {}",
                notification.id, e
            ),
        }

        let delivery_timeout = self.context.config().delivery_timeout();
        let result = match self.session.as_mut() {
            Some(session) => {
                match tokio::time::timeout(delivery_timeout, session.send(&notification)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(delivery_timeout)),
                }
            }
            None => Err(TransportError::Closed),
        };

        match result {
            Ok(GatewayResponse::Accepted) => self.record_delivery(&notification).await,
            Ok(GatewayResponse::Rejected { code, reason }) => {
                if !self.session.as_ref().is_some_and(|s| s.is_open()) {
                    // Reconnected lazily before the next delivery.
                    self.close().await;
                }
                self.record_failure(&notification, code, &reason).await
            }
            Err(e) => self.handle_transport_failure(notification, e).await,
        }
    }

    async fn record_delivery(&mut self, notification: &Notification) -> DeliveryOutcome {
        let store = &self.context.stores().notifications;
        match store.mark_delivered(notification.id, Utc::now()).await {
            Ok(()) => {
                self.context.reflect(Event::NotificationDelivered {
                    notification_id: notification.id,
                    app_id: notification.app_id,
                });
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                error!(
                    "Notification {} was delivered but could not be marked delivered: {}",
                    notification.id, e
                );
                DeliveryOutcome::Abandoned
            }
        }
    }

    async fn record_failure(
        &mut self,
        notification: &Notification,
        code: Option<i32>,
        description: &str,
    ) -> DeliveryOutcome {
        let store = &self.context.stores().notifications;
        match store
            .mark_failed(notification.id, code, description, Utc::now())
            .await
        {
            Ok(()) => {
                self.context.reflect(Event::NotificationFailed {
                    notification_id: notification.id,
                    app_id: notification.app_id,
                    code,
                    description: description.to_string(),
                });
                DeliveryOutcome::Failed
            }
            Err(e) => {
                error!(
                    "Could not mark notification {} failed ({}): {}",
                    notification.id, description, e
                );
                DeliveryOutcome::Abandoned
            }
        }
    }

    async fn handle_transport_failure(
        &mut self,
        notification: Notification,
        error: TransportError,
    ) -> DeliveryOutcome {
        warn!(
            "Transport failure delivering notification {} for app '{}': {}",
            notification.id,
            self.context.app_name(),
            error
        );
        self.close().await;

        let store = self.context.stores().notifications.clone();
        let retries = match store.increment_retry(notification.id).await {
            Ok(retries) => retries,
            Err(e) => {
                error!(
                    "Could not record retry for notification {}: {}",
                    notification.id, e
                );
                return DeliveryOutcome::Abandoned;
            }
        };

        let max_retries = self.context.config().max_retries();
        if retries >= max_retries {
            let description = format!("retries exhausted after {} attempts: {}", retries, error);
            return self.record_failure(&notification, None, &description).await;
        }

        let notification_id = notification.id;
        let app_id = notification.app_id;
        match self.context.queue().requeue(notification) {
            Ok(()) => {
                self.context.reflect(Event::NotificationRequeued {
                    notification_id,
                    app_id,
                    retries,
                });
                DeliveryOutcome::Requeued
            }
            Err(_) => {
                debug!(
                    "Queue stopped; notification {} stays pending",
                    notification_id
                );
                DeliveryOutcome::Abandoned
            }
        }
    }

    /// Runs the worker until it is stopped or hits a fatal connection error.
    pub async fn run(mut self) {
        let queue = self.context.queue().clone();
        debug!(
            "Worker {} ({}) started for app '{}'",
            self.index,
            self.worker_id,
            self.context.app_name()
        );

        loop {
            if self.stop.is_stopped() {
                break;
            }

            let notification = tokio::select! {
                biased;
                _ = self.stop.stopped() => None,
                notification = queue.pop() => notification,
            };
            let Some(notification) = notification else {
                break;
            };

            match self.ensure_connected().await {
                Ok(true) => {
                    self.deliver(notification).await;
                    queue.mark_idle();
                }
                Ok(false) => {
                    queue.mark_idle();
                    break;
                }
                Err(e) => {
                    error!(
                        "Worker {} for app '{}' stopping after fatal connection error: {}",
                        self.index,
                        self.context.app_name(),
                        e
                    );
                    queue.mark_idle();
                    break;
                }
            }
        }

        self.close().await;
        info!(
            "Worker {} for app '{}' stopped",
            self.index,
            self.context.app_name()
        );
    }
}
