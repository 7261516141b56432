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

//! # herald-testing
//!
//! Test doubles for exercising Herald delivery pipelines without a push
//! gateway or a database.
//!
//! - [`MockProvider`] plays a gateway: it records every notification it is
//!   sent and answers from a script.
//! - [`RecordingReflector`] captures [`Event`]s so tests can assert on them.
//! - [`app`] and [`notification`] build the records most tests need.
//!
//! ```rust,ignore
//! use herald_testing::{MockProvider, MockResponse};
//!
//! let provider = MockProvider::apns();
//! provider.script([MockResponse::reject(8, "Invalid token")]);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use herald::{
    App, ConnectError, Credentials, Environment, Event, FeedbackStream, FeedbackTuple,
    GatewayResponse, GatewaySession, NewApp, NewNotification, Notification, Provider,
    ProviderKind, Reflector, TransportError,
};

/// What a [`MockProvider`] session does with the next notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    Accept,
    Reject { code: Option<i32>, reason: String },
    /// The connection drops before an answer arrives.
    Drop,
}

impl MockResponse {
    pub fn reject(code: i32, reason: impl Into<String>) -> Self {
        MockResponse::Reject {
            code: Some(code),
            reason: reason.into(),
        }
    }
}

/// A notification as seen by the mock gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub notification_id: i64,
    pub app_id: i64,
    pub device_token: String,
    /// Which connection carried it, counted from 1 in connect order.
    pub connection: usize,
}

#[derive(Default)]
struct Shared {
    responses: Mutex<VecDeque<MockResponse>>,
    connect_failures: Mutex<VecDeque<(bool, String)>>,
    refused: Mutex<HashMap<String, bool>>,
    feedback: Mutex<Vec<FeedbackTuple>>,
    sent: Mutex<Vec<Sent>>,
    connects: AtomicUsize,
    open_sessions: AtomicUsize,
    feedback_checks: AtomicUsize,
    supports_feedback: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

/// A scripted in-process gateway.
///
/// Without a script every notification is accepted. Clones share state, so
/// a test can keep one handle while the daemon owns another.
#[derive(Clone)]
pub struct MockProvider {
    kind: ProviderKind,
    shared: Arc<Shared>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn apns() -> Self {
        Self::new(ProviderKind::Apns)
    }

    /// Queues responses for the next notifications, in order.
    pub fn script(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.shared.responses.lock().extend(responses);
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: usize, fatal: bool) {
        let mut failures = self.shared.connect_failures.lock();
        for _ in 0..count {
            failures.push_back((fatal, "mock gateway refused connection".to_string()));
        }
    }

    /// Refuses every connection for the named app until [`MockProvider::admit`].
    pub fn refuse(&self, app_name: &str, fatal: bool) {
        self.shared.refused.lock().insert(app_name.to_string(), fatal);
    }

    /// Lifts a [`MockProvider::refuse`].
    pub fn admit(&self, app_name: &str) {
        self.shared.refused.lock().remove(app_name);
    }

    /// Enables the feedback channel and queues tuples for its next check.
    pub fn push_feedback(&self, device_token: impl Into<String>, invalidated_at: DateTime<Utc>) {
        self.shared.supports_feedback.store(true, Ordering::SeqCst);
        self.shared.feedback.lock().push(FeedbackTuple {
            device_token: device_token.into(),
            invalidated_at,
        });
    }

    pub fn enable_feedback(&self) {
        self.shared.supports_feedback.store(true, Ordering::SeqCst);
    }

    /// Delays every send, keeping workers busy long enough to observe.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.shared.send_delay.lock() = Some(delay);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.shared.sent.lock().clone()
    }

    pub fn sent_ids(&self) -> Vec<i64> {
        self.sent().iter().map(|s| s.notification_id).collect()
    }

    /// Successful connection attempts.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    pub fn feedback_checks(&self) -> usize {
        self.shared.feedback_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn connect(&self, app: &App) -> Result<Box<dyn GatewaySession>, ConnectError> {
        let refused = self.shared.refused.lock().get(&app.name).copied();
        let failure = refused
            .map(|fatal| (fatal, "mock gateway refused app".to_string()))
            .or_else(|| self.shared.connect_failures.lock().pop_front());
        if let Some((fatal, message)) = failure {
            let message = format!("{} (app '{}')", message, app.name);
            return Err(if fatal {
                ConnectError::Fatal(message)
            } else {
                ConnectError::Transient(message)
            });
        }
        let connection = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            shared: self.shared.clone(),
            connection,
            open: true,
        }))
    }

    fn supports_feedback(&self) -> bool {
        self.shared.supports_feedback.load(Ordering::SeqCst)
    }

    async fn open_feedback(&self, _app: &App) -> Result<Box<dyn FeedbackStream>, ConnectError> {
        self.shared.feedback_checks.fetch_add(1, Ordering::SeqCst);
        let tuples = std::mem::take(&mut *self.shared.feedback.lock());
        Ok(Box::new(MockFeedback {
            tuples: tuples.into(),
        }))
    }
}

struct MockSession {
    shared: Arc<Shared>,
    connection: usize,
    open: bool,
}

impl MockSession {
    fn shut(&mut self) {
        if self.open {
            self.open = false;
            self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl GatewaySession for MockSession {
    async fn send(
        &mut self,
        notification: &Notification,
    ) -> Result<GatewayResponse, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let delay = *self.shared.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .shared
            .responses
            .lock()
            .pop_front()
            .unwrap_or(MockResponse::Accept);
        match response {
            MockResponse::Drop => {
                self.shut();
                Err(TransportError::Closed)
            }
            MockResponse::Accept => {
                self.record(notification);
                Ok(GatewayResponse::Accepted)
            }
            MockResponse::Reject { code, reason } => {
                self.record(notification);
                Ok(GatewayResponse::Rejected { code, reason })
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        self.shut();
    }
}

impl MockSession {
    fn record(&self, notification: &Notification) {
        self.shared.sent.lock().push(Sent {
            notification_id: notification.id,
            app_id: notification.app_id,
            device_token: notification.device_token.clone(),
            connection: self.connection,
        });
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.shut();
    }
}

struct MockFeedback {
    tuples: VecDeque<FeedbackTuple>,
}

#[async_trait]
impl FeedbackStream for MockFeedback {
    async fn next(&mut self) -> Result<Option<FeedbackTuple>, TransportError> {
        Ok(self.tuples.pop_front())
    }
}

/// Collects every event it receives.
#[derive(Default)]
pub struct RecordingReflector {
    events: Mutex<Vec<Event>>,
}

impl RecordingReflector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Event::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }
}

impl Reflector for RecordingReflector {
    fn reflect(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// An APNs sandbox application with one connection.
pub fn app(name: &str) -> NewApp {
    NewApp {
        name: name.to_string(),
        provider: ProviderKind::Apns,
        environment: Environment::Sandbox,
        credentials: Credentials::Certificate {
            pem: "-----BEGIN CERTIFICATE-----".to_string(),
            password: None,
        },
        connections: 1,
    }
}

/// A notification with a small alert payload.
pub fn notification(app_id: i64, device_token: &str) -> NewNotification {
    NewNotification::new(
        app_id,
        device_token,
        serde_json::json!({"aps": {"alert": "Hello"}}),
    )
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
