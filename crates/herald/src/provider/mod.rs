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

//! Push gateway capabilities.
//!
//! A [`Provider`] opens [`GatewaySession`]s (one per delivery worker) and,
//! when the service has one, [`FeedbackStream`]s reporting device tokens that
//! are no longer valid. Providers are selected per application by
//! [`ProviderKind`] through a [`ProviderSet`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConnectError, TransportError};
use crate::models::{App, Notification, ProviderKind};

pub mod apns;
#[cfg(feature = "tls")]
pub mod tls;

/// Gateway verdict for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    /// The gateway took the notification.
    Accepted,
    /// The gateway refused the notification. Not retried.
    Rejected { code: Option<i32>, reason: String },
}

/// A device token reported invalid by a feedback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackTuple {
    pub device_token: String,
    pub invalidated_at: DateTime<Utc>,
}

/// An open connection to a push gateway, owned by a single worker.
#[async_trait]
pub trait GatewaySession: Send {
    /// Sends one notification and waits for the gateway's verdict.
    ///
    /// An `Err` means the connection is unusable and the notification may not
    /// have reached the gateway.
    async fn send(&mut self, notification: &Notification)
        -> Result<GatewayResponse, TransportError>;

    /// Whether the session can still be used for the next send.
    fn is_open(&self) -> bool;

    async fn close(&mut self);
}

/// A stream of feedback tuples, read until it returns `Ok(None)`.
#[async_trait]
pub trait FeedbackStream: Send {
    async fn next(&mut self) -> Result<Option<FeedbackTuple>, TransportError>;
}

/// A push service implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Opens a delivery session for `app`.
    ///
    /// Credential and configuration problems are [`ConnectError::Fatal`].
    async fn connect(&self, app: &App) -> Result<Box<dyn GatewaySession>, ConnectError>;

    /// Whether this provider has a feedback channel.
    fn supports_feedback(&self) -> bool {
        false
    }

    /// Opens the feedback channel for `app`.
    async fn open_feedback(&self, app: &App) -> Result<Box<dyn FeedbackStream>, ConnectError> {
        Err(ConnectError::Fatal(format!(
            "{} has no feedback channel (app '{}')",
            self.kind(),
            app.name
        )))
    }
}

/// Registered providers, keyed by the kind of service they implement.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider, replacing any previous provider of the same kind.
    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn insert(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}
