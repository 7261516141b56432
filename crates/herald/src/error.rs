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

//! Error types for the delivery engine.
//!
//! Each layer owns one error enum. Errors are handled at the boundary of the
//! unit of work that raised them (one delivery attempt, one feed pass, one
//! reconciliation pass); only [`DaemonError`] reaches the embedding process.
//!
//! Provider rejections of a notification are not errors: they are reported as
//! [`crate::provider::GatewayResponse::Rejected`] and recorded on the
//! notification.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached. The feeder reconnects and retries these.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A query was executed but failed.
    #[error("Store query failed: {0}")]
    Query(String),

    /// A record referenced by id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A stored record could not be converted into a domain value.
    #[error("Invalid {entity} record {id}: {message}")]
    InvalidRecord {
        entity: &'static str,
        id: i64,
        message: String,
    },
}

impl StoreError {
    /// Whether reconnecting to the store may resolve this error.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Errors establishing a gateway or feedback connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Configuration or credential problem; retrying will not help.
    #[error("Fatal connection error: {0}")]
    Fatal(String),

    /// Network level problem (DNS, refused, timeout); retried with backoff.
    #[error("Transient connection error: {0}")]
    Transient(String),
}

impl ConnectError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectError::Fatal(_))
    }
}

impl From<std::io::Error> for ConnectError {
    fn from(error: std::io::Error) -> Self {
        ConnectError::Transient(error.to_string())
    }
}

/// Errors on an established gateway or feedback connection.
///
/// All variants invalidate the connection; the notification being sent is
/// eligible for redelivery.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors from [`crate::daemon::DeliveryQueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Delivery queue has been stopped")]
    Stopped,
    #[error("Delivery queue is full")]
    Full,
}

/// Errors constructing or starting an application runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to connect app '{app}': {source}")]
    Connect {
        app: String,
        #[source]
        source: ConnectError,
    },

    #[error("No provider registered for {kind} (app '{app}')")]
    UnsupportedProvider { app: String, kind: String },
}

/// Errors surfaced to the process embedding the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Runners did not become idle within {0:?}")]
    WaitTimeout(Duration),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] crate::database::DatabaseError),
}
