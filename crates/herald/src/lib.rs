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

//! # Herald
//!
//! Herald is a delivery engine for queued push notifications. Client code writes
//! notification records into a backing store; the daemon drains them, in order,
//! to one delivery pipeline per registered application and records the outcome
//! of every attempt.
//!
//! ## Architecture
//!
//! - [`daemon::Feeder`] polls the store for eligible notifications and hands them
//!   to idle pipelines (the producer).
//! - [`daemon::AppRunners`] keeps one [`daemon::AppRunner`] per application and
//!   reconciles that table against the store.
//! - Each [`daemon::AppRunner`] owns a [`daemon::DeliveryQueue`], a pool of
//!   [`daemon::DeliveryWorker`]s holding persistent gateway sessions, and a
//!   [`daemon::FeedbackReceiver`] that invalidates stale device tokens.
//! - [`provider`] defines the gateway capability traits; [`provider::apns`] is the
//!   bundled implementation of the APNs binary protocol.
//! - [`store`] defines the persistence traits with an in-memory implementation;
//!   the `sqlite` feature adds a diesel-backed [`dal::DAL`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald::{Daemon, DaemonConfig, MemoryStore, ProviderSet, Stores, TracingReflector};
//! use herald::provider::apns::ApnsProvider;
//!
//! herald::init_logging(None);
//!
//! let store = Arc::new(MemoryStore::new());
//! let providers = ProviderSet::new().with(Arc::new(ApnsProvider::new()));
//! let config = DaemonConfig::builder().embedded(true).build();
//!
//! let daemon = Daemon::new(config, Stores::shared(store), providers, Arc::new(TracingReflector));
//! daemon.start().await?;
//! // ...
//! daemon.shutdown().await;
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod models;
pub mod provider;
pub mod reflect;
pub mod retry;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod dal;
#[cfg(feature = "sqlite")]
pub mod database;

pub use config::{DaemonConfig, DaemonConfigBuilder};
pub use daemon::{
    AppContext, AppRunner, AppRunners, Daemon, DeliveryOutcome, DeliveryQueue, DeliveryWorker,
    FeedbackReceiver, Feeder, ProviderRunnerFactory, Runner, RunnerFactory, RunnerState,
    StopSignal, SyncSummary,
};
pub use error::{
    ConnectError, DaemonError, QueueError, RunnerError, StoreError, TransportError,
};
pub use logging::init_logging;
pub use models::{
    App, Credentials, Environment, NewApp, NewNotification, Notification, ProviderKind,
};
pub use provider::{
    FeedbackStream, FeedbackTuple, GatewayResponse, GatewaySession, Provider, ProviderSet,
};
pub use reflect::{Event, Reflector, TracingReflector};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{AppStore, DeviceStore, MemoryStore, NotificationStore, Stores};

#[cfg(feature = "sqlite")]
pub use dal::DAL;
#[cfg(feature = "sqlite")]
pub use database::Database;
