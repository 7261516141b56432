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

//! Domain records handled by the delivery engine.
//!
//! These types are independent of any storage backend; the SQLite layer converts
//! its row structs into them at the DAL boundary.

pub mod app;
pub mod notification;

pub use app::{App, Credentials, Environment, NewApp, ProviderKind};
pub use notification::{NewNotification, Notification};
