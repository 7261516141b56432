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

//! Application records: one registered app per push gateway pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Push service an application delivers through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Apns,
    Gcm,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Apns => "apns",
            ProviderKind::Gcm => "gcm",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apns" => Ok(ProviderKind::Apns),
            "gcm" => Ok(ProviderKind::Gcm),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Gateway environment an application targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Sandbox,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Sandbox => "sandbox",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Environment::Production),
            "sandbox" | "development" => Ok(Environment::Sandbox),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Credentials used to authenticate against a provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// PEM encoded client certificate and key.
    Certificate { pem: String, password: Option<String> },
    ApiKey(String),
}

impl Credentials {
    pub fn certificate(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Credentials::Certificate { pem, password } => Some((pem, password.as_deref())),
            Credentials::ApiKey(_) => None,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Certificate { pem, .. } => f
                .debug_struct("Certificate")
                .field("pem_len", &pem.len())
                .finish_non_exhaustive(),
            Credentials::ApiKey(_) => f.write_str("ApiKey(..)"),
        }
    }
}

/// A registered application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: i64,
    pub name: String,
    pub provider: ProviderKind,
    pub environment: Environment,
    pub credentials: Credentials,
    /// Number of concurrent gateway connections.
    pub connections: u32,
}

impl App {
    /// Pool size used at runtime; never below one.
    pub fn pool_size(&self) -> usize {
        self.connections.max(1) as usize
    }
}

/// Fields supplied by client code when registering an application.
#[derive(Debug, Clone)]
pub struct NewApp {
    pub name: String,
    pub provider: ProviderKind,
    pub environment: Environment,
    pub credentials: Credentials,
    pub connections: u32,
}
