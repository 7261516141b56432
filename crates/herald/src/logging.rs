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

//! Tracing subscriber setup for processes embedding the daemon.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installs a global `tracing` subscriber.
///
/// The filter comes from `directive` when given, otherwise from `RUST_LOG`,
/// falling back to `info`. Calling this more than once is a no-op, as is calling
/// it after another global subscriber has been installed.
///
/// # Example
///
/// ```rust,ignore
/// herald::init_logging(Some("herald=debug"));
/// ```
pub fn init_logging(directive: Option<&str>) {
    LOGGING.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(build_filter(directive))
            .try_init();
    });
}

fn build_filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}
