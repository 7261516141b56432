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

//! Periodic polling of a provider's feedback channel.

use std::sync::Arc;
use tracing::{debug, error, info};

use super::{AppContext, StopSignal};
use crate::reflect::Event;

/// Reads invalidated device tokens for one application and records them.
///
/// The first check runs immediately; later checks run every
/// `feedback_poll`. Channel errors are logged and retried on the next
/// interval.
pub struct FeedbackReceiver {
    context: Arc<AppContext>,
    stop: StopSignal,
}

impl FeedbackReceiver {
    pub fn new(context: Arc<AppContext>, stop: StopSignal) -> Self {
        Self { context, stop }
    }

    /// Runs one check and returns the number of tokens invalidated.
    pub async fn check_for_feedback(&self) -> usize {
        let app = self.context.app();
        let mut stream = match self.context.provider().open_feedback(&app).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Error checking feedback for app '{}': {}", app.name, e);
                return 0;
            }
        };

        let devices = &self.context.stores().devices;
        let mut invalidated = 0;
        loop {
            if self.stop.is_stopped() {
                break;
            }
            match stream.next().await {
                Ok(Some(tuple)) => {
                    if let Err(e) = devices
                        .mark_invalid(app.id, &tuple.device_token, tuple.invalidated_at)
                        .await
                    {
                        error!(
                            "Could not invalidate device {} for app '{}': {}",
                            tuple.device_token, app.name, e
                        );
                        continue;
                    }
                    invalidated += 1;
                    self.context.reflect(Event::FeedbackReceived {
                        app_id: app.id,
                        device_token: tuple.device_token,
                        invalidated_at: tuple.invalidated_at,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading feedback for app '{}': {}", app.name, e);
                    break;
                }
            }
        }

        if invalidated > 0 {
            info!(
                "Invalidated {} device token(s) for app '{}'",
                invalidated, app.name
            );
        }
        invalidated
    }

    /// Checks immediately, then every `feedback_poll` until stopped.
    pub async fn run(self) {
        let interval = self.context.config().feedback_poll();
        debug!(
            "Feedback receiver started for app '{}' (every {:?})",
            self.context.app_name(),
            interval
        );

        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.check_for_feedback().await;
            if !self.stop.sleep(interval).await {
                break;
            }
        }

        debug!(
            "Feedback receiver stopped for app '{}'",
            self.context.app_name()
        );
    }
}
