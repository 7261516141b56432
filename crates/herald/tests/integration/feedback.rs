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

//! Feedback polling and its effect on later deliveries.

use crate::fixtures::{test_config, Harness};
use chrono::{TimeZone, Utc};
use herald::{DeviceStore, Event};
use herald_testing::{app, notification, wait_until};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_feedback_invalidates_tokens_and_blocks_delivery() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    h.provider.push_feedback("aa", at);

    h.daemon.registry().sync().await.unwrap();
    let reflector = h.reflector.clone();
    assert!(wait_until(WAIT, || reflector.count("feedback_received") == 1).await);

    assert!(h.store.is_invalid(app.id, "aa").await.unwrap());
    assert!(h.reflector.events().contains(&Event::FeedbackReceived {
        app_id: app.id,
        device_token: "aa".into(),
        invalidated_at: at,
    }));

    let stale = h.store.insert_notification(notification(app.id, "aa"));
    let fresh = h.store.insert_notification(notification(app.id, "bb"));
    h.daemon.feeder().feed_once().await;
    h.daemon.registry().wait_timeout(WAIT).await.unwrap();

    assert!(h.store.notification(stale.id).unwrap().failed);
    assert!(h.store.notification(fresh.id).unwrap().delivered);
    assert_eq!(h.provider.sent_ids(), vec![fresh.id]);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_feedback_is_polled_repeatedly() {
    let h = Harness::new(test_config().build());
    h.store.insert_app(app("test"));
    h.provider.enable_feedback();

    h.daemon.registry().sync().await.unwrap();
    let provider = h.provider.clone();
    assert!(wait_until(WAIT, || provider.feedback_checks() >= 3).await);

    h.daemon.shutdown().await;
    let checks = h.provider.feedback_checks();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.provider.feedback_checks(), checks);
}

#[tokio::test]
async fn test_providers_without_feedback_are_not_polled() {
    let h = Harness::new(test_config().build());
    h.store.insert_app(app("test"));

    h.daemon.registry().sync().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(h.provider.feedback_checks(), 0);
    h.daemon.shutdown().await;
}
