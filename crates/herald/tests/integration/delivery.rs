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

//! Delivery outcomes as recorded in the store.

use crate::fixtures::{test_config, Harness};
use herald::daemon::DEVICE_TOKEN_INVALIDATED;
use herald::{BackoffStrategy, Credentials, DeviceStore, RetryPolicy, Runner};
use herald_testing::{app, notification, wait_until, MockResponse};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn deliver_pending(h: &Harness) {
    h.daemon.registry().sync().await.unwrap();
    loop {
        if h.daemon.feeder().feed_once().await == 0 {
            break;
        }
        h.daemon.registry().wait_timeout(WAIT).await.unwrap();
    }
}

#[tokio::test]
async fn test_rejection_marks_failed_without_retry() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let n = h.store.insert_notification(notification(app.id, "aa"));
    h.provider.script([MockResponse::reject(8, "Invalid token")]);

    deliver_pending(&h).await;

    let stored = h.store.notification(n.id).unwrap();
    assert!(stored.failed);
    assert!(!stored.delivered);
    assert_eq!(stored.error_code, Some(8));
    assert_eq!(stored.error_description.as_deref(), Some("Invalid token"));
    assert_eq!(stored.retries, 0);
    assert_eq!(h.provider.sent_ids(), vec![n.id]);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_dropped_connection_requeues_and_reconnects() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let n = h.store.insert_notification(notification(app.id, "aa"));
    h.provider.script([MockResponse::Drop]);

    deliver_pending(&h).await;

    let stored = h.store.notification(n.id).unwrap();
    assert!(stored.delivered);
    assert_eq!(stored.retries, 1);
    assert_eq!(h.provider.connects(), 2);
    assert_eq!(h.reflector.count("notification_requeued"), 1);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed() {
    let h = Harness::new(test_config().max_retries(2).build());
    let app = h.store.insert_app(app("test"));
    let n = h.store.insert_notification(notification(app.id, "aa"));
    h.provider.script([MockResponse::Drop, MockResponse::Drop]);

    deliver_pending(&h).await;

    let stored = h.store.notification(n.id).unwrap();
    assert!(stored.failed);
    assert_eq!(stored.retries, 2);
    assert!(stored
        .error_description
        .unwrap()
        .starts_with("retries exhausted after 2 attempts"));
    assert!(h.provider.sent_ids().is_empty());
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_invalidated_device_is_not_sent() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    h.store
        .mark_invalid(app.id, "aa", chrono::Utc::now())
        .await
        .unwrap();
    let n = h.store.insert_notification(notification(app.id, "aa"));

    deliver_pending(&h).await;

    let stored = h.store.notification(n.id).unwrap();
    assert!(stored.failed);
    assert_eq!(
        stored.error_description.as_deref(),
        Some(DEVICE_TOKEN_INVALIDATED)
    );
    assert!(h.provider.sent_ids().is_empty());
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let n = h.store.insert_notification(notification(app.id, "aa"));
    h.provider.fail_connects(2, false);

    deliver_pending(&h).await;

    assert!(h.store.notification(n.id).unwrap().delivered);
    assert_eq!(h.reflector.count("connection_failed"), 1);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_fatal_connect_leaves_app_unserved_until_next_sync() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    h.provider.fail_connects(1, true);

    let summary = h.daemon.registry().sync().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(h.daemon.registry().get(app.id).is_none());

    let summary = h.daemon.registry().sync().await.unwrap();
    assert_eq!(summary.started, 1);
    assert!(h.daemon.registry().get(app.id).is_some());
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_single_connection_preserves_order() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let ids: Vec<i64> = (0..10)
        .map(|i| {
            h.store
                .insert_notification(notification(app.id, &format!("{:02x}", i)))
                .id
        })
        .collect();

    deliver_pending(&h).await;

    assert_eq!(h.provider.sent_ids(), ids);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_pool_connects_every_worker() {
    let h = Harness::new(test_config().build());
    let mut new_app = app("test");
    new_app.connections = 3;
    let app = h.store.insert_app(new_app);
    for i in 0..6 {
        h.store
            .insert_notification(notification(app.id, &format!("{:02x}", i)));
    }

    deliver_pending(&h).await;

    assert_eq!(h.provider.connects(), 3);
    assert!(h.store.notifications().iter().all(|n| n.delivered));
    h.daemon.shutdown().await;
    assert_eq!(h.provider.open_sessions(), 0);
}

#[tokio::test]
async fn test_unreachable_app_does_not_hold_up_others() {
    let config = test_config()
        .embedded(true)
        .queue_capacity(2)
        .reconnect_policy(RetryPolicy {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            backoff_strategy: BackoffStrategy::Fixed,
            jitter: false,
        })
        .build();
    let h = Harness::new(config);
    let stuck = h.store.insert_app(app("stuck"));
    let healthy = h.store.insert_app(app("healthy"));
    h.provider.refuse("stuck", false);
    let backlog: Vec<i64> = (0..5)
        .map(|_| h.store.insert_notification(notification(stuck.id, "aa")).id)
        .collect();
    let n = h.store.insert_notification(notification(healthy.id, "bb"));

    h.daemon.start().await.unwrap();
    let store = h.store.clone();
    assert!(wait_until(WAIT, || store.notification(n.id).unwrap().delivered).await);
    let reflector = h.reflector.clone();
    assert!(wait_until(WAIT, || reflector.count("connection_failed") > 0).await);

    tokio::time::timeout(WAIT, h.daemon.shutdown())
        .await
        .expect("shutdown finishes with a full queue");
    for id in backlog {
        assert!(h.store.notification(id).unwrap().is_pending());
    }
    assert_eq!(h.provider.sent_ids(), vec![n.id]);
}

#[tokio::test]
async fn test_service_resumes_after_fatal_reconnect() {
    let h = Harness::new(test_config().build());
    let mut app = h.store.insert_app(app("test"));
    h.daemon.registry().sync().await.unwrap();

    app.credentials = Credentials::Certificate {
        pem: "revoked".into(),
        password: None,
    };
    h.store.update_app(app.clone());
    h.provider.refuse("test", true);
    h.daemon.registry().sync().await.unwrap();

    let first = h.store.insert_notification(notification(app.id, "aa"));
    assert_eq!(h.daemon.feeder().feed_once().await, 1);
    h.daemon.registry().wait_timeout(WAIT).await.unwrap();

    let runner = h.daemon.registry().get(app.id).unwrap();
    let watched = runner.clone();
    assert!(wait_until(WAIT, || !watched.in_service()).await);
    assert_eq!(
        h.daemon.registry().debug_report(),
        "\ntest:\n  handlers: 0\n  queued: 0\n  idle: true\n"
    );
    assert!(h.store.notification(first.id).unwrap().is_pending());
    assert_eq!(h.daemon.feeder().feed_once().await, 0);

    app.credentials = Credentials::Certificate {
        pem: "renewed".into(),
        password: None,
    };
    h.store.update_app(app.clone());
    h.provider.admit("test");
    let second = h.store.insert_notification(notification(app.id, "bb"));

    deliver_pending(&h).await;

    assert!(runner.in_service());
    assert!(h.store.notification(first.id).unwrap().delivered);
    assert!(h.store.notification(second.id).unwrap().delivered);
    assert_eq!(h.provider.sent_ids(), vec![first.id, second.id]);
    h.daemon.shutdown().await;
}
