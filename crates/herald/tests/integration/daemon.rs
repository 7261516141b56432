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

//! End-to-end runs of the daemon in each feeding mode.

use crate::fixtures::{test_config, Harness};
use herald_testing::{app, notification, wait_until};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_deferred_notification_waits_for_its_time() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let n1 = h.store.insert_notification(notification(app.id, "aa"));
    let n2 = h.store.insert_notification(
        notification(app.id, "bb")
            .deliver_after(chrono::Utc::now() + chrono::Duration::milliseconds(400)),
    );

    h.daemon.registry().sync().await.unwrap();
    assert_eq!(h.daemon.feeder().feed_once().await, 1);
    h.daemon.registry().wait_timeout(WAIT).await.unwrap();

    assert!(h.store.notification(n1.id).unwrap().delivered);
    assert!(h.store.notification(n2.id).unwrap().is_pending());
    assert!(h.daemon.registry().get(app.id).unwrap().is_idle());

    // Nothing is due yet.
    assert_eq!(h.daemon.feeder().feed_once().await, 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.daemon.feeder().feed_once().await, 1);
    h.daemon.registry().wait_timeout(WAIT).await.unwrap();

    assert!(h.store.notification(n2.id).unwrap().delivered);
    assert_eq!(h.provider.sent_ids(), vec![n1.id, n2.id]);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_debug_report_for_idle_app() {
    let h = Harness::new(test_config().build());
    h.store.insert_app(app("test"));

    h.daemon.registry().sync().await.unwrap();

    assert_eq!(
        h.daemon.registry().debug_report(),
        "\ntest:\n  handlers: 1\n  queued: 0\n  idle: true\n"
    );
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_push_mode_delivers_everything_in_one_pass() {
    let h = Harness::new(test_config().push(true).batch_size(1).build());
    let app = h.store.insert_app(app("test"));
    let ids: Vec<i64> = ["aa", "bb", "cc"]
        .iter()
        .map(|token| h.store.insert_notification(notification(app.id, token)).id)
        .collect();

    tokio::time::timeout(WAIT, h.daemon.start())
        .await
        .unwrap()
        .unwrap();

    // The batch size does not cap a push pass.
    assert_eq!(h.provider.sent_ids(), ids);
    assert!(h.store.notifications().iter().all(|n| n.delivered));
    assert_eq!(h.reflector.count("notification_enqueued"), 3);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_embedded_mode_feeds_in_background() {
    let h = Harness::new(test_config().embedded(true).build());
    let app = h.store.insert_app(app("test"));

    h.daemon.start().await.unwrap();
    let n = h.store.insert_notification(notification(app.id, "aa"));

    let store = h.store.clone();
    assert!(wait_until(WAIT, || store.notification(n.id).unwrap().delivered).await);

    h.daemon.shutdown().await;
    assert!(h.daemon.feeder().is_stopped());
    assert!(h.daemon.registry().is_empty());
    assert_eq!(
        h.reflector.names(),
        vec![
            "runner_started",
            "notification_enqueued",
            "notification_delivered",
            "runner_stopped"
        ]
    );
}

#[tokio::test]
async fn test_loop_mode_runs_until_shutdown() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    let n = h.store.insert_notification(notification(app.id, "aa"));

    let daemon = h.daemon.clone();
    let handle = tokio::spawn(async move { daemon.start().await });

    let store = h.store.clone();
    assert!(wait_until(WAIT, || store.notification(n.id).unwrap().delivered).await);
    assert!(!handle.is_finished());

    h.daemon.shutdown().await;
    tokio::time::timeout(WAIT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_periodic_sync_adds_and_removes_apps() {
    let h = Harness::new(
        test_config()
            .embedded(true)
            .sync_interval(Duration::from_millis(50))
            .build(),
    );
    let first = h.store.insert_app(app("first"));
    h.daemon.start().await.unwrap();
    assert_eq!(h.daemon.registry().app_ids(), vec![first.id]);

    let second = h.store.insert_app(app("second"));
    let registry = h.daemon.registry().clone();
    assert!(wait_until(WAIT, || registry.len() == 2).await);

    h.store.remove_app(first.id);
    assert!(wait_until(WAIT, || registry.app_ids() == vec![second.id]).await);

    h.daemon.shutdown().await;
}
