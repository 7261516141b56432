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

//! Reconciliation of the runner table against the application store.

use crate::fixtures::{test_config, Harness};
use herald::{DaemonError, SyncSummary};
use herald_testing::{app, notification};
use std::time::Duration;

#[tokio::test]
async fn test_sync_is_idempotent() {
    let h = Harness::new(test_config().build());
    let first = h.store.insert_app(app("first"));
    let second = h.store.insert_app(app("second"));

    let summary = h.daemon.registry().sync().await.unwrap();
    assert_eq!(
        summary,
        SyncSummary {
            started: 2,
            ..Default::default()
        }
    );
    assert_eq!(h.daemon.registry().app_ids(), vec![first.id, second.id]);

    let summary = h.daemon.registry().sync().await.unwrap();
    assert_eq!(
        summary,
        SyncSummary {
            synced: 2,
            ..Default::default()
        }
    );
    assert_eq!(h.provider.connects(), 2);
    assert_eq!(h.reflector.count("runner_started"), 2);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_removed_app_is_stopped() {
    let h = Harness::new(test_config().build());
    let first = h.store.insert_app(app("first"));
    let second = h.store.insert_app(app("second"));
    h.daemon.registry().sync().await.unwrap();

    h.store.remove_app(first.id);
    let summary = h.daemon.registry().sync().await.unwrap();

    assert_eq!(summary.stopped, 1);
    assert_eq!(summary.synced, 1);
    assert_eq!(h.daemon.registry().app_ids(), vec![second.id]);
    assert_eq!(h.reflector.count("runner_stopped"), 1);
    assert_eq!(h.provider.open_sessions(), 1);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_pool_resizes_on_sync() {
    let h = Harness::new(test_config().build());
    let mut app = h.store.insert_app(app("test"));
    h.daemon.registry().sync().await.unwrap();

    app.connections = 3;
    h.store.update_app(app.clone());
    h.daemon.registry().sync().await.unwrap();
    let runner = h.daemon.registry().get(app.id).unwrap();
    assert_eq!(runner.debug_state().handlers, 3);

    app.connections = 1;
    h.store.update_app(app.clone());
    h.daemon.registry().sync().await.unwrap();
    assert_eq!(runner.debug_state().handlers, 1);
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_unknown_app_leaves_notification_pending() {
    let h = Harness::new(test_config().build());
    let app = h.store.insert_app(app("test"));
    h.daemon.registry().sync().await.unwrap();

    let orphan = h.store.insert_notification(notification(app.id + 100, "aa"));
    h.daemon.registry().enqueue(orphan.clone()).await;

    assert!(h.daemon.registry().get(app.id).unwrap().is_idle());
    assert!(h.store.notification(orphan.id).unwrap().is_pending());
    assert!(h.provider.sent_ids().is_empty());
    h.daemon.shutdown().await;
}

#[tokio::test]
async fn test_wait_times_out_on_busy_runner() {
    let h = Harness::new(
        test_config()
            .delivery_timeout(Duration::from_millis(300))
            .build(),
    );
    let app = h.store.insert_app(app("test"));
    h.store.insert_notification(notification(app.id, "aa"));
    h.provider.set_send_delay(Duration::from_secs(10));

    h.daemon.registry().sync().await.unwrap();
    h.daemon.feeder().feed_once().await;

    let result = h
        .daemon
        .registry()
        .wait_timeout(Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(DaemonError::WaitTimeout(_))));
    assert!(h.daemon.registry().idle().is_empty());

    // A busy runner is skipped by the feeder.
    h.store.insert_notification(notification(app.id, "bb"));
    assert_eq!(h.daemon.feeder().feed_once().await, 0);
    h.daemon.shutdown().await;
}
