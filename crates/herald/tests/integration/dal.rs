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

//! The daemon running against the SQLite DAL.

use crate::fixtures::{init_logging, test_config};
use herald::dal::DAL;
use herald::{Daemon, NotificationStore, ProviderSet, Stores};
use herald_testing::{app, notification, MockProvider, MockResponse, RecordingReflector};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_push_pass_over_sqlite() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("herald.db");
    let dal = Arc::new(DAL::open(path.to_str().unwrap()).await.unwrap());

    let app = dal.apps().create(app("ios")).await.unwrap();
    let accepted = dal
        .notifications()
        .create(notification(app.id, "aa"))
        .await
        .unwrap();
    let rejected = dal
        .notifications()
        .create(notification(app.id, "bb"))
        .await
        .unwrap();
    let deferred = dal
        .notifications()
        .create(
            notification(app.id, "cc")
                .deliver_after(chrono::Utc::now() + chrono::Duration::hours(1)),
        )
        .await
        .unwrap();

    let provider = MockProvider::apns();
    provider.script([MockResponse::Accept, MockResponse::reject(7, "Invalid payload size")]);
    let daemon = Daemon::new(
        test_config().push(true).build(),
        Stores::shared(dal.clone()),
        ProviderSet::new().with(Arc::new(provider.clone())),
        Arc::new(RecordingReflector::new()),
    );

    tokio::time::timeout(Duration::from_secs(5), daemon.start())
        .await
        .unwrap()
        .unwrap();

    let stored = dal.notifications().get(accepted.id).await.unwrap();
    assert!(stored.delivered);
    assert!(stored.delivered_at.is_some());

    let stored = dal.notifications().get(rejected.id).await.unwrap();
    assert!(stored.failed);
    assert_eq!(stored.error_code, Some(7));

    assert!(dal.notifications().get(deferred.id).await.unwrap().is_pending());
    let eligible = dal.list_eligible(None).await.unwrap();
    assert!(eligible.is_empty());
    assert_eq!(provider.sent_ids(), vec![accepted.id, rejected.id]);
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_reopens_pool() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("herald.db");
    let dal = DAL::open(path.to_str().unwrap()).await.unwrap();

    dal.reconnect().await.unwrap();
    assert!(dal.apps().list_all().await.unwrap().is_empty());
}
