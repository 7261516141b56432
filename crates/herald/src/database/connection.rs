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

//! Connection pooling for the SQLite store.

use deadpool_diesel::sqlite::{Manager, Object, Pool, Runtime};
use diesel::RunQueryDsl;
use diesel_migrations::MigrationHarness;
use thiserror::Error;
use tracing::info;

/// Errors raised while setting up or migrating the database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to build connection pool: {0}")]
    Pool(String),

    #[error("Database interaction failed: {0}")]
    Interact(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// A pooled SQLite database.
///
/// Accepts plain file paths, `sqlite://` URLs, `:memory:` and SQLite URI
/// filenames such as `file:herald?mode=memory&cache=shared`.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    url: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("url", &self.url).finish()
    }
}

impl Database {
    /// Builds a pool for `connection_string`.
    ///
    /// SQLite allows a single writer, so the pool holds one connection
    /// unless `max_size` asks for more.
    pub fn new(connection_string: &str, max_size: usize) -> Result<Self, DatabaseError> {
        let url = Self::build_sqlite_url(connection_string);
        let manager = Manager::new(url.clone(), Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(max_size.max(1))
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        info!("SQLite connection pool initialized for {}", url);
        Ok(Self { pool, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Checks a connection out of the pool.
    pub async fn get(&self) -> Result<Object, DatabaseError> {
        self.pool
            .get()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))
    }

    /// Drops every idle pooled connection so the next checkout opens a
    /// fresh one.
    pub fn discard_idle(&self) {
        self.pool.retain(|_, _| false);
    }

    fn build_sqlite_url(connection_string: &str) -> String {
        match connection_string.strip_prefix("sqlite://") {
            Some(path) => path.to_string(),
            None => connection_string.to_string(),
        }
    }

    /// Applies pending migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.get().await?;
        conn.interact(|conn| {
            diesel::sql_query("PRAGMA journal_mode=WAL;")
                .execute(conn)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            diesel::sql_query("PRAGMA busy_timeout=30000;")
                .execute(conn)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            conn.run_pending_migrations(super::MIGRATIONS)
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Interact(e.to_string()))?
    }
}
