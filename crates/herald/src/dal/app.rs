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

//! Application Data Access Layer

use diesel::prelude::*;
use tracing::warn;

use super::models::{current_timestamp_string, NewSqliteApp, SqliteApp};
use super::{interact_error, DAL};
use crate::database::schema::apps;
use crate::error::StoreError;
use crate::models::{App, Credentials, NewApp};

type CredentialColumns = (Option<String>, Option<String>, Option<String>);

fn credential_columns(credentials: &Credentials) -> CredentialColumns {
    match credentials {
        Credentials::Certificate { pem, password } => (Some(pem.clone()), password.clone(), None),
        Credentials::ApiKey(key) => (None, None, Some(key.clone())),
    }
}

fn connections_column(connections: u32) -> i32 {
    i32::try_from(connections).unwrap_or(i32::MAX)
}

pub struct AppDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> AppDAL<'a> {
    /// Registers an application.
    pub async fn create(&self, new_app: NewApp) -> Result<App, StoreError> {
        let conn = self.dal.conn().await?;
        let now = current_timestamp_string();
        let (certificate, password, api_key) = credential_columns(&new_app.credentials);
        let row = NewSqliteApp {
            name: new_app.name,
            provider: new_app.provider.as_str().to_string(),
            environment: new_app.environment.as_str().to_string(),
            certificate,
            password,
            api_key,
            connections: connections_column(new_app.connections),
            created_at: now.clone(),
            updated_at: now,
        };

        let created: SqliteApp = conn
            .interact(move |conn| {
                diesel::insert_into(apps::table)
                    .values(&row)
                    .returning(SqliteApp::as_returning())
                    .get_result(conn)
            })
            .await
            .map_err(interact_error)??;
        created.try_into()
    }

    pub async fn get(&self, id: i64) -> Result<App, StoreError> {
        let conn = self.dal.conn().await?;
        let row: Option<SqliteApp> = conn
            .interact(move |conn| {
                apps::table
                    .find(id)
                    .select(SqliteApp::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(interact_error)??;
        row.ok_or(StoreError::NotFound { entity: "app", id })?
            .try_into()
    }

    /// Every registered application, ordered by id.
    ///
    /// Rows that cannot be converted are logged and left out so one bad
    /// record does not stop the rest from running.
    pub async fn list_all(&self) -> Result<Vec<App>, StoreError> {
        let conn = self.dal.conn().await?;
        let rows: Vec<SqliteApp> = conn
            .interact(|conn| {
                apps::table
                    .order(apps::id.asc())
                    .select(SqliteApp::as_select())
                    .load(conn)
            })
            .await
            .map_err(interact_error)??;

        Ok(rows
            .into_iter()
            .filter_map(|row| match App::try_from(row) {
                Ok(app) => Some(app),
                Err(e) => {
                    warn!("Skipping app: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Rewrites name, environment, credentials and pool size.
    pub async fn update(&self, app: &App) -> Result<(), StoreError> {
        let conn = self.dal.conn().await?;
        let id = app.id;
        let name = app.name.clone();
        let environment = app.environment.as_str().to_string();
        let (certificate, password, api_key) = credential_columns(&app.credentials);
        let connections = connections_column(app.connections);
        let now = current_timestamp_string();

        let updated = conn
            .interact(move |conn| {
                diesel::update(apps::table.find(id))
                    .set((
                        apps::name.eq(name),
                        apps::environment.eq(environment),
                        apps::certificate.eq(certificate),
                        apps::password.eq(password),
                        apps::api_key.eq(api_key),
                        apps::connections.eq(connections),
                        apps::updated_at.eq(now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(interact_error)??;

        if updated == 0 {
            return Err(StoreError::NotFound { entity: "app", id });
        }
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.dal.conn().await?;
        let deleted = conn
            .interact(move |conn| diesel::delete(apps::table.find(id)).execute(conn))
            .await
            .map_err(interact_error)??;

        if deleted == 0 {
            return Err(StoreError::NotFound { entity: "app", id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_dal;
    use super::*;
    use crate::models::{Environment, ProviderKind};

    fn new_app(name: &str) -> NewApp {
        NewApp {
            name: name.into(),
            provider: ProviderKind::Apns,
            environment: Environment::Sandbox,
            credentials: Credentials::Certificate {
                pem: "-----BEGIN CERTIFICATE-----".into(),
                password: Some("secret".into()),
            },
            connections: 2,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_dir, dal) = temp_dal().await;

        let created = dal.apps().create(new_app("ios")).await.unwrap();
        let fetched = dal.apps().get(created.id).await.unwrap();

        assert_eq!(created, fetched);
        assert_eq!(fetched.connections, 2);
        assert_eq!(
            fetched.credentials.certificate(),
            Some(("-----BEGIN CERTIFICATE-----", Some("secret")))
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (_dir, dal) = temp_dal().await;
        let mut app = dal.apps().create(new_app("ios")).await.unwrap();

        app.environment = Environment::Production;
        app.connections = 4;
        dal.apps().update(&app).await.unwrap();
        assert_eq!(dal.apps().get(app.id).await.unwrap(), app);

        dal.apps().delete(app.id).await.unwrap();
        assert!(matches!(
            dal.apps().get(app.id).await,
            Err(StoreError::NotFound { entity: "app", .. })
        ));
        assert!(dal.apps().list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_api_key_credentials_round_trip() {
        let (_dir, dal) = temp_dal().await;
        let app = dal
            .apps()
            .create(NewApp {
                name: "android".into(),
                provider: ProviderKind::Gcm,
                environment: Environment::Production,
                credentials: Credentials::ApiKey("key".into()),
                connections: 1,
            })
            .await
            .unwrap();

        let all = dal.apps().list_all().await.unwrap();
        assert_eq!(all, vec![app]);
    }
}
