use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::config::Config;
use crate::store::{MetaSession, MetaStore, Operation, StoreError, StoreResult};
use crate::types::{
    EventDefinitionsBatch, EventPropertiesBatch, PropertyDefinitionsBatch, UserIdMappingsBatch,
};

const UPSERT_PROJECTS: &str = r#"
INSERT INTO user_track.project (name, is_auto_create, status, create_time)
SELECT unnest($1::text[]), 1, 1, NOW()
ON CONFLICT (name) DO NOTHING"#;

const FETCH_PROJECT_IDS: &str = r#"
SELECT id, name FROM user_track.project
WHERE name = ANY($1::text[]) AND status = 1"#;

const UPSERT_EVENT_DEFINITIONS: &str = r#"
INSERT INTO user_track.event_define (project_id, name, accepted, create_time, update_time)
SELECT unnest($1::int[]), unnest($2::text[]), 1, NOW(), NOW()
ON CONFLICT (project_id, name) DO NOTHING"#;

const FETCH_EVENT_IDS: &str = r#"
SELECT id, project_id, name FROM user_track.event_define
WHERE (project_id, name) IN (SELECT unnest($1::int[]), unnest($2::text[]))"#;

const UPSERT_PROPERTY_DEFINITIONS: &str = r#"
INSERT INTO user_track.property_define (project_id, name, data_type, is_in_use, is_load, create_time, update_time)
SELECT unnest($1::int[]), unnest($2::text[]), unnest($3::int[]), 1, 1, NOW(), NOW()
ON CONFLICT (name, project_id) DO NOTHING"#;

const FETCH_PROPERTY_IDS: &str = r#"
SELECT id, project_id, name FROM user_track.property_define
WHERE (project_id, name) IN (SELECT unnest($1::int[]), unnest($2::text[]))"#;

const UPSERT_EVENT_PROPERTIES: &str = r#"
INSERT INTO user_track.event_property (event_id, property_id, update_time)
SELECT unnest($1::int[]), unnest($2::int[]), NOW()
ON CONFLICT (event_id, property_id) DO NOTHING"#;

const UPSERT_USER_ID_MAPPINGS: &str = r#"
INSERT INTO user_track.user_id_mapping (project_name, distinct_id, map_id, map_type, login_id, load_time)
SELECT unnest($1::text[]), unnest($2::text[]), unnest($3::text[]), unnest($4::text[]), unnest($5::text[]), NOW()
ON CONFLICT (project_name, distinct_id) DO NOTHING"#;

/// Metadata store backed by the `user_track` schema in PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    transactional: bool,
}

impl PgStore {
    pub async fn new(config: &Config) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_pg_connections)
            .max_connections(config.max_pg_connections)
            .acquire_timeout(Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.database_url())
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        tracing::info!(
            max_connections = config.max_pg_connections,
            "connection pool created: {}",
            config.redacted_database_url()
        );

        Ok(Self::new_from_pool(pool, *config.transactional))
    }

    pub fn new_from_pool(pool: PgPool, transactional: bool) -> Self {
        Self {
            pool,
            transactional,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}

#[async_trait]
impl MetaStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn MetaSession>> {
        let connection = if self.transactional {
            SessionConnection::Transaction(
                self.pool
                    .begin()
                    .await
                    .map_err(|error| StoreError::ConnectionError { error })?,
            )
        } else {
            SessionConnection::Pooled(
                self.pool
                    .acquire()
                    .await
                    .map_err(|error| StoreError::ConnectionError { error })?,
            )
        };

        Ok(Box::new(PgSession { connection }))
    }
}

enum SessionConnection {
    Transaction(Transaction<'static, Postgres>),
    Pooled(PoolConnection<Postgres>),
}

pub struct PgSession {
    connection: SessionConnection,
}

impl PgSession {
    fn connection(&mut self) -> &mut PgConnection {
        match &mut self.connection {
            SessionConnection::Transaction(tx) => &mut **tx,
            SessionConnection::Pooled(conn) => &mut **conn,
        }
    }
}

fn query_error(operation: Operation) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| StoreError::QueryError { operation, error }
}

#[async_trait]
impl MetaSession for PgSession {
    async fn upsert_projects(&mut self, names: &[String]) -> StoreResult<u64> {
        let result = sqlx::query(UPSERT_PROJECTS)
            .bind(names)
            .execute(self.connection())
            .await
            .map_err(query_error(Operation::UpsertProjects))?;

        Ok(result.rows_affected())
    }

    async fn fetch_project_ids(&mut self, names: &[String]) -> StoreResult<HashMap<String, i32>> {
        let rows: Vec<(i32, String)> = sqlx::query_as(FETCH_PROJECT_IDS)
            .bind(names)
            .fetch_all(self.connection())
            .await
            .map_err(query_error(Operation::FetchProjectIds))?;

        Ok(rows.into_iter().map(|(id, name)| (name, id)).collect())
    }

    async fn upsert_event_definitions(
        &mut self,
        batch: &EventDefinitionsBatch,
    ) -> StoreResult<u64> {
        let result = sqlx::query(UPSERT_EVENT_DEFINITIONS)
            .bind(&batch.project_ids)
            .bind(&batch.names)
            .execute(self.connection())
            .await
            .map_err(query_error(Operation::UpsertEventDefinitions))?;

        Ok(result.rows_affected())
    }

    async fn fetch_event_ids(
        &mut self,
        batch: &EventDefinitionsBatch,
    ) -> StoreResult<HashMap<(i32, String), i32>> {
        let rows: Vec<(i32, i32, String)> = sqlx::query_as(FETCH_EVENT_IDS)
            .bind(&batch.project_ids)
            .bind(&batch.names)
            .fetch_all(self.connection())
            .await
            .map_err(query_error(Operation::FetchEventIds))?;

        Ok(rows
            .into_iter()
            .map(|(id, project_id, name)| ((project_id, name), id))
            .collect())
    }

    async fn upsert_property_definitions(
        &mut self,
        batch: &PropertyDefinitionsBatch,
    ) -> StoreResult<u64> {
        let result = sqlx::query(UPSERT_PROPERTY_DEFINITIONS)
            .bind(&batch.project_ids)
            .bind(&batch.names)
            .bind(&batch.data_types)
            .execute(self.connection())
            .await
            .map_err(query_error(Operation::UpsertPropertyDefinitions))?;

        Ok(result.rows_affected())
    }

    async fn fetch_property_ids(
        &mut self,
        batch: &PropertyDefinitionsBatch,
    ) -> StoreResult<HashMap<(i32, String), i32>> {
        let rows: Vec<(i32, i32, String)> = sqlx::query_as(FETCH_PROPERTY_IDS)
            .bind(&batch.project_ids)
            .bind(&batch.names)
            .fetch_all(self.connection())
            .await
            .map_err(query_error(Operation::FetchPropertyIds))?;

        Ok(rows
            .into_iter()
            .map(|(id, project_id, name)| ((project_id, name), id))
            .collect())
    }

    async fn upsert_event_properties(&mut self, batch: &EventPropertiesBatch) -> StoreResult<u64> {
        let result = sqlx::query(UPSERT_EVENT_PROPERTIES)
            .bind(&batch.event_ids)
            .bind(&batch.property_ids)
            .execute(self.connection())
            .await
            .map_err(query_error(Operation::UpsertEventProperties))?;

        Ok(result.rows_affected())
    }

    async fn upsert_user_id_mappings(&mut self, batch: &UserIdMappingsBatch) -> StoreResult<u64> {
        let result = sqlx::query(UPSERT_USER_ID_MAPPINGS)
            .bind(&batch.project_names)
            .bind(&batch.distinct_ids)
            .bind(&batch.map_ids)
            .bind(&batch.map_types)
            .bind(&batch.login_ids)
            .execute(self.connection())
            .await
            .map_err(query_error(Operation::UpsertUserIdMappings))?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        match self.connection {
            SessionConnection::Transaction(tx) => tx
                .commit()
                .await
                .map_err(query_error(Operation::Commit)),
            // autocommit, the connection goes back to the pool on drop
            SessionConnection::Pooled(_) => Ok(()),
        }
    }
}
