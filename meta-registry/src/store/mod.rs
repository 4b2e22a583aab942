use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    EventDefinitionsBatch, EventPropertiesBatch, PropertyDefinitionsBatch, UserIdMappingsBatch,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, TableCounts};
pub use postgres::PgStore;

/// Enumeration of errors for operations against the metadata store.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{operation} query failed with: {error}")]
    QueryError {
        operation: Operation,
        error: sqlx::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The statements a registration session issues, in phase order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    UpsertProjects,
    FetchProjectIds,
    UpsertEventDefinitions,
    FetchEventIds,
    UpsertPropertyDefinitions,
    FetchPropertyIds,
    UpsertEventProperties,
    UpsertUserIdMappings,
    Commit,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::UpsertProjects => "upsert_projects",
            Operation::FetchProjectIds => "fetch_project_ids",
            Operation::UpsertEventDefinitions => "upsert_event_definitions",
            Operation::FetchEventIds => "fetch_event_ids",
            Operation::UpsertPropertyDefinitions => "upsert_property_definitions",
            Operation::FetchPropertyIds => "fetch_property_ids",
            Operation::UpsertEventProperties => "upsert_event_properties",
            Operation::UpsertUserIdMappings => "upsert_user_id_mappings",
            Operation::Commit => "commit",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source of registration sessions, shared by all requests.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Check out one connection for the duration of a batch.
    async fn begin(&self) -> StoreResult<Box<dyn MetaSession>>;
}

/// One batch worth of set-oriented statements on a single connection.
///
/// Every upsert inserts the rows that are missing and leaves existing rows untouched,
/// returning how many rows were inserted. Lookups return ids for every requested key that
/// exists, keys without a row are simply missing from the map.
#[async_trait]
pub trait MetaSession: Send {
    async fn upsert_projects(&mut self, names: &[String]) -> StoreResult<u64>;

    /// Only active projects resolve.
    async fn fetch_project_ids(&mut self, names: &[String]) -> StoreResult<HashMap<String, i32>>;

    async fn upsert_event_definitions(&mut self, batch: &EventDefinitionsBatch)
        -> StoreResult<u64>;

    async fn fetch_event_ids(
        &mut self,
        batch: &EventDefinitionsBatch,
    ) -> StoreResult<HashMap<(i32, String), i32>>;

    async fn upsert_property_definitions(
        &mut self,
        batch: &PropertyDefinitionsBatch,
    ) -> StoreResult<u64>;

    async fn fetch_property_ids(
        &mut self,
        batch: &PropertyDefinitionsBatch,
    ) -> StoreResult<HashMap<(i32, String), i32>>;

    async fn upsert_event_properties(&mut self, batch: &EventPropertiesBatch) -> StoreResult<u64>;

    async fn upsert_user_id_mappings(&mut self, batch: &UserIdMappingsBatch) -> StoreResult<u64>;

    /// Make the session's writes durable. Dropping a session without committing discards
    /// whatever the underlying connection has not made durable yet.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
