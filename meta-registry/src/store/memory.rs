use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::inference::DataType;
use crate::store::{MetaSession, MetaStore, Operation, StoreError, StoreResult};
use crate::types::{
    EventDefinitionsBatch, EventPropertiesBatch, MapType, PropertyDefinitionsBatch,
    UserIdMapping, UserIdMappingsBatch,
};

const ACTIVE: i32 = 1;
const INACTIVE: i32 = 0;

#[derive(Clone, Debug)]
struct ProjectRow {
    id: i32,
    status: i32,
}

#[derive(Clone, Debug)]
struct PropertyRow {
    id: i32,
    data_type: i32,
}

#[derive(Default)]
struct Tables {
    projects: HashMap<String, ProjectRow>,
    events: HashMap<(i32, String), i32>,
    properties: HashMap<(i32, String), PropertyRow>,
    event_properties: BTreeSet<(i32, i32)>,
    user_id_mappings: HashMap<(String, String), UserIdMapping>,
    last_id: i32,

    operations: usize,
    failing_on: Option<Operation>,
    unavailable: bool,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    /// Count a statement, failing it if a failure was injected for it.
    fn run(&mut self, operation: Operation) -> StoreResult<()> {
        self.operations += 1;
        match self.failing_on {
            Some(failing) if failing == operation => Err(StoreError::QueryError {
                operation,
                error: sqlx::Error::Protocol(format!("injected failure on {operation}")),
            }),
            _ => Ok(()),
        }
    }
}

/// Row counts of every table, as seen by `MemoryStore::counts`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TableCounts {
    pub projects: usize,
    pub events: usize,
    pub properties: usize,
    pub event_properties: usize,
    pub user_id_mappings: usize,
}

/// An in-process store with the same unique keys and lookup rules as the PostgreSQL
/// schema. Statements apply as soon as they run, so `commit` only counts a round trip.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later run of `operation` fail with a query error.
    pub async fn fail_on(&self, operation: Operation) {
        self.tables.lock().await.failing_on = Some(operation);
    }

    /// Make every later session fail to start, as if the pool had no connection to give.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.lock().await.unavailable = unavailable;
    }

    /// Insert `name` if needed and mark it inactive, so it no longer resolves.
    pub async fn disable_project(&self, name: &str) {
        let mut tables = self.tables.lock().await;
        match tables.projects.get_mut(name) {
            Some(row) => row.status = INACTIVE,
            None => {
                let id = tables.next_id();
                tables.projects.insert(
                    name.to_owned(),
                    ProjectRow {
                        id,
                        status: INACTIVE,
                    },
                );
            }
        }
    }

    /// Statements run so far, commits included.
    pub async fn operations(&self) -> usize {
        self.tables.lock().await.operations
    }

    pub async fn counts(&self) -> TableCounts {
        let tables = self.tables.lock().await;
        TableCounts {
            projects: tables.projects.len(),
            events: tables.events.len(),
            properties: tables.properties.len(),
            event_properties: tables.event_properties.len(),
            user_id_mappings: tables.user_id_mappings.len(),
        }
    }

    pub async fn project_id(&self, name: &str) -> Option<i32> {
        self.tables.lock().await.projects.get(name).map(|row| row.id)
    }

    pub async fn event_id(&self, project: &str, event: &str) -> Option<i32> {
        let tables = self.tables.lock().await;
        let project_id = tables.projects.get(project)?.id;
        tables
            .events
            .get(&(project_id, event.to_owned()))
            .copied()
    }

    pub async fn property_id(&self, project: &str, property: &str) -> Option<i32> {
        let tables = self.tables.lock().await;
        let project_id = tables.projects.get(project)?.id;
        tables
            .properties
            .get(&(project_id, property.to_owned()))
            .map(|row| row.id)
    }

    pub async fn property_data_type(&self, project: &str, property: &str) -> Option<DataType> {
        let tables = self.tables.lock().await;
        let project_id = tables.projects.get(project)?.id;
        let row = tables.properties.get(&(project_id, property.to_owned()))?;
        DataType::try_from(row.data_type).ok()
    }

    pub async fn event_property_pairs(&self) -> Vec<(i32, i32)> {
        let tables = self.tables.lock().await;
        tables.event_properties.iter().copied().collect()
    }

    pub async fn user_id_mapping(&self, project: &str, distinct_id: &str) -> Option<UserIdMapping> {
        let tables = self.tables.lock().await;
        tables
            .user_id_mappings
            .get(&(project.to_owned(), distinct_id.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn MetaSession>> {
        if self.tables.lock().await.unavailable {
            return Err(StoreError::ConnectionError {
                error: sqlx::Error::PoolTimedOut,
            });
        }

        Ok(Box::new(MemorySession {
            tables: self.tables.clone(),
        }))
    }
}

pub struct MemorySession {
    tables: Arc<Mutex<Tables>>,
}

#[async_trait]
impl MetaSession for MemorySession {
    async fn upsert_projects(&mut self, names: &[String]) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::UpsertProjects)?;

        let mut inserted = 0;
        for name in names {
            if !tables.projects.contains_key(name) {
                let id = tables.next_id();
                tables
                    .projects
                    .insert(name.clone(), ProjectRow { id, status: ACTIVE });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn fetch_project_ids(&mut self, names: &[String]) -> StoreResult<HashMap<String, i32>> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::FetchProjectIds)?;

        Ok(names
            .iter()
            .filter_map(|name| match tables.projects.get(name) {
                Some(row) if row.status == ACTIVE => Some((name.clone(), row.id)),
                _ => None,
            })
            .collect())
    }

    async fn upsert_event_definitions(
        &mut self,
        batch: &EventDefinitionsBatch,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::UpsertEventDefinitions)?;

        let mut inserted = 0;
        for (project_id, name) in batch.rows() {
            let key = (project_id, name.to_owned());
            if !tables.events.contains_key(&key) {
                let id = tables.next_id();
                tables.events.insert(key, id);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn fetch_event_ids(
        &mut self,
        batch: &EventDefinitionsBatch,
    ) -> StoreResult<HashMap<(i32, String), i32>> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::FetchEventIds)?;

        Ok(batch
            .rows()
            .filter_map(|(project_id, name)| {
                let key = (project_id, name.to_owned());
                tables.events.get(&key).map(|id| (key, *id))
            })
            .collect())
    }

    async fn upsert_property_definitions(
        &mut self,
        batch: &PropertyDefinitionsBatch,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::UpsertPropertyDefinitions)?;

        let mut inserted = 0;
        for (project_id, name, data_type) in batch.rows() {
            let key = (project_id, name.to_owned());
            // existing rows keep their data type
            if !tables.properties.contains_key(&key) {
                let id = tables.next_id();
                tables.properties.insert(key, PropertyRow { id, data_type });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn fetch_property_ids(
        &mut self,
        batch: &PropertyDefinitionsBatch,
    ) -> StoreResult<HashMap<(i32, String), i32>> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::FetchPropertyIds)?;

        Ok(batch
            .rows()
            .filter_map(|(project_id, name, _)| {
                let key = (project_id, name.to_owned());
                tables.properties.get(&key).map(|row| (key, row.id))
            })
            .collect())
    }

    async fn upsert_event_properties(&mut self, batch: &EventPropertiesBatch) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::UpsertEventProperties)?;

        let mut inserted = 0;
        for pair in batch.rows() {
            if tables.event_properties.insert(pair) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_user_id_mappings(&mut self, batch: &UserIdMappingsBatch) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.run(Operation::UpsertUserIdMappings)?;

        let mut inserted = 0;
        for i in 0..batch.len() {
            let key = (batch.project_names[i].clone(), batch.distinct_ids[i].clone());
            if tables.user_id_mappings.contains_key(&key) {
                continue;
            }

            let map_type = match batch.map_types[i].as_str() {
                "login_id" => MapType::LoginId,
                _ => MapType::AnonymousId,
            };
            tables.user_id_mappings.insert(
                key,
                UserIdMapping {
                    project_name: batch.project_names[i].clone(),
                    distinct_id: batch.distinct_ids[i].clone(),
                    map_id: batch.map_ids[i].clone(),
                    map_type,
                    login_id: batch.login_ids[i].clone(),
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tables.lock().await.run(Operation::Commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn upserts_are_insert_if_absent() {
        let store = MemoryStore::new();
        let mut session = store.begin().await.unwrap();

        assert_eq!(
            session
                .upsert_projects(&names(&["a", "b"]))
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            session
                .upsert_projects(&names(&["b", "c"]))
                .await
                .unwrap(),
            1
        );

        let ids = session
            .fetch_project_ids(&names(&["a", "b", "c", "missing"]))
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.get("b").copied(), store.project_id("b").await);

        session.commit().await.unwrap();
        assert_eq!(store.operations().await, 4);
    }

    #[tokio::test]
    async fn inactive_projects_do_not_resolve() {
        let store = MemoryStore::new();
        store.disable_project("frozen").await;

        let mut session = store.begin().await.unwrap();
        assert_eq!(
            session
                .upsert_projects(&names(&["frozen", "live"]))
                .await
                .unwrap(),
            1
        );

        let ids = session
            .fetch_project_ids(&names(&["frozen", "live"]))
            .await
            .unwrap();
        assert_eq!(ids.keys().collect::<Vec<_>>(), vec!["live"]);
    }

    #[tokio::test]
    async fn property_type_is_never_updated() {
        let store = MemoryStore::new();
        let mut session = store.begin().await.unwrap();
        session.upsert_projects(&names(&["p"])).await.unwrap();
        let project_id = store.project_id("p").await.unwrap();

        let mut first = PropertyDefinitionsBatch::default();
        first.append(project_id, "price", DataType::Numeric);
        let mut second = PropertyDefinitionsBatch::default();
        second.append(project_id, "price", DataType::String);

        assert_eq!(session.upsert_property_definitions(&first).await.unwrap(), 1);
        assert_eq!(session.upsert_property_definitions(&second).await.unwrap(), 0);
        assert_eq!(
            store.property_data_type("p", "price").await,
            Some(DataType::Numeric)
        );
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryStore::new();
        store.fail_on(Operation::FetchProjectIds).await;

        let mut session = store.begin().await.unwrap();
        session.upsert_projects(&names(&["p"])).await.unwrap();
        let err = session
            .fetch_project_ids(&names(&["p"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::QueryError {
                operation: Operation::FetchProjectIds,
                ..
            }
        ));

        store.set_unavailable(true).await;
        assert!(matches!(
            store.begin().await.err(),
            Some(StoreError::ConnectionError { .. })
        ));
    }
}
