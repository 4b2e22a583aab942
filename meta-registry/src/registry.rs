use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::collector::CollectedBatch;
use crate::inference::DataType;
use crate::metrics_consts::{
    CANDIDATES_DROPPED, DUPLICATE_LINKS_IN_BATCH, EMPTY_BATCHES, PHASE_TIME, REGISTRATION_FAILED,
    REGISTRATION_TIME, ROWS_INSERTED,
};
use crate::store::{MetaSession, MetaStore, StoreError, StoreResult};
use crate::types::{
    EventDefinitionsBatch, EventPropertiesBatch, PropertyDefinitionsBatch, UserIdMapping,
    UserIdMappingsBatch,
};

/// What a registration resolved, for callers that need more than the record count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegistrationOutcome {
    pub records: usize,
    pub project_ids: HashMap<String, i32>,
    pub event_ids: HashMap<(i32, String), i32>,
    pub property_ids: HashMap<(i32, String), i32>,
    /// Distinct (event_id, property_id) pairs submitted.
    pub event_properties: usize,
    /// Distinct (project_name, distinct_id) mappings submitted.
    pub user_id_mappings: usize,
}

/// Writes a collected batch to the metadata store in five dependent phases on one session:
/// projects, event definitions, property definitions, event-property links and user id
/// mappings. Every phase is a single insert-if-absent, followed by a single lookup for the
/// phases whose ids feed later ones, so the number of statements does not grow with the
/// batch.
///
/// There is no cross-batch caching. Concurrent registrations only rely on the store's
/// unique keys: whoever loses an insert race resolves the winner's row in the lookup.
#[derive(Clone)]
pub struct Registrar {
    store: Arc<dyn MetaStore>,
}

impl Registrar {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, batch: &CollectedBatch) -> StoreResult<RegistrationOutcome> {
        if batch.has_nothing_to_register() {
            metrics::counter!(EMPTY_BATCHES).increment(1);
            info!(
                events = batch.records,
                projects = 0,
                "registered batch, nothing to write"
            );
            return Ok(RegistrationOutcome {
                records: batch.records,
                ..Default::default()
            });
        }

        let start = Instant::now();
        match self.run_phases(batch).await {
            Ok(outcome) => {
                metrics::histogram!(REGISTRATION_TIME).record(start.elapsed().as_millis() as f64);
                info!(
                    events = batch.records,
                    projects = batch.projects.len(),
                    event_definitions = batch.events.len(),
                    property_definitions = batch.properties.len(),
                    event_properties = outcome.event_properties,
                    user_id_mappings = outcome.user_id_mappings,
                    "registered batch"
                );
                Ok(outcome)
            }
            Err(e) => {
                let kind = match &e {
                    StoreError::ConnectionError { .. } => "connection",
                    StoreError::QueryError { .. } => "query",
                };
                metrics::counter!(REGISTRATION_FAILED, &[("kind", kind)]).increment(1);
                error!("failed to register batch: {}", e);
                Err(e)
            }
        }
    }

    async fn run_phases(&self, batch: &CollectedBatch) -> StoreResult<RegistrationOutcome> {
        let mut session = self.store.begin().await?;
        let mut outcome = RegistrationOutcome {
            records: batch.records,
            ..Default::default()
        };

        outcome.project_ids = register_projects(session.as_mut(), batch).await?;
        outcome.event_ids =
            register_event_definitions(session.as_mut(), batch, &outcome.project_ids).await?;
        outcome.property_ids =
            register_property_definitions(session.as_mut(), batch, &outcome.project_ids).await?;
        let event_properties = register_event_properties(session.as_mut(), batch, &outcome).await?;
        outcome.event_properties = event_properties;
        outcome.user_id_mappings = register_user_id_mappings(session.as_mut(), batch).await?;

        session.commit().await?;
        Ok(outcome)
    }
}

async fn register_projects(
    session: &mut dyn MetaSession,
    batch: &CollectedBatch,
) -> StoreResult<HashMap<String, i32>> {
    let start = Instant::now();
    // BTreeSet iteration keeps the names sorted
    let names: Vec<String> = batch.projects.iter().cloned().collect();

    let inserted = session.upsert_projects(&names).await?;
    let project_ids = session.fetch_project_ids(&names).await?;

    rows_inserted("project", inserted);
    dropped("project", names.len() - project_ids.len());
    phase_time("project", start);
    Ok(project_ids)
}

async fn register_event_definitions(
    session: &mut dyn MetaSession,
    batch: &CollectedBatch,
    project_ids: &HashMap<String, i32>,
) -> StoreResult<HashMap<(i32, String), i32>> {
    let start = Instant::now();
    let mut events = EventDefinitionsBatch::with_capacity(batch.events.len());
    for (project, name) in &batch.events {
        if let Some(project_id) = project_ids.get(project) {
            events.append(*project_id, name);
        }
    }
    dropped("event_definition", batch.events.len() - events.len());

    if events.is_empty() {
        return Ok(HashMap::new());
    }

    let inserted = session.upsert_event_definitions(&events).await?;
    let event_ids = session.fetch_event_ids(&events).await?;

    rows_inserted("event_definition", inserted);
    phase_time("event_definition", start);
    Ok(event_ids)
}

async fn register_property_definitions(
    session: &mut dyn MetaSession,
    batch: &CollectedBatch,
    project_ids: &HashMap<String, i32>,
) -> StoreResult<HashMap<(i32, String), i32>> {
    let start = Instant::now();

    // Sorting by (project_id, name) gives concurrent writers the same insert order, so
    // they can't deadlock on each other's rows.
    let resolved: BTreeMap<(i32, &str), DataType> = batch
        .properties
        .iter()
        .filter_map(|candidate| {
            project_ids
                .get(&candidate.project)
                .map(|id| ((*id, candidate.name.as_str()), candidate.data_type))
        })
        .collect();
    dropped("property_definition", batch.properties.len() - resolved.len());

    if resolved.is_empty() {
        return Ok(HashMap::new());
    }

    let mut properties = PropertyDefinitionsBatch::with_capacity(resolved.len());
    for ((project_id, name), data_type) in resolved {
        properties.append(project_id, name, data_type);
    }

    let inserted = session.upsert_property_definitions(&properties).await?;
    let property_ids = session.fetch_property_ids(&properties).await?;

    rows_inserted("property_definition", inserted);
    phase_time("property_definition", start);
    Ok(property_ids)
}

async fn register_event_properties(
    session: &mut dyn MetaSession,
    batch: &CollectedBatch,
    resolved: &RegistrationOutcome,
) -> StoreResult<usize> {
    let start = Instant::now();
    let mut pairs = BTreeSet::new();
    let mut unresolved = 0;

    for link in &batch.event_properties {
        let Some(project_id) = resolved.project_ids.get(&link.project).copied() else {
            unresolved += 1;
            continue;
        };

        let event_id = resolved.event_ids.get(&(project_id, link.event.clone()));
        let property_id = resolved
            .property_ids
            .get(&(project_id, link.property.clone()));

        match (event_id, property_id) {
            (Some(event_id), Some(property_id)) => {
                pairs.insert((*event_id, *property_id));
            }
            _ => unresolved += 1,
        }
    }

    dropped("event_property", unresolved);
    let duplicates = batch.event_properties.len() - unresolved - pairs.len();
    metrics::counter!(DUPLICATE_LINKS_IN_BATCH).increment(duplicates as u64);

    if pairs.is_empty() {
        return Ok(0);
    }

    let mut links = EventPropertiesBatch::default();
    for (event_id, property_id) in pairs {
        links.append(event_id, property_id);
    }

    let inserted = session.upsert_event_properties(&links).await?;

    rows_inserted("event_property", inserted);
    phase_time("event_property", start);
    Ok(links.len())
}

async fn register_user_id_mappings(
    session: &mut dyn MetaSession,
    batch: &CollectedBatch,
) -> StoreResult<usize> {
    let start = Instant::now();

    // first mapping for a key wins, as it would in a single insert-if-absent
    let mut unique: BTreeMap<(&str, &str), &UserIdMapping> = BTreeMap::new();
    for mapping in &batch.user_id_mappings {
        unique
            .entry((mapping.project_name.as_str(), mapping.distinct_id.as_str()))
            .or_insert(mapping);
    }

    if unique.is_empty() {
        return Ok(0);
    }

    let mappings: UserIdMappingsBatch = unique.into_values().collect();
    let inserted = session.upsert_user_id_mappings(&mappings).await?;

    rows_inserted("user_id_mapping", inserted);
    phase_time("user_id_mapping", start);
    Ok(mappings.len())
}

fn rows_inserted(entity: &'static str, count: u64) {
    metrics::counter!(ROWS_INSERTED, &[("entity", entity)]).increment(count);
}

fn dropped(entity: &'static str, count: usize) {
    if count == 0 {
        return;
    }
    metrics::counter!(CANDIDATES_DROPPED, &[("entity", entity)]).increment(count as u64);
    warn!(entity, count, "dropped candidates referencing unresolved ids");
}

fn phase_time(entity: &'static str, start: Instant) {
    metrics::histogram!(PHASE_TIME, &[("entity", entity)])
        .record(start.elapsed().as_millis() as f64);
}
