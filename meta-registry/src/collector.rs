use std::collections::{BTreeSet, HashSet};

use crate::event::TrackEvent;
use crate::inference::infer_data_type;
use crate::metrics_consts::RECORDS_SKIPPED;
use crate::types::{
    EventPropertyCandidate, MapType, PropertyCandidate, UserIdMapping, TRACK_ID_BIND,
    TRACK_SIGNUP, UNSET_LOGIN_ID,
};

/// Everything a batch asks to register, deduplicated where the store keys allow it.
///
/// Projects and events are ordered sets so that concurrent batches touching the same rows
/// insert them in the same order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectedBatch {
    /// Number of decoded records, including those that contributed nothing.
    pub records: usize,
    pub projects: BTreeSet<String>,
    pub events: BTreeSet<(String, String)>,
    pub properties: Vec<PropertyCandidate>,
    pub event_properties: Vec<EventPropertyCandidate>,
    pub user_id_mappings: Vec<UserIdMapping>,
}

impl CollectedBatch {
    pub fn collect<I>(events: I) -> CollectedBatch
    where
        I: IntoIterator<Item = TrackEvent>,
    {
        let mut collector = BatchCollector::default();
        for event in events {
            collector.observe(event);
        }
        collector.finish()
    }

    /// True when nothing in the batch needs to reach the store.
    pub fn has_nothing_to_register(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Single pass accumulator behind `CollectedBatch::collect`.
#[derive(Default)]
pub struct BatchCollector {
    batch: CollectedBatch,
    seen_properties: HashSet<(String, String)>,
}

impl BatchCollector {
    pub fn observe(&mut self, event: TrackEvent) {
        self.batch.records += 1;

        if event.project.is_empty() {
            metrics::counter!(RECORDS_SKIPPED, &[("reason", "missing_project")]).increment(1);
            return;
        }

        if let Some(mapping) = user_id_mapping(&event) {
            self.batch.user_id_mappings.push(mapping);
        }

        let TrackEvent {
            project,
            event: event_name,
            properties_keys,
            properties,
            ..
        } = event;

        if let Some(event_name) = &event_name {
            self.batch
                .events
                .insert((project.clone(), event_name.clone()));
        }

        for key in properties_keys {
            // first occurrence decides the type for the whole batch
            let dedup_key = (project.clone(), key.clone());
            if !self.seen_properties.contains(&dedup_key) {
                self.batch.properties.push(PropertyCandidate {
                    project: project.clone(),
                    name: key.clone(),
                    data_type: infer_data_type(properties.get(&key)),
                });
                self.seen_properties.insert(dedup_key);
            }

            if let Some(event_name) = &event_name {
                self.batch.event_properties.push(EventPropertyCandidate {
                    project: project.clone(),
                    event: event_name.clone(),
                    property: key,
                });
            }
        }

        self.batch.projects.insert(project);
    }

    pub fn finish(self) -> CollectedBatch {
        self.batch
    }
}

/// Extract the identity mapping carried by signup and id-bind records, if any.
///
/// A signup maps its `original_id` to the `distinct_id`, classified as a login when the
/// login id is the distinct id itself. Otherwise a record with a real login id maps its
/// `distinct_id` to that login id.
pub fn user_id_mapping(event: &TrackEvent) -> Option<UserIdMapping> {
    let event_type = event.event_type.as_deref()?;
    if event_type != TRACK_SIGNUP && event_type != TRACK_ID_BIND {
        return None;
    }

    let distinct_id = event.distinct_id.as_deref()?;
    let login_id = event.login_id.as_deref();

    if event_type == TRACK_SIGNUP {
        if let Some(original_id) = event.original_id.as_deref() {
            let map_type = match login_id {
                Some(login_id) if login_id == distinct_id => MapType::LoginId,
                _ => MapType::AnonymousId,
            };

            return Some(UserIdMapping {
                project_name: event.project.clone(),
                distinct_id: original_id.to_owned(),
                map_id: distinct_id.to_owned(),
                map_type,
                login_id: login_id.unwrap_or_default().to_owned(),
            });
        }
    }

    match login_id {
        Some(login_id) if login_id != UNSET_LOGIN_ID => Some(UserIdMapping {
            project_name: event.project.clone(),
            distinct_id: distinct_id.to_owned(),
            map_id: login_id.to_owned(),
            map_type: MapType::LoginId,
            login_id: login_id.to_owned(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::inference::DataType;

    fn track(project: &str, event: Option<&str>, keys: &[&str], properties: Value) -> TrackEvent {
        let properties = match properties {
            Value::Object(properties) => properties,
            _ => Map::new(),
        };

        TrackEvent {
            project: project.to_owned(),
            event: event.map(String::from),
            properties_keys: keys.iter().map(|k| k.to_string()).collect(),
            properties,
            ..Default::default()
        }
    }

    fn identity(
        event_type: &str,
        distinct_id: &str,
        login_id: &str,
        original_id: &str,
    ) -> TrackEvent {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());

        TrackEvent {
            project: "shop".to_owned(),
            event_type: non_empty(event_type),
            distinct_id: non_empty(distinct_id),
            login_id: non_empty(login_id),
            original_id: non_empty(original_id),
            ..Default::default()
        }
    }

    #[test]
    fn collects_unique_projects_and_events() {
        let batch = CollectedBatch::collect(vec![
            track("shop", Some("view"), &[], json!({})),
            track("shop", Some("view"), &[], json!({})),
            track("shop", Some("buy"), &[], json!({})),
            track("blog", None, &[], json!({})),
        ]);

        assert_eq!(batch.records, 4);
        assert_eq!(
            batch.projects.iter().cloned().collect::<Vec<_>>(),
            vec!["blog", "shop"]
        );
        assert_eq!(
            batch.events.iter().cloned().collect::<Vec<_>>(),
            vec![
                ("shop".to_owned(), "buy".to_owned()),
                ("shop".to_owned(), "view".to_owned())
            ]
        );
    }

    #[test]
    fn first_occurrence_decides_the_property_type() {
        let batch = CollectedBatch::collect(vec![
            track("shop", Some("view"), &["price"], json!({"price": 10})),
            track("shop", Some("view"), &["price"], json!({"price": "cheap"})),
            track("shop", Some("buy"), &["price"], json!({"price": true})),
        ]);

        assert_eq!(
            batch.properties,
            vec![PropertyCandidate {
                project: "shop".to_owned(),
                name: "price".to_owned(),
                data_type: DataType::Numeric,
            }]
        );
    }

    #[test]
    fn same_key_in_other_project_is_a_new_property() {
        let batch = CollectedBatch::collect(vec![
            track("shop", None, &["price"], json!({"price": 10})),
            track("blog", None, &["price"], json!({"price": "free"})),
        ]);

        assert_eq!(batch.properties.len(), 2);
        assert_eq!(batch.properties[1].project, "blog");
        assert_eq!(batch.properties[1].data_type, DataType::String);
    }

    #[test]
    fn keys_without_values_default_to_string() {
        let batch = CollectedBatch::collect(vec![track("shop", None, &["ghost"], json!({}))]);

        assert_eq!(batch.properties[0].data_type, DataType::String);
    }

    #[test]
    fn links_are_emitted_per_key_occurrence_for_named_events() {
        let batch = CollectedBatch::collect(vec![
            track("shop", Some("view"), &["a", "b"], json!({})),
            track("shop", Some("view"), &["a"], json!({})),
            track("shop", None, &["c"], json!({})),
        ]);

        let links: Vec<(&str, &str)> = batch
            .event_properties
            .iter()
            .map(|l| (l.event.as_str(), l.property.as_str()))
            .collect();
        assert_eq!(links, vec![("view", "a"), ("view", "b"), ("view", "a")]);
        assert_eq!(batch.properties.len(), 3);
    }

    #[test]
    fn records_without_project_contribute_nothing() {
        let mut signup = identity(TRACK_SIGNUP, "d1", "d1", "o1");
        signup.project = String::new();

        let batch = CollectedBatch::collect(vec![
            track("", Some("view"), &["price"], json!({"price": 1})),
            signup,
        ]);

        assert_eq!(batch.records, 2);
        assert!(batch.has_nothing_to_register());
        assert!(batch.events.is_empty());
        assert!(batch.properties.is_empty());
        assert!(batch.event_properties.is_empty());
        assert!(batch.user_id_mappings.is_empty());
    }

    #[test]
    fn signup_by_logged_in_user_is_a_login_mapping() {
        let mapping = user_id_mapping(&identity(TRACK_SIGNUP, "d1", "d1", "o1")).unwrap();

        assert_eq!(mapping.distinct_id, "o1");
        assert_eq!(mapping.map_id, "d1");
        assert_eq!(mapping.map_type, MapType::LoginId);
        assert_eq!(mapping.login_id, "d1");
    }

    #[test]
    fn signup_without_login_is_an_anonymous_mapping() {
        let mapping = user_id_mapping(&identity(TRACK_SIGNUP, "d1", "", "o1")).unwrap();

        assert_eq!(mapping.distinct_id, "o1");
        assert_eq!(mapping.map_id, "d1");
        assert_eq!(mapping.map_type, MapType::AnonymousId);
        assert_eq!(mapping.login_id, "");

        // a login id that differs from the distinct id is still anonymous
        let mapping = user_id_mapping(&identity(TRACK_SIGNUP, "d1", "u9", "o1")).unwrap();
        assert_eq!(mapping.map_id, "d1");
        assert_eq!(mapping.map_type, MapType::AnonymousId);
        assert_eq!(mapping.login_id, "u9");
    }

    #[test]
    fn id_bind_maps_distinct_id_to_login() {
        let mapping = user_id_mapping(&identity(TRACK_ID_BIND, "d2", "L2", "")).unwrap();

        assert_eq!(mapping.distinct_id, "d2");
        assert_eq!(mapping.map_id, "L2");
        assert_eq!(mapping.map_type, MapType::LoginId);
        assert_eq!(mapping.login_id, "L2");
    }

    #[test]
    fn unset_or_missing_login_yields_no_mapping() {
        assert_eq!(
            user_id_mapping(&identity(TRACK_ID_BIND, "d2", "-1", "")),
            None
        );
        assert_eq!(user_id_mapping(&identity(TRACK_ID_BIND, "d2", "", "")), None);
        assert_eq!(user_id_mapping(&identity(TRACK_ID_BIND, "", "L2", "")), None);
        assert_eq!(user_id_mapping(&identity(TRACK_SIGNUP, "", "d1", "o1")), None);
    }

    #[test]
    fn signup_without_original_id_falls_back_to_login_binding() {
        let mapping = user_id_mapping(&identity(TRACK_SIGNUP, "d3", "L3", "")).unwrap();
        assert_eq!(mapping.distinct_id, "d3");
        assert_eq!(mapping.map_id, "L3");
        assert_eq!(mapping.map_type, MapType::LoginId);

        assert_eq!(user_id_mapping(&identity(TRACK_SIGNUP, "d3", "", "")), None);
    }

    #[test]
    fn other_record_types_yield_no_mapping() {
        assert_eq!(user_id_mapping(&identity("track", "d1", "d1", "o1")), None);
        assert_eq!(user_id_mapping(&identity("", "d1", "d1", "o1")), None);
    }

    #[test]
    fn mappings_are_collected_from_the_batch() {
        let batch = CollectedBatch::collect(vec![
            identity(TRACK_SIGNUP, "d1", "d1", "o1"),
            identity(TRACK_ID_BIND, "d2", "L2", ""),
            identity(TRACK_ID_BIND, "d3", "-1", ""),
        ]);

        assert_eq!(batch.user_id_mappings.len(), 2);
        assert_eq!(batch.projects.len(), 1);
    }
}
