use std::fmt;

use crate::inference::DataType;

// Login ids carrying this value mean "not logged in"
pub const UNSET_LOGIN_ID: &str = "-1";

pub const TRACK_SIGNUP: &str = "track_signup";
pub const TRACK_ID_BIND: &str = "track_id_bind";

/// Classification of a user id mapping, stored as text in `user_id_mapping.map_type`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MapType {
    LoginId,
    AnonymousId,
}

impl MapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapType::LoginId => "login_id",
            MapType::AnonymousId => "anonymous_id",
        }
    }
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PropertyCandidate {
    pub project: String,
    pub name: String,
    pub data_type: DataType,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EventPropertyCandidate {
    pub project: String,
    pub event: String,
    pub property: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct UserIdMapping {
    pub project_name: String,
    /// The identifier being mapped, also the conflict key within a project.
    pub distinct_id: String,
    pub map_id: String,
    pub map_type: MapType,
    /// Empty when the record carried no login id.
    pub login_id: String,
}

// The batches below are column-oriented, one vec per bound array parameter, so each
// of them can be written with a single UNNEST statement.

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventDefinitionsBatch {
    pub project_ids: Vec<i32>,
    pub names: Vec<String>,
}

impl EventDefinitionsBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            project_ids: Vec::with_capacity(capacity),
            names: Vec::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, project_id: i32, name: &str) {
        self.project_ids.push(project_id);
        self.names.push(name.to_owned());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (i32, &str)> {
        self.project_ids
            .iter()
            .copied()
            .zip(self.names.iter().map(String::as_str))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PropertyDefinitionsBatch {
    pub project_ids: Vec<i32>,
    pub names: Vec<String>,
    pub data_types: Vec<i32>,
}

impl PropertyDefinitionsBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            project_ids: Vec::with_capacity(capacity),
            names: Vec::with_capacity(capacity),
            data_types: Vec::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, project_id: i32, name: &str, data_type: DataType) {
        self.project_ids.push(project_id);
        self.names.push(name.to_owned());
        self.data_types.push(data_type.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (i32, &str, i32)> {
        self.project_ids
            .iter()
            .zip(self.names.iter())
            .zip(self.data_types.iter())
            .map(|((project_id, name), data_type)| (*project_id, name.as_str(), *data_type))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventPropertiesBatch {
    pub event_ids: Vec<i32>,
    pub property_ids: Vec<i32>,
}

impl EventPropertiesBatch {
    pub fn append(&mut self, event_id: i32, property_id: i32) {
        self.event_ids.push(event_id);
        self.property_ids.push(property_id);
    }

    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.event_ids
            .iter()
            .copied()
            .zip(self.property_ids.iter().copied())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserIdMappingsBatch {
    pub project_names: Vec<String>,
    pub distinct_ids: Vec<String>,
    pub map_ids: Vec<String>,
    pub map_types: Vec<String>,
    pub login_ids: Vec<String>,
}

impl UserIdMappingsBatch {
    pub fn append(&mut self, mapping: &UserIdMapping) {
        self.project_names.push(mapping.project_name.clone());
        self.distinct_ids.push(mapping.distinct_id.clone());
        self.map_ids.push(mapping.map_id.clone());
        self.map_types.push(mapping.map_type.as_str().to_owned());
        self.login_ids.push(mapping.login_id.clone());
    }

    pub fn len(&self) -> usize {
        self.distinct_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distinct_ids.is_empty()
    }
}

impl<'a> FromIterator<&'a UserIdMapping> for UserIdMappingsBatch {
    fn from_iter<I: IntoIterator<Item = &'a UserIdMapping>>(iter: I) -> Self {
        let mut batch = UserIdMappingsBatch::default();
        for mapping in iter {
            batch.append(mapping);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_bind_as_their_stored_codes() {
        assert_eq!(MapType::LoginId.as_str(), "login_id");
        assert_eq!(MapType::AnonymousId.to_string(), "anonymous_id");

        let mut batch = PropertyDefinitionsBatch::with_capacity(2);
        batch.append(1, "price", DataType::Numeric);
        batch.append(1, "paid", DataType::Boolean);
        assert_eq!(
            batch.rows().collect::<Vec<_>>(),
            vec![(1, "price", 1), (1, "paid", 6)]
        );
    }
}
