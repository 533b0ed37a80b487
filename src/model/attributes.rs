use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loosely-structured attribute bag for nested Jira objects
///
/// Jira returns objects such as `status`, `priority`, `assignee` and comment
/// authors as open-ended maps whose shape varies between instances and
/// versions. Only a handful of entries are ever read, so this keeps the raw
/// map and offers accessors that yield an empty string instead of failing
/// when an entry is absent or not a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    /// Creates an empty attribute bag
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a bag from an arbitrary JSON value
    ///
    /// Objects are copied as-is; `null` and every other JSON type yield an
    /// empty bag (Jira sends `null` for an unassigned issue, for example).
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self(map.clone()),
            _ => Self::new(),
        }
    }

    /// Returns the string entry `name`, or `""` if absent or not a string
    pub fn get_str(&self, name: &str) -> &str {
        self.0.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Returns the raw entry `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `name` entry (status, priority and issue type names; user logins)
    pub fn name(&self) -> &str {
        self.get_str("name")
    }

    /// `displayName` entry of a user object
    pub fn display_name(&self) -> &str {
        self.get_str("displayName")
    }

    /// `key` entry (project or user key)
    pub fn key(&self) -> &str {
        self.get_str("key")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
