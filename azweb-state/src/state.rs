//! Persisted state: which ARM object each manifest resource maps to

use std::collections::HashMap;

use azweb_core::resource::{ResourceId, State, Value};
use serde::{Deserialize, Serialize};

/// Contents of `azweb.state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Fixed for the life of a state; a write from another lineage is refused
    pub lineage: String,
    /// azweb version that last wrote this state
    pub azweb_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            azweb_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Bump the serial before a write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.azweb_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.matches(id))
    }

    /// Insert, or replace the entry with the same type and name
    pub fn upsert(&mut self, resource: ResourceState) {
        match self.resources.iter_mut().find(|r| r.matches(&resource.id())) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self.resources.iter().position(|r| r.matches(id))?;
        Some(self.resources.remove(pos))
    }

    /// Current states keyed by resource, for planning
    pub fn states(&self) -> HashMap<ResourceId, State> {
        self.resources
            .iter()
            .map(|r| (r.id(), r.to_state()))
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// One managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: String,
    pub name: String,
    /// ARM resource ID
    pub identifier: String,
    pub attributes: HashMap<String, serde_json::Value>,
    /// Created, but a later step failed; the next apply replaces it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
}

impl ResourceState {
    pub fn new(id: &ResourceId, identifier: impl Into<String>) -> Self {
        Self {
            resource_type: id.resource_type.clone(),
            name: id.name.clone(),
            identifier: identifier.into(),
            attributes: HashMap::new(),
            tainted: false,
        }
    }

    /// Record a provider state; `None` when it has no ARM ID
    pub fn from_state(state: &State) -> Option<Self> {
        let identifier = state.identifier.as_deref()?;
        let mut resource = Self::new(&state.id, identifier);
        resource.attributes = state
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Some(resource)
    }

    /// A partially created object known only by its ARM ID
    pub fn tainted(id: &ResourceId, identifier: impl Into<String>) -> Self {
        Self {
            tainted: true,
            ..Self::new(id, identifier)
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    fn matches(&self, id: &ResourceId) -> bool {
        self.resource_type == id.resource_type && self.name == id.name
    }

    pub fn to_state(&self) -> State {
        let attributes = self
            .attributes
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect();
        State::existing(self.id(), attributes).with_identifier(&self.identifier)
    }
}
