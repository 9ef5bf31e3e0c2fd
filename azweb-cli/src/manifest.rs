//! JSON manifest: the desired resources plus provider and backend settings
//!
//! ```json
//! {
//!   "provider": { "subscription_id": "0000" },
//!   "resources": [
//!     {
//!       "type": "app_service",
//!       "name": "web",
//!       "attributes": { "name": "web", "location": "westeurope" },
//!       "depends_on": ["app_service_certificate.www"],
//!       "timeouts": { "create": "45m" }
//!     }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use azweb_core::resource::{Resource, ResourceId, Value};
use azweb_core::timeouts::OperationTimeouts;
use azweb_state::BackendConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    provider: HashMap<String, String>,
    #[serde(default)]
    backend: Option<RawBackend>,
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackend {
    #[serde(rename = "type", default)]
    backend_type: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    timeouts: HashMap<String, String>,
}

/// A parsed and checked manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Settings overlaid on the `ARM_*` environment
    pub provider: HashMap<String, String>,
    pub backend: BackendConfig,
    pub resources: Vec<Resource>,
    /// Per-resource timeout overrides
    pub timeouts: HashMap<ResourceId, OperationTimeouts>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let raw: RawManifest =
            serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))?;

        let mut backend = BackendConfig::local();
        if let Some(raw_backend) = raw.backend {
            if !raw_backend.backend_type.is_empty() {
                backend.backend_type = raw_backend.backend_type;
            }
            if let Some(path) = raw_backend.path {
                backend
                    .attributes
                    .insert("path".to_string(), Value::String(path));
            }
        }

        let mut resources = Vec::new();
        let mut timeouts = HashMap::new();
        let mut seen = HashSet::new();
        for raw in raw.resources {
            let id = ResourceId::new(&raw.resource_type, &raw.name);
            if !seen.insert(id.clone()) {
                return Err(format!("{} is declared more than once", id));
            }

            let mut resource = Resource::new(&raw.resource_type, &raw.name);
            resource.attributes = raw
                .attributes
                .iter()
                .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                .collect();
            resource.depends_on = raw
                .depends_on
                .iter()
                .map(|address| parse_address(address))
                .collect::<Result<_, _>>()?;

            if !raw.timeouts.is_empty() {
                let overrides = OperationTimeouts::default()
                    .with_overrides(&raw.timeouts)
                    .map_err(|e| format!("{}: {}", id, e))?;
                timeouts.insert(id, overrides);
            }
            resources.push(resource);
        }

        for resource in &resources {
            if let Some(missing) = resource.depends_on.iter().find(|d| !seen.contains(*d)) {
                return Err(format!(
                    "{} depends on {}, which is not declared",
                    resource.id, missing
                ));
            }
        }

        Ok(Self {
            provider: raw.provider,
            backend,
            resources,
            timeouts,
        })
    }

    pub fn find(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }
}

/// `type.name`, e.g. `app_service.web`
pub fn parse_address(address: &str) -> Result<ResourceId, String> {
    match address.split_once('.') {
        Some((resource_type, name)) if !resource_type.is_empty() && !name.is_empty() => {
            Ok(ResourceId::new(resource_type, name))
        }
        _ => Err(format!(
            "\"{}\" is not a resource address (expected type.name)",
            address
        )),
    }
}
