//! Shared mapping for `Microsoft.Web/sites` and their slots
//!
//! App services, function apps and slots are all sites underneath. They
//! share the request body, the `site_config` block and app settings, which
//! ARM keeps in a separate `config/appsettings` resource.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::resource::Value;
use azweb_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use azweb_core::timeouts::OperationContext;
use serde_json::{Map, Value as Json, json};

use super::{
    arm_id_type, base_schema, flatten_string_map, normalize_location, optional_bool, required_str,
    set_from_json, string_map, to_json_map,
};
use crate::client::{ArmClient, WEB_API_VERSION};
use crate::id::ArmResourceId;

/// `site_config` block fields: (attribute name, ARM property)
pub const SITE_CONFIG_FIELDS: &[(&str, &str)] = &[
    ("always_on", "alwaysOn"),
    ("ftps_state", "ftpsState"),
    ("http2_enabled", "http2Enabled"),
    ("min_tls_version", "minTlsVersion"),
    ("linux_fx_version", "linuxFxVersion"),
    ("use_32_bit_worker_process", "use32BitWorkerProcess"),
    ("websockets_enabled", "webSocketsEnabled"),
];

/// Top-level site properties: (attribute name, ARM property)
const SITE_FIELDS: &[(&str, &str)] = &[
    ("enabled", "enabled"),
    ("https_only", "httpsOnly"),
    ("client_affinity_enabled", "clientAffinityEnabled"),
    ("default_site_hostname", "defaultHostName"),
    ("outbound_ip_addresses", "outboundIpAddresses"),
    ("possible_outbound_ip_addresses", "possibleOutboundIpAddresses"),
];

fn enum_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
}

pub fn site_config_block() -> AttributeType {
    let fields = [
        AttributeSchema::new("always_on", AttributeType::Bool),
        AttributeSchema::new("ftps_state", enum_of(&["AllAllowed", "FtpsOnly", "Disabled"])),
        AttributeSchema::new("http2_enabled", AttributeType::Bool),
        AttributeSchema::new("min_tls_version", enum_of(&["1.0", "1.1", "1.2"])),
        AttributeSchema::new("linux_fx_version", AttributeType::String),
        AttributeSchema::new("use_32_bit_worker_process", AttributeType::Bool),
        AttributeSchema::new("websockets_enabled", AttributeType::Bool),
    ];
    AttributeType::Block(fields.into_iter().map(|f| (f.name.clone(), f)).collect())
}

/// Attributes every site-backed resource has
pub fn site_schema(resource_type: &str) -> ResourceSchema {
    base_schema(resource_type)
        .attribute(AttributeSchema::new("app_service_plan_id", arm_id_type()).required())
        .attribute(AttributeSchema::new("enabled", AttributeType::Bool))
        .attribute(AttributeSchema::new("https_only", AttributeType::Bool))
        .attribute(AttributeSchema::new("client_affinity_enabled", AttributeType::Bool))
        .attribute(AttributeSchema::new(
            "app_settings",
            AttributeType::Map(Box::new(AttributeType::String)),
        ))
        .attribute(AttributeSchema::new("site_config", site_config_block()))
        .attribute(AttributeSchema::new("default_site_hostname", AttributeType::String).computed())
        .attribute(AttributeSchema::new("outbound_ip_addresses", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("possible_outbound_ip_addresses", AttributeType::String)
                .computed(),
        )
}

/// Typed site configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSettings {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub plan_id: String,
    pub enabled: bool,
    pub https_only: bool,
    pub client_affinity_enabled: Option<bool>,
    pub app_settings: BTreeMap<String, String>,
    pub site_config: Map<String, Json>,
    pub tags: BTreeMap<String, String>,
}

impl SiteSettings {
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        let site_config = attributes
            .get("site_config")
            .and_then(Value::as_map)
            .map(expand_site_config)
            .unwrap_or_default();

        Ok(Self {
            name: required_str(attributes, "name")?,
            resource_group: required_str(attributes, "resource_group_name")?,
            location: required_str(attributes, "location")?,
            plan_id: required_str(attributes, "app_service_plan_id")?,
            enabled: optional_bool(attributes, "enabled").unwrap_or(true),
            https_only: optional_bool(attributes, "https_only").unwrap_or(false),
            client_affinity_enabled: optional_bool(attributes, "client_affinity_enabled"),
            app_settings: string_map(attributes, "app_settings"),
            site_config,
            tags: string_map(attributes, "tags"),
        })
    }

    /// Request body for `PUT sites/{name}` (or a slot)
    pub fn body(&self, kind: &str) -> Json {
        let mut properties = json!({
            "serverFarmId": self.plan_id,
            "enabled": self.enabled,
            "httpsOnly": self.https_only,
            "siteConfig": Json::Object(self.site_config.clone()),
        });
        if let Some(affinity) = self.client_affinity_enabled {
            properties["clientAffinityEnabled"] = json!(affinity);
        }
        json!({
            "location": self.location,
            "kind": kind,
            "tags": to_json_map(&self.tags),
            "properties": properties,
        })
    }
}

fn expand_site_config(block: &HashMap<String, Value>) -> Map<String, Json> {
    SITE_CONFIG_FIELDS
        .iter()
        .filter_map(|(attr, arm)| block.get(*attr).map(|v| (arm.to_string(), v.to_json())))
        .collect()
}

/// Attributes shared by every site-backed resource, from a site body
pub fn flatten_site(body: &Json, id: &ArmResourceId) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_string(), Value::from(id.name()));
    attributes.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group.as_str()),
    );
    if let Some(location) = body.get("location").and_then(Json::as_str) {
        attributes.insert(
            "location".to_string(),
            Value::String(normalize_location(location)),
        );
    }
    attributes.insert("tags".to_string(), flatten_string_map(body.get("tags")));

    let properties = body.get("properties");
    set_from_json(
        &mut attributes,
        "app_service_plan_id",
        properties.and_then(|p| p.get("serverFarmId")),
    );
    for (attr, arm) in SITE_FIELDS {
        set_from_json(&mut attributes, attr, properties.and_then(|p| p.get(*arm)));
    }

    if let Some(config) = properties.and_then(|p| p.get("siteConfig")) {
        let mut block = HashMap::new();
        for (attr, arm) in SITE_CONFIG_FIELDS {
            set_from_json(&mut block, attr, config.get(*arm));
        }
        attributes.insert("site_config".to_string(), Value::Map(block));
    }

    attributes
}

/// Calls shared by the site-backed handlers
#[derive(Clone)]
pub struct SiteOps {
    client: Arc<dyn ArmClient>,
}

impl SiteOps {
    pub fn new(client: Arc<dyn ArmClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn ArmClient> {
        &self.client
    }

    pub async fn get(&self, path: &str) -> ProviderResult<Option<Json>> {
        self.client.get(path, WEB_API_VERSION).await
    }

    /// Create or update the site, then its app settings
    ///
    /// Once the site exists, any later failure carries its ID.
    pub async fn put(
        &self,
        ctx: &OperationContext,
        path: &str,
        body: &Json,
        app_settings: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        self.client.put(ctx, path, WEB_API_VERSION, body).await?;
        self.put_app_settings(ctx, path, app_settings)
            .await
            .map_err(|e| e.with_identifier(path))
    }

    pub async fn put_app_settings(
        &self,
        ctx: &OperationContext,
        path: &str,
        app_settings: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let body = json!({ "properties": to_json_map(app_settings) });
        self.client
            .put(ctx, &format!("{}/config/appsettings", path), WEB_API_VERSION, &body)
            .await?;
        Ok(())
    }

    /// Current app settings as a JSON object
    pub async fn list_app_settings(&self, path: &str) -> ProviderResult<Json> {
        let listed = self
            .client
            .post(&format!("{}/config/appsettings/list", path), WEB_API_VERSION, None)
            .await?;
        Ok(listed
            .get("properties")
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    pub async fn delete(&self, ctx: &OperationContext, path: &str) -> ProviderResult<()> {
        self.client.delete(ctx, path, WEB_API_VERSION).await
    }
}

/// Parse `identifier` as a site (or slot, when `types` says so) ID
pub fn parse_site_id(identifier: &str, types: &[&str]) -> ProviderResult<ArmResourceId> {
    ArmResourceId::parse_as(identifier, "Microsoft.Web", types).map_err(ProviderError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> HashMap<String, Value> {
        let mut site_config = HashMap::new();
        site_config.insert("always_on".to_string(), Value::Bool(true));
        site_config.insert("min_tls_version".to_string(), Value::from("1.2"));
        let mut app_settings = HashMap::new();
        app_settings.insert("FEATURE".to_string(), Value::from("on"));

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from("web"));
        attributes.insert("resource_group_name".to_string(), Value::from("rg"));
        attributes.insert("location".to_string(), Value::from("westeurope"));
        attributes.insert(
            "app_service_plan_id".to_string(),
            Value::from("/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/serverfarms/plan"),
        );
        attributes.insert("https_only".to_string(), Value::Bool(true));
        attributes.insert("site_config".to_string(), Value::Map(site_config));
        attributes.insert("app_settings".to_string(), Value::Map(app_settings));
        attributes
    }

    #[test]
    fn body_maps_attribute_names() {
        let settings = SiteSettings::from_attributes(&attributes()).unwrap();
        let body = settings.body("app");

        assert_eq!(body["kind"], "app");
        assert_eq!(body["properties"]["httpsOnly"], true);
        assert_eq!(body["properties"]["enabled"], true);
        assert_eq!(body["properties"]["siteConfig"]["alwaysOn"], true);
        assert_eq!(body["properties"]["siteConfig"]["minTlsVersion"], "1.2");
        assert!(body["properties"].get("clientAffinityEnabled").is_none());
        assert_eq!(settings.app_settings.get("FEATURE").map(String::as_str), Some("on"));
    }

    #[test]
    fn missing_plan_is_a_validation_error() {
        let mut attributes = attributes();
        attributes.remove("app_service_plan_id");
        let err = SiteSettings::from_attributes(&attributes).unwrap_err();
        assert!(err.message.contains("app_service_plan_id"));
    }

    #[test]
    fn flatten_reads_back_what_body_sent() {
        let settings = SiteSettings::from_attributes(&attributes()).unwrap();
        let mut body = settings.body("app");
        body["location"] = json!("West Europe");
        body["properties"]["defaultHostName"] = json!("web.azurewebsites.net");
        body["properties"]["siteConfig"]["ftpsState"] = json!("AllAllowed");
        let id = ArmResourceId::new("0000", "rg", "Microsoft.Web", "sites", "web");

        let flat = flatten_site(&body, &id);

        assert_eq!(flat.get("location"), Some(&Value::from("westeurope")));
        assert_eq!(flat.get("https_only"), Some(&Value::Bool(true)));
        assert_eq!(
            flat.get("default_site_hostname"),
            Some(&Value::from("web.azurewebsites.net"))
        );
        let block = flat.get("site_config").and_then(Value::as_map).unwrap();
        assert_eq!(block.get("always_on"), Some(&Value::Bool(true)));
        assert_eq!(block.get("ftps_state"), Some(&Value::from("AllAllowed")));
    }
}
