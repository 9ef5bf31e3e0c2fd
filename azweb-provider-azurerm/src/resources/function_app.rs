//! `function_app` - a Functions host (`Microsoft.Web/sites`, kind `functionapp`)
//!
//! The storage account and runtime version live in reserved app settings.
//! They are written alongside the user's settings and split back out on
//! read. Host keys only become readable some time after the site is created,
//! so listing them is retried while ARM answers not-found.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azweb_core::orchestrator::ResourceHandler;
use azweb_core::poll::retry_not_found;
use azweb_core::provider::ProviderResult;
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use azweb_core::timeouts::OperationContext;
use log::debug;
use serde_json::Value as Json;

use super::site::{SiteOps, SiteSettings, flatten_site, parse_site_id, site_schema};
use super::{flatten_string_map, optional_str, required_str, set_from_json};
use crate::client::{ArmClient, WEB_API_VERSION};
use crate::id::ArmResourceId;

pub const RESOURCE_TYPE: &str = "function_app";

const STORAGE_SETTING: &str = "AzureWebJobsStorage";
const DASHBOARD_SETTING: &str = "AzureWebJobsDashboard";
const VERSION_SETTING: &str = "FUNCTIONS_EXTENSION_VERSION";
const DEFAULT_VERSION: &str = "~1";

/// Upper bound on waiting for host keys within one read
const HOST_KEYS_WAIT: Duration = Duration::from_secs(2 * 60);

pub fn schema() -> ResourceSchema {
    site_schema(RESOURCE_TYPE)
        .attribute(
            AttributeSchema::new("storage_connection_string", AttributeType::String).required(),
        )
        .attribute(AttributeSchema::new("version", AttributeType::String))
        .attribute(AttributeSchema::new("default_host_key", AttributeType::String).computed())
        .with_description("Manages a Function App")
}

/// Typed function app configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAppSettings {
    pub site: SiteSettings,
    pub storage_connection_string: String,
    pub version: String,
}

impl FunctionAppSettings {
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        Ok(Self {
            site: SiteSettings::from_attributes(attributes)?,
            storage_connection_string: required_str(attributes, "storage_connection_string")?,
            version: optional_str(attributes, "version")
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        })
    }

    /// User settings plus the reserved ones
    pub fn app_settings(&self) -> BTreeMap<String, String> {
        let mut settings = self.site.app_settings.clone();
        settings.insert(STORAGE_SETTING.to_string(), self.storage_connection_string.clone());
        settings.insert(DASHBOARD_SETTING.to_string(), self.storage_connection_string.clone());
        settings.insert(VERSION_SETTING.to_string(), self.version.clone());
        settings
    }
}

pub struct FunctionAppHandler {
    sites: SiteOps,
    subscription_id: String,
    poll_interval: Duration,
}

impl FunctionAppHandler {
    pub fn new(
        client: Arc<dyn ArmClient>,
        subscription_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sites: SiteOps::new(client),
            subscription_id,
            poll_interval,
        }
    }

    fn site_id(&self, settings: &SiteSettings) -> ArmResourceId {
        ArmResourceId::new(
            &self.subscription_id,
            &settings.resource_group,
            "Microsoft.Web",
            "sites",
            &settings.name,
        )
    }

    async fn list_host_keys(
        &self,
        ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Json> {
        let path = format!("{}/host/default/listkeys", identifier);
        let deadline = ctx.deadline.shorten(HOST_KEYS_WAIT);
        retry_not_found(deadline, self.poll_interval, || {
            let path = path.clone();
            async move { self.sites.client().post(&path, WEB_API_VERSION, None).await }
        })
        .await
    }
}

#[async_trait]
impl ResourceHandler for FunctionAppHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        let settings = FunctionAppSettings::from_attributes(&resource.attributes)?;
        Ok(self.site_id(&settings.site).to_string())
    }

    async fn exists(&self, _ctx: &OperationContext, identifier: &str) -> ProviderResult<bool> {
        Ok(self.sites.get(identifier).await?.is_some())
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String> {
        let settings = FunctionAppSettings::from_attributes(&resource.attributes)?;
        let id = self.site_id(&settings.site).to_string();
        self.sites
            .put(ctx, &id, &settings.site.body("functionapp"), &settings.app_settings())
            .await?;
        Ok(id)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<()> {
        let settings = FunctionAppSettings::from_attributes(&resource.attributes)?;
        self.sites
            .put(
                ctx,
                identifier,
                &settings.site.body("functionapp"),
                &settings.app_settings(),
            )
            .await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = parse_site_id(identifier, &["sites"])?;
        let Some(body) = self.sites.get(identifier).await? else {
            return Ok(None);
        };
        let mut attributes = flatten_site(&body, &id);

        let mut app_settings = self.sites.list_app_settings(identifier).await?;
        if let Some(settings) = app_settings.as_object_mut() {
            let storage = settings.remove(STORAGE_SETTING);
            set_from_json(&mut attributes, "storage_connection_string", storage.as_ref());
            let version = settings.remove(VERSION_SETTING);
            set_from_json(&mut attributes, "version", version.as_ref());
            settings.remove(DASHBOARD_SETTING);
        }
        attributes.insert(
            "app_settings".to_string(),
            flatten_string_map(Some(&app_settings)),
        );

        let keys = self.list_host_keys(ctx, identifier).await?;
        match keys.pointer("/functionKeys/default").and_then(Json::as_str) {
            Some(key) => {
                attributes.insert("default_host_key".to_string(), Value::from(key));
            }
            None => debug!("{} has no default function key", identifier),
        }

        Ok(Some(attributes))
    }

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
        parse_site_id(identifier, &["sites"])?;
        self.sites.delete(ctx, identifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeArmClient;
    use azweb_core::lock::LockManager;
    use azweb_core::orchestrator::Orchestrator;
    use azweb_core::timeouts::OperationTimeouts;
    use serde_json::json;

    const SITE: &str = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites/func";
    const STORAGE: &str = "DefaultEndpointsProtocol=https;AccountName=funcstore;AccountKey=a2V5";

    fn keys_path() -> String {
        format!("{}/host/default/listkeys", SITE)
    }

    fn resource() -> Resource {
        let mut settings = HashMap::new();
        settings.insert("FEATURE".to_string(), Value::from("on"));
        let mut resource = Resource::new(RESOURCE_TYPE, "func")
            .with_attribute("name", "func")
            .with_attribute("resource_group_name", "rg")
            .with_attribute("location", "westeurope")
            .with_attribute(
                "app_service_plan_id",
                "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/serverfarms/plan",
            )
            .with_attribute("storage_connection_string", STORAGE)
            .with_attribute("version", "~3");
        resource
            .attributes
            .insert("app_settings".to_string(), Value::Map(settings));
        resource
    }

    fn setup() -> (Arc<FakeArmClient>, FunctionAppHandler, Orchestrator) {
        let fake = Arc::new(FakeArmClient::new());
        fake.insert(
            &keys_path(),
            json!({"masterKey": "m", "functionKeys": {"default": "k"}}),
        );
        let handler =
            FunctionAppHandler::new(fake.clone(), "0000".to_string(), Duration::from_secs(1));
        let orchestrator =
            Orchestrator::new(Arc::new(LockManager::new()), OperationTimeouts::default());
        (fake, handler, orchestrator)
    }

    #[test]
    fn reserved_settings_are_added() {
        let settings = FunctionAppSettings::from_attributes(&resource().attributes).unwrap();
        let app_settings = settings.app_settings();

        assert_eq!(app_settings.get(STORAGE_SETTING).map(String::as_str), Some(STORAGE));
        assert_eq!(app_settings.get(DASHBOARD_SETTING).map(String::as_str), Some(STORAGE));
        assert_eq!(app_settings.get(VERSION_SETTING).map(String::as_str), Some("~3"));
        assert_eq!(app_settings.get("FEATURE").map(String::as_str), Some("on"));
    }

    #[test]
    fn version_defaults() {
        let mut attributes = resource().attributes;
        attributes.remove("version");
        let settings = FunctionAppSettings::from_attributes(&attributes).unwrap();
        assert_eq!(settings.version, DEFAULT_VERSION);
    }

    #[tokio::test(start_paused = true)]
    async fn create_reads_back_split_settings_and_keys() {
        let (fake, handler, orchestrator) = setup();

        let state = orchestrator.create(&handler, &resource()).await.unwrap();

        assert_eq!(fake.object(SITE).unwrap()["kind"], "functionapp");
        assert_eq!(
            state.attributes.get("storage_connection_string"),
            Some(&Value::from(STORAGE))
        );
        assert_eq!(state.attributes.get("version"), Some(&Value::from("~3")));
        assert_eq!(state.attributes.get("default_host_key"), Some(&Value::from("k")));
        let settings = state.attributes.get("app_settings").and_then(Value::as_map).unwrap();
        assert_eq!(settings.len(), 1);
        assert!(settings.contains_key("FEATURE"));
    }

    #[tokio::test(start_paused = true)]
    async fn host_keys_are_retried_while_not_found() {
        let (fake, handler, orchestrator) = setup();
        fake.not_found_times(&keys_path(), 2);

        let state = orchestrator.create(&handler, &resource()).await.unwrap();

        assert_eq!(state.attributes.get("default_host_key"), Some(&Value::from("k")));
        assert_eq!(fake.count(&format!("POST {}", keys_path())), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn host_keys_that_never_appear_time_out() {
        let (fake, handler, orchestrator) = setup();
        fake.insert(SITE, json!({"location": "westeurope", "properties": {}}));
        fake.not_found_times(&keys_path(), usize::MAX);

        let err = orchestrator
            .read(&handler, &resource().id, SITE)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn create_refuses_existing_site() {
        let (fake, handler, orchestrator) = setup();
        fake.insert(SITE, json!({"location": "westeurope"}));

        let err = orchestrator.create(&handler, &resource()).await.unwrap_err();

        assert!(err.is_import_exists());
    }
}
