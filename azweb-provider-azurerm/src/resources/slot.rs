//! `app_service_slot` - a deployment slot (`Microsoft.Web/sites/{app}/slots/{name}`)
//!
//! Slots mutate their parent site, so they hold the app service lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use azweb_core::lock::LockKey;
use azweb_core::orchestrator::ResourceHandler;
use azweb_core::provider::ProviderResult;
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::{AttributeSchema, ResourceSchema};
use azweb_core::timeouts::OperationContext;

use super::site::{SiteOps, SiteSettings, flatten_site, parse_site_id, site_schema};
use super::{APP_SERVICE_LOCK, app_service_name_type, flatten_string_map, required_str};
use crate::client::ArmClient;
use crate::id::ArmResourceId;

pub const RESOURCE_TYPE: &str = "app_service_slot";

const SLOT_TYPES: &[&str] = &["sites", "slots"];

pub fn schema() -> ResourceSchema {
    site_schema(RESOURCE_TYPE)
        .attribute(
            AttributeSchema::new("app_service_name", app_service_name_type())
                .required()
                .force_new(),
        )
        .with_description("Manages a deployment slot of an App Service")
}

pub struct SlotHandler {
    sites: SiteOps,
    subscription_id: String,
}

impl SlotHandler {
    pub fn new(client: Arc<dyn ArmClient>, subscription_id: String) -> Self {
        Self {
            sites: SiteOps::new(client),
            subscription_id,
        }
    }

    fn slot_id(&self, settings: &SiteSettings, app_service_name: &str) -> ArmResourceId {
        ArmResourceId::new(
            &self.subscription_id,
            &settings.resource_group,
            "Microsoft.Web",
            "sites",
            app_service_name,
        )
        .child("slots", &settings.name)
    }
}

#[async_trait]
impl ResourceHandler for SlotHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        let settings = SiteSettings::from_attributes(&resource.attributes)?;
        let app = required_str(&resource.attributes, "app_service_name")?;
        Ok(self.slot_id(&settings, &app).to_string())
    }

    fn lock_keys(&self, attributes: &HashMap<String, Value>) -> ProviderResult<Vec<LockKey>> {
        let app = required_str(attributes, "app_service_name")?;
        Ok(vec![LockKey::new(app, APP_SERVICE_LOCK)])
    }

    async fn exists(&self, _ctx: &OperationContext, identifier: &str) -> ProviderResult<bool> {
        Ok(self.sites.get(identifier).await?.is_some())
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String> {
        let id = self.identifier_for(resource)?;
        let settings = SiteSettings::from_attributes(&resource.attributes)?;
        self.sites
            .put(ctx, &id, &settings.body("app"), &settings.app_settings)
            .await?;
        Ok(id)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<()> {
        let settings = SiteSettings::from_attributes(&resource.attributes)?;
        self.sites
            .put(ctx, identifier, &settings.body("app"), &settings.app_settings)
            .await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = parse_site_id(identifier, SLOT_TYPES)?;
        let Some(body) = self.sites.get(identifier).await? else {
            return Ok(None);
        };

        let mut attributes = flatten_site(&body, &id);
        if let Some(app) = id.segment("sites") {
            attributes.insert("app_service_name".to_string(), Value::from(app));
        }
        let app_settings = self.sites.list_app_settings(identifier).await?;
        attributes.insert(
            "app_settings".to_string(),
            flatten_string_map(Some(&app_settings)),
        );
        Ok(Some(attributes))
    }

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
        parse_site_id(identifier, SLOT_TYPES)?;
        self.sites.delete(ctx, identifier).await
    }
}
