//! `app_service` - a web app (`Microsoft.Web/sites`, kind `app`)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use azweb_core::orchestrator::ResourceHandler;
use azweb_core::provider::ProviderResult;
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::ResourceSchema;
use azweb_core::timeouts::OperationContext;

use super::flatten_string_map;
use super::site::{SiteOps, SiteSettings, flatten_site, parse_site_id, site_schema};
use crate::client::ArmClient;
use crate::id::ArmResourceId;

pub const RESOURCE_TYPE: &str = "app_service";

pub fn schema() -> ResourceSchema {
    site_schema(RESOURCE_TYPE).with_description("Manages an App Service (web app)")
}

pub struct AppServiceHandler {
    sites: SiteOps,
    subscription_id: String,
}

impl AppServiceHandler {
    pub fn new(client: Arc<dyn ArmClient>, subscription_id: String) -> Self {
        Self {
            sites: SiteOps::new(client),
            subscription_id,
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
}

#[async_trait]
impl ResourceHandler for AppServiceHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        let settings = SiteSettings::from_attributes(&resource.attributes)?;
        Ok(self.site_id(&settings).to_string())
    }

    async fn exists(&self, _ctx: &OperationContext, identifier: &str) -> ProviderResult<bool> {
        Ok(self.sites.get(identifier).await?.is_some())
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String> {
        let settings = SiteSettings::from_attributes(&resource.attributes)?;
        let id = self.site_id(&settings).to_string();
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
        let id = parse_site_id(identifier, &["sites"])?;
        let Some(body) = self.sites.get(identifier).await? else {
            return Ok(None);
        };

        let mut attributes = flatten_site(&body, &id);
        let app_settings = self.sites.list_app_settings(identifier).await?;
        attributes.insert(
            "app_settings".to_string(),
            flatten_string_map(Some(&app_settings)),
        );
        Ok(Some(attributes))
    }

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
        parse_site_id(identifier, &["sites"])?;
        self.sites.delete(ctx, identifier).await
    }
}
