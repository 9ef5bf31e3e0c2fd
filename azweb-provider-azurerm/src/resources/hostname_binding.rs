//! `app_service_custom_hostname_binding` - a custom domain on a site
//! (`Microsoft.Web/sites/{app}/hostNameBindings/{hostname}`)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use azweb_core::lock::LockKey;
use azweb_core::orchestrator::ResourceHandler;
use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use azweb_core::timeouts::OperationContext;
use serde_json::{Value as Json, json};

use super::{
    APP_SERVICE_LOCK, app_service_name_type, custom, optional_str, required_str, set_from_json,
    validate_resource_group_name,
};
use crate::client::{ArmClient, WEB_API_VERSION};
use crate::id::ArmResourceId;

pub const RESOURCE_TYPE: &str = "app_service_custom_hostname_binding";

const BINDING_TYPES: &[&str] = &["sites", "hostNameBindings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslState {
    Disabled,
    SniEnabled,
    IpBasedEnabled,
}

impl SslState {
    const ALL: [SslState; 3] = [
        SslState::Disabled,
        SslState::SniEnabled,
        SslState::IpBasedEnabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SslState::Disabled => "Disabled",
            SslState::SniEnabled => "SniEnabled",
            SslState::IpBasedEnabled => "IpBasedEnabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

pub fn schema() -> ResourceSchema {
    let ssl_states = SslState::ALL.iter().map(|s| s.as_str().to_string()).collect();

    ResourceSchema::new(RESOURCE_TYPE)
        .attribute(
            AttributeSchema::new("hostname", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("app_service_name", app_service_name_type())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new(
                "resource_group_name",
                custom("ResourceGroupName", validate_resource_group_name),
            )
            .required()
            .force_new(),
        )
        .attribute(AttributeSchema::new("ssl_state", AttributeType::Enum(ssl_states)).force_new())
        .attribute(AttributeSchema::new("thumbprint", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("virtual_ip", AttributeType::String).computed())
        .with_description("Binds a custom hostname to an App Service")
}

/// Typed binding configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameBindingSettings {
    pub hostname: String,
    pub app_service_name: String,
    pub resource_group: String,
    pub ssl_state: Option<SslState>,
    pub thumbprint: Option<String>,
}

impl HostnameBindingSettings {
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        let ssl_state = match optional_str(attributes, "ssl_state") {
            Some(value) => Some(SslState::parse(&value).ok_or_else(|| {
                ProviderError::validation(format!("\"{}\" is not a valid ssl_state", value))
            })?),
            None => None,
        };
        let thumbprint = optional_str(attributes, "thumbprint");

        let enabled = matches!(ssl_state, Some(s) if s != SslState::Disabled);
        if enabled && thumbprint.is_none() {
            return Err(ProviderError::validation(
                "\"thumbprint\" is required when \"ssl_state\" is set",
            ));
        }
        if thumbprint.is_some() && !enabled {
            return Err(ProviderError::validation(
                "\"ssl_state\" must be SniEnabled or IpBasedEnabled when \"thumbprint\" is set",
            ));
        }

        Ok(Self {
            hostname: required_str(attributes, "hostname")?,
            app_service_name: required_str(attributes, "app_service_name")?,
            resource_group: required_str(attributes, "resource_group_name")?,
            ssl_state,
            thumbprint,
        })
    }

    pub fn body(&self) -> Json {
        let mut properties = json!({ "siteName": self.app_service_name });
        if let Some(ssl_state) = self.ssl_state {
            properties["sslState"] = json!(ssl_state.as_str());
        }
        if let Some(thumbprint) = &self.thumbprint {
            properties["thumbprint"] = json!(thumbprint);
        }
        json!({ "properties": properties })
    }
}

pub struct HostnameBindingHandler {
    client: Arc<dyn ArmClient>,
    subscription_id: String,
}

impl HostnameBindingHandler {
    pub fn new(client: Arc<dyn ArmClient>, subscription_id: String) -> Self {
        Self {
            client,
            subscription_id,
        }
    }
}

fn parse_binding_id(identifier: &str) -> ProviderResult<ArmResourceId> {
    Ok(ArmResourceId::parse_as(
        identifier,
        "Microsoft.Web",
        BINDING_TYPES,
    )?)
}

#[async_trait]
impl ResourceHandler for HostnameBindingHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        let settings = HostnameBindingSettings::from_attributes(&resource.attributes)?;
        Ok(ArmResourceId::new(
            &self.subscription_id,
            &settings.resource_group,
            "Microsoft.Web",
            "sites",
            &settings.app_service_name,
        )
        .child("hostNameBindings", &settings.hostname)
        .to_string())
    }

    fn lock_keys(&self, attributes: &HashMap<String, Value>) -> ProviderResult<Vec<LockKey>> {
        let app = required_str(attributes, "app_service_name")?;
        Ok(vec![LockKey::new(app, APP_SERVICE_LOCK)])
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String> {
        let id = self.identifier_for(resource)?;
        let settings = HostnameBindingSettings::from_attributes(&resource.attributes)?;
        self.client
            .put(ctx, &id, WEB_API_VERSION, &settings.body())
            .await?;
        Ok(id)
    }

    async fn update(
        &self,
        _ctx: &OperationContext,
        identifier: &str,
        _resource: &Resource,
    ) -> ProviderResult<()> {
        Err(ProviderError::unsupported(format!(
            "hostname binding {} cannot be updated in place",
            identifier
        )))
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = parse_binding_id(identifier)?;
        let Some(body) = self.client.get(identifier, WEB_API_VERSION).await? else {
            return Ok(None);
        };

        let mut attributes = HashMap::new();
        attributes.insert("hostname".to_string(), Value::from(id.name()));
        if let Some(app) = id.segment("sites") {
            attributes.insert("app_service_name".to_string(), Value::from(app));
        }
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.resource_group.as_str()),
        );

        let properties = body.get("properties");
        for (attr, arm) in [
            ("ssl_state", "sslState"),
            ("thumbprint", "thumbprint"),
            ("virtual_ip", "virtualIP"),
        ] {
            set_from_json(&mut attributes, attr, properties.and_then(|p| p.get(arm)));
        }
        Ok(Some(attributes))
    }

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
        parse_binding_id(identifier)?;
        self.client.delete(ctx, identifier, WEB_API_VERSION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeArmClient;
    use azweb_core::lock::LockManager;
    use azweb_core::orchestrator::Orchestrator;
    use azweb_core::timeouts::OperationTimeouts;

    const BINDING: &str = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites/web/hostNameBindings/www.example.com";

    fn resource() -> Resource {
        Resource::new(RESOURCE_TYPE, "www")
            .with_attribute("hostname", "www.example.com")
            .with_attribute("app_service_name", "web")
            .with_attribute("resource_group_name", "rg")
    }

    fn setup() -> (Arc<FakeArmClient>, HostnameBindingHandler, Orchestrator) {
        let fake = Arc::new(FakeArmClient::new());
        let handler = HostnameBindingHandler::new(fake.clone(), "0000".to_string());
        let orchestrator =
            Orchestrator::new(Arc::new(LockManager::new()), OperationTimeouts::default());
        (fake, handler, orchestrator)
    }

    #[test]
    fn ssl_state_needs_thumbprint() {
        let resource = resource().with_attribute("ssl_state", "SniEnabled");
        let err = HostnameBindingSettings::from_attributes(&resource.attributes).unwrap_err();
        assert!(err.message.contains("\"thumbprint\" is required"));
    }

    #[test]
    fn thumbprint_needs_ssl_state() {
        let resource = resource().with_attribute("thumbprint", "ABCDEF");
        assert!(HostnameBindingSettings::from_attributes(&resource.attributes).is_err());

        let disabled = resource.with_attribute("ssl_state", "Disabled");
        assert!(HostnameBindingSettings::from_attributes(&disabled.attributes).is_err());
    }

    #[test]
    fn sni_binding_body() {
        let resource = resource()
            .with_attribute("ssl_state", "SniEnabled")
            .with_attribute("thumbprint", "ABCDEF");
        let settings = HostnameBindingSettings::from_attributes(&resource.attributes).unwrap();
        let body = settings.body();
        assert_eq!(body["properties"]["siteName"], "web");
        assert_eq!(body["properties"]["sslState"], "SniEnabled");
        assert_eq!(body["properties"]["thumbprint"], "ABCDEF");
    }

    #[test]
    fn every_input_forces_replacement() {
        assert_eq!(
            schema().force_new_attributes(),
            vec![
                "app_service_name",
                "hostname",
                "resource_group_name",
                "ssl_state",
                "thumbprint"
            ]
        );
    }

    #[tokio::test]
    async fn create_then_delete() {
        let (fake, handler, orchestrator) = setup();

        let state = orchestrator.create(&handler, &resource()).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some(BINDING));
        assert_eq!(state.attributes.get("app_service_name"), Some(&Value::from("web")));

        orchestrator.delete(&handler, &state.id, BINDING).await.unwrap();
        assert!(fake.object(BINDING).is_none());
    }

    #[tokio::test]
    async fn create_refuses_existing_binding() {
        let (fake, handler, orchestrator) = setup();
        fake.insert(BINDING, json!({"properties": {"siteName": "web"}}));

        let err = orchestrator.create(&handler, &resource()).await.unwrap_err();

        assert!(err.is_import_exists());
        assert_eq!(fake.count("PUT"), 0);
    }

    #[test]
    fn bindings_on_one_site_share_a_lock() {
        let (_fake, handler, _orchestrator) = setup();
        let other = Resource::new(RESOURCE_TYPE, "api")
            .with_attribute("hostname", "api.example.com")
            .with_attribute("app_service_name", "web")
            .with_attribute("resource_group_name", "rg");

        assert_eq!(
            handler.lock_keys(&resource().attributes).unwrap(),
            handler.lock_keys(&other.attributes).unwrap()
        );
    }

    #[tokio::test]
    async fn update_is_unsupported() {
        let (fake, handler, orchestrator) = setup();
        fake.insert(BINDING, json!({"properties": {"siteName": "web"}}));

        let err = orchestrator
            .update(&handler, BINDING, &resource())
            .await
            .unwrap_err();

        assert!(err.message.contains("cannot be updated"));
    }
}
