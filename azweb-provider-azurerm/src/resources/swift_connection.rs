//! `app_service_virtual_network_swift_connection` - regional VNet integration
//! of a site (`Microsoft.Web/sites/{app}/config/virtualNetwork`)
//!
//! Connecting a site updates the target virtual network and subnet. Both are
//! locked for the duration of the mutation, and their provisioning states are
//! awaited before the locks are released so the next writer sees them settled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azweb_core::lock::LockKey;
use azweb_core::orchestrator::ResourceHandler;
use azweb_core::poll::{PollState, StateChangeConf};
use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::{AttributeSchema, ResourceSchema};
use azweb_core::timeouts::OperationContext;
use log::debug;
use serde_json::{Value as Json, json};

use super::{SUBNET_LOCK, VIRTUAL_NETWORK_LOCK, arm_id_type, required_str};
use crate::client::{ArmClient, NETWORK_API_VERSION, WEB_API_VERSION, provisioning_state};
use crate::id::ArmResourceId;

pub const RESOURCE_TYPE: &str = "app_service_virtual_network_swift_connection";

const NETWORK_PENDING: &[&str] = &["Updating"];
const NETWORK_SUCCEEDED: &[&str] = &["Succeeded"];
const NETWORK_FAILED: &[&str] = &["Failed"];

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .attribute(
            AttributeSchema::new("app_service_id", arm_id_type())
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("subnet_id", arm_id_type()).required())
        .with_description("Connects an App Service to a subnet")
}

/// Typed connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwiftConnectionSettings {
    pub app_service: ArmResourceId,
    pub subnet: ArmResourceId,
}

impl SwiftConnectionSettings {
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        let app_service = required_str(attributes, "app_service_id")?;
        let subnet = required_str(attributes, "subnet_id")?;
        Ok(Self {
            app_service: ArmResourceId::parse_as(&app_service, "Microsoft.Web", &["sites"])?,
            subnet: parse_subnet_id(&subnet)?,
        })
    }

    pub fn virtual_network(&self) -> ProviderResult<ArmResourceId> {
        self.subnet.parent().ok_or_else(|| {
            ProviderError::validation(format!("{} has no virtual network", self.subnet))
        })
    }

    /// `{app}/config/virtualNetwork`
    pub fn connection_id(&self) -> ArmResourceId {
        self.app_service.child("config", "virtualNetwork")
    }

    pub fn body(&self) -> Json {
        json!({
            "properties": {
                "subnetResourceId": self.subnet.to_string(),
                "swiftSupported": true,
            }
        })
    }
}

fn parse_subnet_id(identifier: &str) -> ProviderResult<ArmResourceId> {
    Ok(ArmResourceId::parse_as(
        identifier,
        "Microsoft.Network",
        &["virtualNetworks", "subnets"],
    )?)
}

fn parse_connection_id(identifier: &str) -> ProviderResult<ArmResourceId> {
    Ok(ArmResourceId::parse_as(
        identifier,
        "Microsoft.Web",
        &["sites", "config"],
    )?)
}

/// The site that owns a connection ID
fn app_service_of(identifier: &str) -> ProviderResult<ArmResourceId> {
    parse_connection_id(identifier)?.parent().ok_or_else(|| {
        ProviderError::validation(format!("{} is not nested under a site", identifier))
    })
}

pub struct SwiftConnectionHandler {
    client: Arc<dyn ArmClient>,
    poll_interval: Duration,
}

impl SwiftConnectionHandler {
    pub fn new(client: Arc<dyn ArmClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Wait for a network resource to leave `Updating`
    async fn wait_for_network(
        &self,
        ctx: &OperationContext,
        id: &ArmResourceId,
    ) -> ProviderResult<()> {
        let path = id.to_string();
        let conf = StateChangeConf::new(NETWORK_PENDING, NETWORK_SUCCEEDED, ctx.deadline)
            .with_failure(NETWORK_FAILED)
            .with_min_poll_interval(self.poll_interval)
            .with_subject(path.clone());

        conf.wait_for_state(|| {
            let path = path.clone();
            async move {
                let body = self
                    .client
                    .get(&path, NETWORK_API_VERSION)
                    .await?
                    .ok_or_else(|| ProviderError::not_found(format!("{} was not found", path)))?;
                let status = provisioning_state(&body)
                    .ok_or_else(|| {
                        ProviderError::new(format!("{} reported no provisioning state", path))
                    })?
                    .to_string();
                Ok::<_, ProviderError>(PollState::new((), status))
            }
        })
        .await
    }

    async fn connect(
        &self,
        ctx: &OperationContext,
        settings: &SwiftConnectionSettings,
    ) -> ProviderResult<String> {
        let id = settings.connection_id().to_string();
        self.client
            .put(ctx, &id, WEB_API_VERSION, &settings.body())
            .await?;

        let wait = async {
            self.wait_for_network(ctx, &settings.virtual_network()?)
                .await?;
            self.wait_for_network(ctx, &settings.subnet).await
        };
        wait.await.map_err(|e| e.with_identifier(id.clone()))?;
        Ok(id)
    }
}

#[async_trait]
impl ResourceHandler for SwiftConnectionHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        let settings = SwiftConnectionSettings::from_attributes(&resource.attributes)?;
        Ok(settings.connection_id().to_string())
    }

    fn lock_keys(&self, attributes: &HashMap<String, Value>) -> ProviderResult<Vec<LockKey>> {
        let subnet = parse_subnet_id(&required_str(attributes, "subnet_id")?)?;
        let vnet = subnet.segment("virtualNetworks").unwrap_or_default();
        Ok(vec![
            LockKey::new(vnet, VIRTUAL_NETWORK_LOCK),
            LockKey::new(subnet.name(), SUBNET_LOCK),
        ])
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String> {
        let settings = SwiftConnectionSettings::from_attributes(&resource.attributes)?;
        self.connect(ctx, &settings).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        _identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<()> {
        let settings = SwiftConnectionSettings::from_attributes(&resource.attributes)?;
        self.connect(ctx, &settings).await.map(|_| ())
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let app_service = app_service_of(identifier)?.to_string();
        if self.client.get(&app_service, WEB_API_VERSION).await?.is_none() {
            debug!("{} is gone, so is its VNet connection", app_service);
            return Ok(None);
        }

        let Some(body) = self.client.get(identifier, WEB_API_VERSION).await? else {
            return Ok(None);
        };
        let subnet = body
            .pointer("/properties/subnetResourceId")
            .and_then(Json::as_str)
            .unwrap_or_default();
        if subnet.is_empty() {
            return Ok(None);
        }

        let mut attributes = HashMap::new();
        attributes.insert("app_service_id".to_string(), Value::String(app_service));
        attributes.insert("subnet_id".to_string(), Value::from(subnet));
        Ok(Some(attributes))
    }

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
        let app_service = app_service_of(identifier)?;
        let path = app_service.child("networkConfig", "virtualNetwork").to_string();
        self.client.delete(ctx, &path, WEB_API_VERSION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeArmClient;
    use azweb_core::lock::LockManager;
    use azweb_core::orchestrator::Orchestrator;
    use azweb_core::provider::ErrorKind;
    use azweb_core::timeouts::OperationTimeouts;

    const SITE: &str = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites/web";
    const VNET: &str =
        "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet";
    const SUBNET: &str = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/apps";

    fn connection() -> String {
        format!("{}/config/virtualNetwork", SITE)
    }

    fn resource() -> Resource {
        Resource::new(RESOURCE_TYPE, "web")
            .with_attribute("app_service_id", SITE)
            .with_attribute("subnet_id", SUBNET)
    }

    type Setup = (Arc<FakeArmClient>, SwiftConnectionHandler, Orchestrator, Arc<LockManager>);

    fn setup() -> Setup {
        let fake = Arc::new(FakeArmClient::new());
        fake.insert(SITE, json!({"location": "westeurope"}));
        fake.insert(VNET, json!({"properties": {"provisioningState": "Succeeded"}}));
        fake.insert(SUBNET, json!({"properties": {"provisioningState": "Succeeded"}}));
        let handler = SwiftConnectionHandler::new(fake.clone(), Duration::from_secs(5));
        let locks = Arc::new(LockManager::new());
        let orchestrator = Orchestrator::new(locks.clone(), OperationTimeouts::default());
        (fake, handler, orchestrator, locks)
    }

    #[test]
    fn locks_network_then_subnet() {
        let (_fake, handler, _orchestrator, _locks) = setup();
        let keys = handler.lock_keys(&resource().attributes).unwrap();
        assert_eq!(
            keys,
            vec![
                LockKey::new("vnet", VIRTUAL_NETWORK_LOCK),
                LockKey::new("apps", SUBNET_LOCK)
            ]
        );
    }

    #[test]
    fn subnet_must_be_a_subnet() {
        let resource = resource().with_attribute("subnet_id", VNET);
        assert!(SwiftConnectionSettings::from_attributes(&resource.attributes).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_for_network_then_subnet() {
        let (fake, handler, orchestrator, locks) = setup();
        fake.provisioning_states(VNET, &["Updating", "Succeeded"]);
        fake.provisioning_states(SUBNET, &["Updating", "Updating", "Succeeded"]);

        let state = orchestrator.create(&handler, &resource()).await.unwrap();

        assert_eq!(state.identifier, Some(connection()));
        assert_eq!(state.attributes.get("subnet_id"), Some(&Value::from(SUBNET)));
        assert_eq!(fake.object(&connection()).unwrap()["properties"]["swiftSupported"], true);
        let vnet_get = format!("GET {}", VNET);
        let subnet_get = format!("GET {}", SUBNET);
        assert_eq!(fake.count_exact(&vnet_get), 2);
        assert_eq!(fake.count_exact(&subnet_get), 3);
        let calls = fake.calls();
        let last_vnet = calls.iter().rposition(|c| *c == vnet_get).unwrap();
        let first_subnet = calls.iter().position(|c| *c == subnet_get).unwrap();
        assert!(last_vnet < first_subnet, "subnet polled before network settled: {:?}", calls);
        assert!(!locks.is_locked(&LockKey::new("vnet", VIRTUAL_NETWORK_LOCK)));
        assert!(!locks.is_locked(&LockKey::new("apps", SUBNET_LOCK)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_network_keeps_the_connection_id() {
        let (fake, handler, orchestrator, _locks) = setup();
        fake.provisioning_states(VNET, &["Failed"]);

        let err = orchestrator.create(&handler, &resource()).await.unwrap_err();

        assert!(matches!(err.kind, ErrorKind::Failed { .. }));
        assert_eq!(err.identifier, Some(connection()));
    }

    #[tokio::test(start_paused = true)]
    async fn network_stuck_updating_times_out() {
        let (fake, handler, _orchestrator, _locks) = setup();
        fake.provisioning_states(SUBNET, &["Updating"]);
        let orchestrator = Orchestrator::new(
            Arc::new(LockManager::new()),
            OperationTimeouts {
                create: Duration::from_secs(60),
                ..OperationTimeouts::default()
            },
        );

        let err = orchestrator.create(&handler, &resource()).await.unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn connections_sharing_a_subnet_do_not_overlap() {
        let (fake, handler, orchestrator, locks) = setup();
        fake.delay_puts(Duration::from_secs(2));
        let other_site =
            "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites/api";
        fake.insert(other_site, json!({"location": "westeurope"}));
        let other = Resource::new(RESOURCE_TYPE, "api")
            .with_attribute("app_service_id", other_site)
            .with_attribute("subnet_id", SUBNET);

        let first = resource();
        let (a, b) = tokio::join!(
            orchestrator.create(&handler, &first),
            orchestrator.create(&handler, &other)
        );

        a.unwrap();
        b.unwrap();
        assert_eq!(fake.count("PUT "), 2);
        assert_eq!(fake.max_puts_in_flight(), 1);
        assert!(!locks.is_locked(&LockKey::new("vnet", VIRTUAL_NETWORK_LOCK)));
        assert!(!locks.is_locked(&LockKey::new("apps", SUBNET_LOCK)));
    }

    #[tokio::test]
    async fn read_without_site_is_gone() {
        let (fake, handler, orchestrator, _locks) = setup();
        orchestrator.create(&handler, &resource()).await.unwrap();
        fake.remove(SITE);

        let state = orchestrator
            .read(&handler, &resource().id, &connection())
            .await
            .unwrap();

        assert!(!state.exists);
    }

    #[tokio::test]
    async fn read_with_empty_subnet_is_gone() {
        let (fake, handler, orchestrator, _locks) = setup();
        fake.insert(&connection(), json!({"properties": {"subnetResourceId": ""}}));

        let state = orchestrator
            .read(&handler, &resource().id, &connection())
            .await
            .unwrap();

        assert!(!state.exists);
    }

    #[tokio::test]
    async fn delete_uses_network_config_path() {
        let (fake, handler, orchestrator, _locks) = setup();
        orchestrator.create(&handler, &resource()).await.unwrap();

        orchestrator
            .delete(&handler, &resource().id, &connection())
            .await
            .unwrap();

        assert_eq!(fake.count(&format!("DELETE {}/networkConfig/virtualNetwork", SITE)), 1);
        assert!(fake.object(&connection()).is_none());
    }

    #[tokio::test]
    async fn create_refuses_existing_connection() {
        let (fake, handler, orchestrator, _locks) = setup();
        fake.insert(&connection(), json!({"properties": {"subnetResourceId": SUBNET}}));

        let err = orchestrator.create(&handler, &resource()).await.unwrap_err();

        assert!(err.is_import_exists());
    }
}
