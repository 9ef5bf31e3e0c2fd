//! AzureRM Provider implementation
//!
//! Routes each resource type to its handler and runs every call through the
//! shared [`Orchestrator`], so all handlers draw locks from one registry.

use std::collections::HashMap;
use std::sync::Arc;

use azweb_core::lock::LockManager;
use azweb_core::orchestrator::{Orchestrator, ResourceHandler};
use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::resource::{Resource, ResourceId, State};
use azweb_core::timeouts::OperationTimeouts;
use log::debug;

use crate::client::ArmClient;
use crate::config::ProviderConfig;
use crate::http::HttpArmClient;
use crate::resources::handlers;

/// AzureRM Provider for Microsoft.Web resources
pub struct AzureRmProvider {
    orchestrator: Orchestrator,
    handlers: HashMap<&'static str, Arc<dyn ResourceHandler>>,
}

impl AzureRmProvider {
    pub fn new(client: Arc<dyn ArmClient>, config: &ProviderConfig, locks: Arc<LockManager>) -> Self {
        let handlers = handlers(client, config)
            .into_iter()
            .map(|h| (h.resource_type(), h))
            .collect();
        Self {
            orchestrator: Orchestrator::new(locks, OperationTimeouts::default()),
            handlers,
        }
    }

    /// Provider talking to ARM over HTTPS
    pub fn from_config(config: &ProviderConfig) -> ProviderResult<Self> {
        config
            .validate()
            .map_err(|e| ProviderError::validation(e.to_string()))?;
        debug!(
            "Using ARM endpoint {} for subscription {}",
            config.endpoint, config.subscription_id
        );
        let client = HttpArmClient::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            config,
            Arc::new(LockManager::new()),
        ))
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        self.orchestrator.locks()
    }

    /// Per-resource timeouts from the manifest
    pub fn set_timeouts(&self, id: ResourceId, timeouts: OperationTimeouts) {
        self.orchestrator.set_timeouts(id, timeouts);
    }

    fn handler(&self, resource_type: &str) -> ProviderResult<&dyn ResourceHandler> {
        self.handlers
            .get(resource_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::unsupported(format!("Unknown resource type: {}", resource_type))
            })
    }

    /// ARM ID a resource has, or will have once created
    pub fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        self.handler(&resource.id.resource_type)?
            .identifier_for(resource)
            .map_err(|e| e.for_resource(resource.id.clone()))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn read_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let handler = self
            .handler(&id.resource_type)
            .map_err(|e| e.for_resource(id.clone()))?;
        self.orchestrator.read(handler, id, identifier).await
    }

    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let handler = self
            .handler(&resource.id.resource_type)
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        self.orchestrator.create(handler, resource).await
    }

    pub async fn update_resource(
        &self,
        identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let handler = self
            .handler(&resource.id.resource_type)
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        self.orchestrator.update(handler, identifier, resource).await
    }

    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let handler = self
            .handler(&id.resource_type)
            .map_err(|e| e.for_resource(id.clone()))?;
        self.orchestrator.delete(handler, id, identifier).await
    }
}
