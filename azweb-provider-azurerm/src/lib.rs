//! azweb AzureRM Provider
//!
//! Manages Microsoft.Web resources through Azure Resource Manager.
//!
//! ## Module Structure
//!
//! - `client` - ARM client trait and error mapping
//! - `http` - HTTPS client with long-running operation polling
//! - `config` - Subscription, endpoint and credential settings
//! - `id` - ARM resource ID parsing
//! - `resources` - Resource type definitions and their handlers
//! - `provider` - AzureRmProvider implementation

pub mod client;
pub mod config;
pub mod http;
pub mod id;
pub mod provider;
pub mod resources;

#[cfg(test)]
mod fake;

// Re-export main types
pub use client::{ArmClient, NETWORK_API_VERSION, WEB_API_VERSION};
pub use config::{ConfigError, ProviderConfig};
pub use http::HttpArmClient;
pub use id::ArmResourceId;
pub use provider::AzureRmProvider;

use azweb_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult, ResourceType};
use azweb_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AzureRmProvider {
    fn name(&self) -> &'static str {
        "azurerm"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.read_resource(&id, &identifier).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = from
            .identifier
            .clone()
            .unwrap_or_else(|| identifier.to_string());
        let to = to.clone();
        Box::pin(async move {
            if identifier.is_empty() {
                return Err(ProviderError::validation("update needs an ARM resource ID")
                    .for_resource(id));
            }
            self.update_resource(&identifier, &to).await
        })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }
}
