//! Orchestrator - The uniform CRUD pattern shared by every resource type
//!
//! Each resource type implements [`ResourceHandler`] with the remote calls
//! specific to it. The [`Orchestrator`] wraps those calls with what every
//! operation needs:
//!
//! 1. validate attributes against the resource schema
//! 2. on create, refuse to adopt an object that already exists
//! 3. take the handler's named locks in the order it lists them
//! 4. run the mutating call
//! 5. release the locks
//! 6. re-read the object to fill in computed attributes
//!
//! Every operation runs inside its own timeout budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{info, warn};

use crate::lock::{LockKey, LockManager};
use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;
use crate::timeouts::{Operation, OperationContext, OperationTimeouts};

/// Remote calls for one resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource type name (e.g., "app_service")
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    /// ARM ID the resource will have once created
    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String>;

    /// Locks to hold while mutating, in global acquisition order
    ///
    /// `attributes` are the desired attributes on create/update and the
    /// current attributes on delete.
    fn lock_keys(&self, _attributes: &HashMap<String, Value>) -> ProviderResult<Vec<LockKey>> {
        Ok(Vec::new())
    }

    /// Whether an object is already present at `identifier`
    async fn exists(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<bool> {
        Ok(self.read(ctx, identifier).await?.is_some())
    }

    /// Create the object, returning its ARM ID
    ///
    /// When a later step fails after the object was created, the error
    /// carries the ARM ID (see [`ProviderError::with_identifier`]).
    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String>;

    async fn update(
        &self,
        ctx: &OperationContext,
        identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<()>;

    /// Current attributes, or `None` when the object is gone
    async fn read(
        &self,
        ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Option<HashMap<String, Value>>>;

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()>;
}

/// Runs handler calls under locks and deadlines
pub struct Orchestrator {
    locks: Arc<LockManager>,
    defaults: OperationTimeouts,
    overrides: DashMap<ResourceId, OperationTimeouts>,
}

impl Orchestrator {
    pub fn new(locks: Arc<LockManager>, defaults: OperationTimeouts) -> Self {
        Self {
            locks,
            defaults,
            overrides: DashMap::new(),
        }
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Use `timeouts` instead of the defaults for one resource
    pub fn set_timeouts(&self, id: ResourceId, timeouts: OperationTimeouts) {
        self.overrides.insert(id, timeouts);
    }

    pub fn timeouts_for(&self, id: &ResourceId) -> OperationTimeouts {
        self.overrides
            .get(id)
            .map(|t| *t)
            .unwrap_or(self.defaults)
    }

    fn context(&self, operation: Operation, id: &ResourceId) -> OperationContext {
        let budget = self.timeouts_for(id).for_operation(operation);
        OperationContext::new(operation, id.clone(), budget)
    }

    fn validate(handler: &dyn ResourceHandler, resource: &Resource) -> ProviderResult<()> {
        handler
            .schema()
            .validate_resource(resource)
            .map_err(ProviderError::validation)
    }

    async fn reread(
        &self,
        handler: &dyn ResourceHandler,
        ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<State> {
        let attributes = handler
            .read(ctx, identifier)
            .await
            .map_err(|e| e.with_identifier(identifier))?
            .ok_or_else(|| {
                ProviderError::not_found(format!(
                    "{} could not be read back after {}",
                    identifier, ctx.operation
                ))
                .with_identifier(identifier)
            })?;
        Ok(State::existing(ctx.resource_id.clone(), attributes).with_identifier(identifier))
    }

    /// Create, then read back the new object
    ///
    /// Once the create call has started, errors carry the ARM ID the object
    /// has or may have, so the caller can record it instead of losing it.
    pub async fn create(
        &self,
        handler: &dyn ResourceHandler,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let for_resource = |e: ProviderError| e.for_resource(resource.id.clone());
        let ctx = self.context(Operation::Create, &resource.id);
        Self::validate(handler, resource).map_err(for_resource)?;
        let identifier = handler.identifier_for(resource).map_err(for_resource)?;

        let started = AtomicBool::new(false);
        let created = ctx
            .run(async {
                if handler.exists(&ctx, &identifier).await? {
                    return Err(ProviderError::import_exists(
                        &identifier,
                        handler.resource_type(),
                    ));
                }

                let keys = handler.lock_keys(&resource.attributes)?;
                let _locks = self.locks.acquire_all(&keys).await;
                info!("Creating {} ({})", resource.id, identifier);
                started.store(true, Ordering::SeqCst);
                handler.create(&ctx, resource).await
            })
            .await
            .map_err(|e| {
                // A deadline hit mid-create leaves the object in an unknown state
                if e.is_timeout() && e.identifier.is_none() && started.load(Ordering::SeqCst) {
                    e.with_identifier(&identifier)
                } else {
                    e
                }
            })
            .map_err(for_resource)?;

        let mut state = ctx
            .run(self.reread(handler, &ctx, &created))
            .await
            .map_err(|e| for_resource(e.with_identifier(&created)))?;
        handler
            .schema()
            .carry_write_only(&resource.attributes, &mut state.attributes);
        Ok(state)
    }

    /// Read current state; a missing object yields `State::not_found`
    pub async fn read(
        &self,
        handler: &dyn ResourceHandler,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let ctx = self.context(Operation::Read, id);
        ctx.run(async {
            match handler.read(&ctx, identifier).await? {
                Some(attributes) => {
                    Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
                }
                None => {
                    warn!("{} ({}) no longer exists, dropping it from state", id, identifier);
                    Ok(State::not_found(id.clone()))
                }
            }
        })
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn update(
        &self,
        handler: &dyn ResourceHandler,
        identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let ctx = self.context(Operation::Update, &resource.id);
        ctx.run(async {
            Self::validate(handler, resource)?;

            let keys = handler.lock_keys(&resource.attributes)?;
            {
                let _locks = self.locks.acquire_all(&keys).await;
                info!("Updating {} ({})", resource.id, identifier);
                handler.update(&ctx, identifier, resource).await?;
            }

            let mut state = self.reread(handler, &ctx, identifier).await?;
            handler
                .schema()
                .carry_write_only(&resource.attributes, &mut state.attributes);
            Ok(state)
        })
        .await
        .map_err(|e| e.for_resource(resource.id.clone()))
    }

    /// Delete; an object that is already gone counts as deleted
    pub async fn delete(
        &self,
        handler: &dyn ResourceHandler,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<()> {
        let ctx = self.context(Operation::Delete, id);
        ctx.run(async {
            let Some(current) = handler.read(&ctx, identifier).await? else {
                info!("{} ({}) is already gone", id, identifier);
                return Ok(());
            };

            let keys = handler.lock_keys(&current)?;
            let _locks = self.locks.acquire_all(&keys).await;
            info!("Deleting {} ({})", id, identifier);
            handler.delete(&ctx, identifier).await
        })
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorKind;
    use crate::schema::{AttributeSchema, AttributeType};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Handler over an in-memory map of ARM ID -> attributes
    #[derive(Default)]
    struct MemoryHandler {
        objects: Mutex<HashMap<String, HashMap<String, Value>>>,
        fail_second_step: bool,
        mutation_delay: Duration,
        /// Delay for reads of objects that exist
        read_delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MemoryHandler {
        fn arm_id(name: &str) -> String {
            format!(
                "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Web/sites/{}",
                name
            )
        }

        async fn mutate(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.mutation_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ResourceHandler for MemoryHandler {
        fn resource_type(&self) -> &'static str {
            "app_service"
        }

        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new("app_service")
                .attribute(AttributeSchema::new("name", AttributeType::String).required())
                .attribute(AttributeSchema::new("vnet", AttributeType::String))
                .attribute(AttributeSchema::new("https_only", AttributeType::Bool))
        }

        fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
            resource
                .get_str("name")
                .map(Self::arm_id)
                .ok_or_else(|| ProviderError::validation("name is required"))
        }

        fn lock_keys(&self, attributes: &HashMap<String, Value>) -> ProviderResult<Vec<LockKey>> {
            Ok(attributes
                .get("vnet")
                .and_then(Value::as_str)
                .map(|vnet| vec![LockKey::new(vnet, "azurerm_virtual_network")])
                .unwrap_or_default())
        }

        async fn create(
            &self,
            _ctx: &OperationContext,
            resource: &Resource,
        ) -> ProviderResult<String> {
            let id = self.identifier_for(resource)?;
            self.mutate().await;
            self.objects
                .lock()
                .unwrap()
                .insert(id.clone(), resource.attributes.clone());
            if self.fail_second_step {
                return Err(
                    ProviderError::new("updating app settings failed").with_identifier(id)
                );
            }
            Ok(id)
        }

        async fn update(
            &self,
            _ctx: &OperationContext,
            identifier: &str,
            resource: &Resource,
        ) -> ProviderResult<()> {
            self.mutate().await;
            self.objects
                .lock()
                .unwrap()
                .insert(identifier.to_string(), resource.attributes.clone());
            Ok(())
        }

        async fn read(
            &self,
            _ctx: &OperationContext,
            identifier: &str,
        ) -> ProviderResult<Option<HashMap<String, Value>>> {
            let found = self.objects.lock().unwrap().get(identifier).cloned();
            if found.is_some() {
                tokio::time::sleep(self.read_delay).await;
            }
            Ok(found)
        }

        async fn delete(&self, _ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
            self.mutate().await;
            self.objects.lock().unwrap().remove(identifier);
            Ok(())
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(LockManager::new()), OperationTimeouts::default())
    }

    fn site(name: &str) -> Resource {
        Resource::new("app_service", name).with_attribute("name", name)
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();

        let state = orchestrator.create(&handler, &site("web")).await.unwrap();

        assert!(state.exists);
        assert_eq!(state.identifier, Some(MemoryHandler::arm_id("web")));
        assert_eq!(state.attributes.get("name"), Some(&Value::String("web".into())));
    }

    #[tokio::test]
    async fn second_create_reports_import_exists() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();

        orchestrator.create(&handler, &site("web")).await.unwrap();
        let err = orchestrator.create(&handler, &site("web")).await.unwrap_err();

        assert!(err.is_import_exists());
        assert_eq!(err.resource_id, Some(ResourceId::new("app_service", "web")));
        assert_eq!(handler.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_attributes_fail_before_any_call() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();
        let resource = site("web").with_attribute("https_only", "yes");

        let err = orchestrator.create(&handler, &resource).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(handler.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_create_keeps_identifier() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler {
            fail_second_step: true,
            ..Default::default()
        };

        let err = orchestrator.create(&handler, &site("web")).await.unwrap_err();

        assert_eq!(err.identifier, Some(MemoryHandler::arm_id("web")));
    }

    #[tokio::test]
    async fn read_missing_object_is_not_found_state() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();
        let id = ResourceId::new("app_service", "web");

        let state = orchestrator
            .read(&handler, &id, &MemoryHandler::arm_id("web"))
            .await
            .unwrap();

        assert!(!state.exists);
        assert!(state.identifier.is_none());
    }

    #[tokio::test]
    async fn delete_of_missing_object_succeeds() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();
        let id = ResourceId::new("app_service", "web");

        orchestrator
            .delete(&handler, &id, &MemoryHandler::arm_id("web"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_rereads_new_attributes() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();
        let state = orchestrator.create(&handler, &site("web")).await.unwrap();
        let identifier = state.identifier.unwrap();

        let updated = orchestrator
            .update(&handler, &identifier, &site("web").with_attribute("https_only", true))
            .await
            .unwrap();

        assert_eq!(updated.attributes.get("https_only"), Some(&Value::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_lock_key_serializes_mutations() {
        let orchestrator = Arc::new(orchestrator());
        let handler = Arc::new(MemoryHandler {
            mutation_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let started = Instant::now();

        let mut handles = Vec::new();
        for name in ["web-a", "web-b"] {
            let orchestrator = orchestrator.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                let resource = site(name).with_attribute("vnet", "vnet-A");
                orchestrator.create(handler.as_ref(), &resource).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(!orchestrator
            .locks()
            .is_locked(&LockKey::new("vnet-A", "azurerm_virtual_network")));
    }

    #[tokio::test(start_paused = true)]
    async fn per_resource_timeout_bounds_create() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler {
            mutation_delay: Duration::from_secs(120),
            ..Default::default()
        };
        let id = ResourceId::new("app_service", "web");
        orchestrator.set_timeouts(
            id,
            OperationTimeouts {
                create: Duration::from_secs(60),
                ..Default::default()
            },
        );

        let err = orchestrator.create(&handler, &site("web")).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.identifier, Some(MemoryHandler::arm_id("web")));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_during_read_back_keeps_identifier() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler {
            read_delay: Duration::from_secs(3600),
            ..Default::default()
        };

        let err = orchestrator.create(&handler, &site("web")).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.identifier, Some(MemoryHandler::arm_id("web")));
        assert_eq!(err.resource_id, Some(ResourceId::new("app_service", "web")));
        assert_eq!(handler.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_before_create_has_no_identifier() {
        let orchestrator = orchestrator();
        let handler = MemoryHandler::default();
        let resource = site("web").with_attribute("vnet", "vnet-A");
        let id = ResourceId::new("app_service", "web");
        orchestrator.set_timeouts(
            id,
            OperationTimeouts {
                create: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let _held = orchestrator
            .locks()
            .acquire(LockKey::new("vnet-A", "azurerm_virtual_network"))
            .await;

        let err = orchestrator.create(&handler, &resource).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(err.identifier.is_none());
        assert!(handler.objects.lock().unwrap().is_empty());
    }
}
