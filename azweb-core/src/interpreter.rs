//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes the Effects contained in a Plan level by level.
//! Effects within one level have no ordering between them and run
//! concurrently; shared remote parents are protected by the provider's named
//! locks, not by the interpreter.

use std::collections::HashSet;

use futures::future::join_all;
use log::{debug, error};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{ResourceId, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    Created { state: State },
    Updated { state: State },
    Replaced { state: State },
    Deleted,
    /// Not executed (dry-run, or a dependency failed)
    Skipped { reason: String },
}

/// Result for one effect of the plan
#[derive(Debug)]
pub struct EffectResult {
    pub id: ResourceId,
    pub verb: &'static str,
    pub result: Result<EffectOutcome, ProviderError>,
}

impl EffectResult {
    pub fn is_skipped(&self) -> bool {
        matches!(self.result, Ok(EffectOutcome::Skipped { .. }))
    }
}

/// Result of executing the entire Plan
#[derive(Debug, Default)]
pub struct ApplyResult {
    pub results: Vec<EffectResult>,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }

    fn record(&mut self, result: EffectResult) {
        match &result.result {
            Ok(EffectOutcome::Skipped { .. }) => self.skipped_count += 1,
            Ok(_) => self.success_count += 1,
            Err(_) => self.failure_count += 1,
        }
        self.results.push(result);
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Keep going with later levels after a failure
    pub continue_on_error: bool,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a Plan, interpreting all Effects and causing side effects
    pub async fn apply(&self, plan: &Plan) -> ProviderResult<ApplyResult> {
        let levels = plan.levels().map_err(ProviderError::validation)?;
        let mut result = ApplyResult::default();
        let mut failed: HashSet<ResourceId> = HashSet::new();
        let mut halted = false;

        for (index, level) in levels.into_iter().enumerate() {
            let mut runnable = Vec::new();
            for effect in level {
                let blocked_by = plan
                    .dependencies_of(effect)
                    .into_iter()
                    .find(|dep| failed.contains(dep));
                let reason = if halted {
                    Some("an earlier effect failed".to_string())
                } else {
                    blocked_by.map(|dep| format!("dependency {} failed", dep))
                };

                match reason {
                    Some(reason) => {
                        failed.insert(effect.resource_id().clone());
                        result.record(EffectResult {
                            id: effect.resource_id().clone(),
                            verb: effect.verb(),
                            result: Ok(EffectOutcome::Skipped { reason }),
                        });
                    }
                    None => runnable.push(effect),
                }
            }

            debug!("Applying level {} with {} effects", index, runnable.len());
            let outcomes = join_all(runnable.iter().map(|e| self.execute_effect(e))).await;

            for (effect, outcome) in runnable.into_iter().zip(outcomes) {
                if let Err(e) = &outcome {
                    error!("Failed to {} {}: {}", effect.verb(), effect.resource_id(), e);
                    failed.insert(effect.resource_id().clone());
                    if !self.config.continue_on_error {
                        halted = true;
                    }
                }
                result.record(EffectResult {
                    id: effect.resource_id().clone(),
                    verb: effect.verb(),
                    result: outcome,
                });
            }
        }

        Ok(result)
    }

    /// Execute a single Effect
    async fn execute_effect(&self, effect: &Effect) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        match effect {
            Effect::Create(resource) => {
                let state = self.provider.create(resource).await?;
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to } => {
                let identifier = require_identifier(id, from)?;
                let state = self.provider.update(id, identifier, from, to).await?;
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { id, from, to } => {
                let identifier = require_identifier(id, from)?;
                self.provider.delete(id, identifier).await?;
                let state = self.provider.create(to).await?;
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete { id, identifier } => {
                self.provider.delete(id, identifier).await?;
                Ok(EffectOutcome::Deleted)
            }
        }
    }
}

fn require_identifier<'a>(id: &ResourceId, state: &'a State) -> ProviderResult<&'a str> {
    state.identifier.as_deref().ok_or_else(|| {
        ProviderError::validation("current state has no identifier").for_resource(id.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BoxFuture, ResourceType};
    use crate::resource::Resource;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct TestProvider {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
        delay: Duration,
    }

    impl TestProvider {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn call(&self, what: String, name: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(what);
            tokio::time::sleep(self.delay).await;
            if self.fail_on.as_deref() == Some(name) {
                return Err(ProviderError::new("remote call failed"));
            }
            Ok(())
        }
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str {
            "test"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![]
        }

        fn read(&self, id: &ResourceId, _identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let resource = resource.clone();
            Box::pin(async move {
                self.call(format!("create {}", resource.id.name), &resource.id.name)
                    .await?;
                Ok(State::existing(resource.id.clone(), resource.attributes.clone())
                    .with_identifier(format!("id-{}", resource.id.name)))
            })
        }

        fn update(
            &self,
            id: &ResourceId,
            _identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            let attrs = to.attributes.clone();
            Box::pin(async move {
                self.call(format!("update {}", id.name), &id.name).await?;
                Ok(State::existing(id, attrs))
            })
        }

        fn delete(&self, id: &ResourceId, _identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
            let id = id.clone();
            Box::pin(async move { self.call(format!("delete {}", id.name), &id.name).await })
        }
    }

    #[tokio::test]
    async fn apply_empty_plan() {
        let interpreter = Interpreter::new(TestProvider::default());
        let result = interpreter.apply(&Plan::new()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.success_count, 0);
    }

    #[tokio::test]
    async fn cyclic_plan_is_rejected_before_any_call() {
        let provider = std::sync::Arc::new(TestProvider::default());
        let a = Resource::new("test", "a").with_dependency(ResourceId::new("test", "b"));
        let b = Resource::new("test", "b").with_dependency(ResourceId::new("test", "a"));
        let mut plan = Plan::new();
        plan.add(Effect::Create(a));
        plan.add(Effect::Create(b));

        let err = Interpreter::new(provider.clone())
            .apply(&plan)
            .await
            .unwrap_err();

        assert_eq!(err.kind, crate::provider::ErrorKind::Validation);
        assert!(err.message.contains("cycle"));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn apply_create_effect() {
        let interpreter = Interpreter::new(TestProvider::default());
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "example")));

        let result = interpreter.apply(&plan).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.success_count, 1);
    }

    #[tokio::test]
    async fn replace_deletes_before_creating() {
        let provider = TestProvider::default();
        let interpreter = Interpreter::new(provider);
        let id = ResourceId::new("test", "cert");
        let mut plan = Plan::new();
        plan.add(Effect::Replace {
            id: id.clone(),
            from: State::existing(id.clone(), Default::default()).with_identifier("old"),
            to: Resource::new("test", "cert"),
        });

        let result = interpreter.apply(&plan).await.unwrap();

        assert!(result.is_success());
        assert_eq!(
            interpreter.provider.calls(),
            vec!["delete cert".to_string(), "create cert".to_string()]
        );
    }

    #[tokio::test]
    async fn update_without_identifier_fails() {
        let interpreter = Interpreter::new(TestProvider::default());
        let id = ResourceId::new("test", "web");
        let mut plan = Plan::new();
        plan.add(Effect::Update {
            id: id.clone(),
            from: State::existing(id, Default::default()),
            to: Resource::new("test", "web"),
        });

        let result = interpreter.apply(&plan).await.unwrap();

        assert_eq!(result.failure_count, 1);
        assert!(interpreter.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents() {
        let interpreter = Interpreter::new(TestProvider {
            fail_on: Some("web".to_string()),
            ..Default::default()
        })
        .with_config(InterpreterConfig {
            continue_on_error: true,
            ..Default::default()
        });
        let site = Resource::new("app_service", "web");
        let binding =
            Resource::new("app_service_custom_hostname_binding", "www").with_dependency(site.id.clone());
        let mut plan = Plan::new();
        plan.add(Effect::Create(site));
        plan.add(Effect::Create(binding));

        let result = interpreter.apply(&plan).await.unwrap();

        assert_eq!(result.failure_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert!(result.results[1].is_skipped());
    }

    #[tokio::test]
    async fn failure_halts_later_levels() {
        let interpreter = Interpreter::new(TestProvider {
            fail_on: Some("a".to_string()),
            ..Default::default()
        });
        let a = Resource::new("test", "a");
        let b = Resource::new("test", "b");
        let c = Resource::new("test", "c").with_dependency(b.id.clone());
        let mut plan = Plan::new();
        plan.add(Effect::Create(a));
        plan.add(Effect::Create(b));
        plan.add(Effect::Create(c));

        let result = interpreter.apply(&plan).await.unwrap();

        assert_eq!(result.failure_count, 1);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.skipped_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_effects_run_concurrently() {
        let interpreter = Interpreter::new(TestProvider {
            delay: Duration::from_secs(1),
            ..Default::default()
        });
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "a")));
        plan.add(Effect::Create(Resource::new("test", "b")));
        let started = Instant::now();

        let result = interpreter.apply(&plan).await.unwrap();

        assert_eq!(result.success_count, 2);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn dry_run_skips_everything() {
        let interpreter = Interpreter::new(TestProvider::default()).with_config(InterpreterConfig {
            dry_run: true,
            ..Default::default()
        });
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "a")));

        let result = interpreter.apply(&plan).await.unwrap();

        assert_eq!(result.skipped_count, 1);
        assert!(interpreter.provider.calls().is_empty());
    }
}
