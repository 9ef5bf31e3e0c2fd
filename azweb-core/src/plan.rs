//! Plan - Collection of Effects
//!
//! A Plan is a list of Effects plus the ordering constraints between them.
//! No side effects occur until the Plan is applied.

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::resource::ResourceId;

/// Plan containing Effects to be executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    effects: Vec<Effect>,
    /// Extra ordering edges: key runs after every listed id
    after: HashMap<ResourceId, Vec<ResourceId>>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Require `id` to run only after `dependency` finished
    pub fn add_ordering(&mut self, id: ResourceId, dependency: ResourceId) {
        self.after.entry(id).or_default().push(dependency);
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Declared dependencies plus extra ordering edges of `effect`
    pub fn dependencies_of(&self, effect: &Effect) -> Vec<ResourceId> {
        let mut deps: Vec<ResourceId> = effect.depends_on().to_vec();
        if let Some(extra) = self.after.get(effect.resource_id()) {
            deps.extend(extra.iter().cloned());
        }
        deps
    }

    /// Group effects into levels; every effect only depends on earlier levels
    ///
    /// Dependencies on resources without an effect in this plan are already
    /// satisfied and ignored.
    pub fn levels(&self) -> Result<Vec<Vec<&Effect>>, String> {
        let planned: HashSet<&ResourceId> =
            self.effects.iter().map(|e| e.resource_id()).collect();
        let mut done: HashSet<ResourceId> = HashSet::new();
        let mut remaining: Vec<&Effect> = self.effects.iter().collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Effect>, Vec<&Effect>) =
                remaining.into_iter().partition(|effect| {
                    self.dependencies_of(effect)
                        .iter()
                        .all(|dep| !planned.contains(dep) || done.contains(dep))
                });

            if ready.is_empty() {
                let mut names: Vec<String> =
                    blocked.iter().map(|e| e.resource_id().to_string()).collect();
                names.sort();
                return Err(format!("Dependency cycle between: {}", names.join(", ")));
            }

            done.extend(ready.iter().map(|e| e.resource_id().clone()));
            levels.push(ready);
            remaining = blocked;
        }

        Ok(levels)
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for effect in &self.effects {
            match effect {
                Effect::Create(_) => summary.create += 1,
                Effect::Update { .. } => summary.update += 1,
                Effect::Replace { .. } => summary.replace += 1,
                Effect::Delete { .. } => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[test]
    fn summary_counts_effects() {
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("app_service", "web")));
        plan.add(Effect::Delete {
            id: ResourceId::new("app_service", "old"),
            identifier: "/subscriptions/x".to_string(),
        });

        let summary = plan.summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.delete, 1);
        assert_eq!(
            summary.to_string(),
            "Plan: 1 to create, 0 to update, 0 to replace, 1 to delete"
        );
    }

    #[test]
    fn levels_follow_dependencies() {
        let site = Resource::new("app_service", "web");
        let binding = Resource::new("app_service_custom_hostname_binding", "www")
            .with_dependency(site.id.clone());
        let cert = Resource::new("app_service_certificate", "cert");

        let mut plan = Plan::new();
        plan.add(Effect::Create(binding.clone()));
        plan.add(Effect::Create(site.clone()));
        plan.add(Effect::Create(cert.clone()));

        let levels = plan.levels().unwrap();
        assert_eq!(levels.len(), 2);
        let first: Vec<&ResourceId> = levels[0].iter().map(|e| e.resource_id()).collect();
        assert_eq!(first, vec![&site.id, &cert.id]);
        assert_eq!(levels[1][0].resource_id(), &binding.id);
    }

    #[test]
    fn dependency_outside_plan_is_satisfied() {
        let binding = Resource::new("app_service_custom_hostname_binding", "www")
            .with_dependency(ResourceId::new("app_service", "unchanged"));
        let mut plan = Plan::new();
        plan.add(Effect::Create(binding));

        assert_eq!(plan.levels().unwrap().len(), 1);
    }

    #[test]
    fn ordering_edges_apply_to_deletes() {
        let site = ResourceId::new("app_service", "web");
        let binding = ResourceId::new("app_service_custom_hostname_binding", "www");
        let mut plan = Plan::new();
        plan.add(Effect::Delete {
            id: site.clone(),
            identifier: "site".to_string(),
        });
        plan.add(Effect::Delete {
            id: binding.clone(),
            identifier: "binding".to_string(),
        });
        plan.add_ordering(site.clone(), binding.clone());

        let levels = plan.levels().unwrap();
        assert_eq!(levels[0][0].resource_id(), &binding);
        assert_eq!(levels[1][0].resource_id(), &site);
    }

    #[test]
    fn cycles_are_reported() {
        let a = Resource::new("app_service", "a")
            .with_dependency(ResourceId::new("app_service", "b"));
        let b = Resource::new("app_service", "b")
            .with_dependency(ResourceId::new("app_service", "a"));
        let mut plan = Plan::new();
        plan.add(Effect::Create(a));
        plan.add(Effect::Create(b));

        let err = plan.levels().unwrap_err();
        assert!(err.contains("app_service.a"));
        assert!(err.contains("app_service.b"));
    }
}
