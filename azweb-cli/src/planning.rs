//! Glue between persisted state, the manifest and the interpreter

use std::collections::{HashMap, HashSet};

use azweb_core::differ::create_plan;
use azweb_core::effect::Effect;
use azweb_core::interpreter::{ApplyResult, EffectOutcome};
use azweb_core::plan::Plan;
use azweb_core::provider::Provider;
use azweb_core::resource::{Resource, ResourceId, State};
use azweb_core::schema::ResourceSchema;
use azweb_state::{ResourceState, StateFile};
use log::{info, warn};

/// Re-read every recorded resource, dropping the ones that no longer exist
///
/// Write-only attributes cannot be read back and are kept from the previous
/// entry. Returns the dropped resources.
pub async fn refresh<P: Provider>(
    provider: &P,
    state: &mut StateFile,
) -> Result<Vec<ResourceId>, String> {
    let mut dropped = Vec::new();

    for entry in state.resources.clone() {
        let id = entry.id();
        let mut current = provider
            .read(&id, &entry.identifier)
            .await
            .map_err(|e| format!("Failed to refresh {}: {}", id, e))?;

        if !current.exists {
            warn!("{} ({}) was deleted outside azweb", id, entry.identifier);
            state.remove(&id);
            dropped.push(id);
            continue;
        }

        if let Some(schema) = provider.schema(&id.resource_type) {
            schema.carry_write_only(&entry.to_state().attributes, &mut current.attributes);
        }
        if let Some(mut refreshed) = ResourceState::from_state(&current) {
            refreshed.tainted = entry.tainted;
            state.upsert(refreshed);
        }
    }

    Ok(dropped)
}

/// Effects that move the recorded state to the manifest
///
/// A tainted entry is always replaced, even when its attributes match.
pub fn build_plan(
    desired: &[Resource],
    state: &StateFile,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let tainted: HashSet<ResourceId> = state
        .resources
        .iter()
        .filter(|r| r.tainted)
        .map(ResourceState::id)
        .filter(|id| desired.iter().any(|r| &r.id == id))
        .collect();

    let mut current: HashMap<ResourceId, State> = state.states();
    current.retain(|id, _| !tainted.contains(id));
    let untainted: Vec<Resource> = desired
        .iter()
        .filter(|r| !tainted.contains(&r.id))
        .cloned()
        .collect();

    let mut plan = create_plan(&untainted, &current, schemas);
    for resource in desired.iter().filter(|r| tainted.contains(&r.id)) {
        if let Some(entry) = state.find(&resource.id) {
            plan.add(Effect::Replace {
                id: resource.id.clone(),
                from: entry.to_state(),
                to: resource.clone(),
            });
        }
    }
    plan
}

/// Delete everything recorded, dependents before what they depend on
pub fn destroy_plan(state: &StateFile, desired: &[Resource]) -> Plan {
    let mut plan = Plan::new();
    for entry in &state.resources {
        plan.add(Effect::Delete {
            id: entry.id(),
            identifier: entry.identifier.clone(),
        });
    }
    for resource in desired {
        for dependency in &resource.depends_on {
            plan.add_ordering(dependency.clone(), resource.id.clone());
        }
    }
    plan
}

/// Fold apply results into the state
///
/// A failed create or replace that left an object behind is recorded as
/// tainted so the next apply replaces it instead of creating a duplicate.
pub fn record_results(state: &mut StateFile, result: &ApplyResult) {
    for effect in &result.results {
        match &effect.result {
            Ok(EffectOutcome::Created { state: current })
            | Ok(EffectOutcome::Updated { state: current })
            | Ok(EffectOutcome::Replaced { state: current }) => {
                if let Some(entry) = ResourceState::from_state(current) {
                    state.upsert(entry);
                }
            }
            Ok(EffectOutcome::Deleted) => {
                state.remove(&effect.id);
            }
            Ok(EffectOutcome::Skipped { .. }) => {}
            Err(error) => {
                if matches!(effect.verb, "create" | "replace")
                    && let Some(identifier) = &error.identifier
                {
                    info!("Recording {} ({}) as tainted", effect.id, identifier);
                    state.upsert(ResourceState::tainted(&effect.id, identifier));
                }
            }
        }
    }
}
