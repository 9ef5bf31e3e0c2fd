//! Effect - A single side effect to perform against a provider

use crate::resource::{Resource, ResourceId, State};

/// An operation that changes remote state
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Create(Resource),
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
    },
    /// Delete the current object, then create the desired one
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
    },
    Delete {
        id: ResourceId,
        identifier: String,
    },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(r) => &r.id,
            Effect::Update { id, .. } | Effect::Replace { id, .. } | Effect::Delete { id, .. } => {
                id
            }
        }
    }

    /// Resources the desired side of this effect depends on
    pub fn depends_on(&self) -> &[ResourceId] {
        match self {
            Effect::Create(r) => &r.depends_on,
            Effect::Update { to, .. } | Effect::Replace { to, .. } => &to.depends_on,
            Effect::Delete { .. } => &[],
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Effect::Create(_) => "create",
            Effect::Update { .. } => "update",
            Effect::Replace { .. } => "replace",
            Effect::Delete { .. } => "delete",
        }
    }
}
