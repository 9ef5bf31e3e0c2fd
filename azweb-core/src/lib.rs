//! azweb Core
//!
//! Reconciliation core for Azure web resources: desired state is diffed
//! against remote state into a Plan of Effects, and each Effect is carried
//! out under named locks, per-operation deadlines and provisioning-state
//! polling.

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod lock;
pub mod orchestrator;
pub mod plan;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod timeouts;
