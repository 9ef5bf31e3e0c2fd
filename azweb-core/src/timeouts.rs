//! Operation timeouts and deadlines
//!
//! Every CRUD operation runs against its own budget. The budget is turned
//! into an absolute [`Deadline`] when the operation starts; waits nested
//! inside the operation use whatever time is left on it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::provider::{ErrorKind, ProviderError, ProviderResult};
use crate::resource::ResourceId;

/// Kind of CRUD operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Independent time budgets for each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

impl OperationTimeouts {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    /// Apply overrides such as `{"create": "45m", "read": "90s"}`
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Result<Self, String> {
        for (key, value) in overrides {
            let duration = humantime::parse_duration(value)
                .map_err(|e| format!("Invalid timeout '{}' for {}: {}", value, key, e))?;
            match key.as_str() {
                "create" => self.create = duration,
                "read" => self.read = duration,
                "update" => self.update = duration,
                "delete" => self.delete = duration,
                other => return Err(format!("Unknown timeout '{}'", other)),
            }
        }
        Ok(self)
    }
}

/// Absolute point in time after which an operation is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// The earlier of this deadline and `budget` from now
    pub fn shorten(self, budget: Duration) -> Self {
        self.min(Self::after(budget))
    }
}

/// Context handed to every step of one CRUD operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: Operation,
    pub resource_id: ResourceId,
    pub deadline: Deadline,
}

impl OperationContext {
    pub fn new(operation: Operation, resource_id: ResourceId, budget: Duration) -> Self {
        Self {
            operation,
            resource_id,
            deadline: Deadline::after(budget),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.remaining()
    }

    /// Run `fut`, abandoning it once the deadline passes
    pub async fn run<T, F>(&self, fut: F) -> ProviderResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        match tokio::time::timeout_at(self.deadline.instant(), fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::with_kind(
                ErrorKind::Timeout { last_state: None },
                format!("timeout while waiting for {} to complete", self.operation),
            )
            .for_resource(self.resource_id.clone())),
        }
    }
}
