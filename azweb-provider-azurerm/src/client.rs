//! ARM client abstraction
//!
//! Handlers talk to Azure Resource Manager only through [`ArmClient`]. Paths
//! are ARM resource IDs (optionally followed by an action such as
//! `/config/appsettings/list`). Mutating calls return once the long-running
//! operation they start has finished.

use async_trait::async_trait;
use azweb_core::provider::{ErrorKind, ProviderError, ProviderResult};
use azweb_core::timeouts::OperationContext;
use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;

pub const WEB_API_VERSION: &str = "2019-08-01";
pub const NETWORK_API_VERSION: &str = "2019-11-01";

#[async_trait]
pub trait ArmClient: Send + Sync {
    /// GET a resource; `None` when ARM answers 404
    async fn get(&self, path: &str, api_version: &str) -> ProviderResult<Option<Json>>;

    /// PUT a resource body and wait for the operation to finish
    async fn put(
        &self,
        ctx: &OperationContext,
        path: &str,
        api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json>;

    /// PATCH a resource body and wait for the operation to finish
    async fn patch(
        &self,
        ctx: &OperationContext,
        path: &str,
        api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json>;

    /// POST an action (e.g., `listkeys`)
    async fn post(&self, path: &str, api_version: &str, body: Option<&Json>) -> ProviderResult<Json>;

    /// DELETE a resource and wait for the operation to finish; 404 counts as deleted
    async fn delete(&self, ctx: &OperationContext, path: &str, api_version: &str)
    -> ProviderResult<()>;
}

/// ARM error envelope: `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ArmError {
    #[error("{method} {path} returned {status} ({code}): {message}")]
    Api {
        method: &'static str,
        path: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("long-running operation on {path} finished with status {status}: {message}")]
    OperationFailed {
        path: String,
        status: String,
        message: String,
    },

    #[error("long-running operation on {path} returned no status")]
    MissingStatus { path: String },
}

impl ArmError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArmError::Api { status: 404, .. })
    }
}

impl From<ArmError> for ProviderError {
    fn from(e: ArmError) -> Self {
        let (kind, message) = match &e {
            ArmError::Api { status: 404, .. } => (ErrorKind::NotFound, "ARM object not found"),
            ArmError::Api { status: 400, .. } => (ErrorKind::Validation, "ARM rejected the request"),
            ArmError::OperationFailed { status, .. } => (
                ErrorKind::Failed {
                    state: status.clone(),
                },
                "ARM operation failed",
            ),
            _ => (ErrorKind::Remote, "ARM request failed"),
        };
        ProviderError::with_kind(kind, message).with_cause(e)
    }
}

/// `properties.provisioningState` of an ARM body, if present
pub fn provisioning_state(body: &Json) -> Option<&str> {
    body.pointer("/properties/provisioningState")
        .and_then(Json::as_str)
}
