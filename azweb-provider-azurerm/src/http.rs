//! `reqwest` implementation of [`ArmClient`]
//!
//! Long-running operations follow the ARM async protocol: a 201/202 response
//! carrying `Azure-AsyncOperation` is polled until its `status` is terminal,
//! and a 202 carrying only `Location` is polled until it stops answering 202.
//! Both waits run through the provisioning-state poll loop, bounded by the
//! operation's deadline.

use std::time::Duration;

use async_trait::async_trait;
use azweb_core::poll::{PollState, StateChangeConf};
use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::timeouts::OperationContext;
use log::debug;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value as Json;

use crate::client::{ArmClient, ArmError, ErrorEnvelope};
use crate::config::ProviderConfig;

const ASYNC_OPERATION: &str = "Azure-AsyncOperation";

const OPERATION_PENDING: &[&str] = &[
    "InProgress",
    "Accepted",
    "Running",
    "Creating",
    "Updating",
    "Deleting",
];
const OPERATION_SUCCEEDED: &[&str] = &["Succeeded"];
const OPERATION_FAILED: &[&str] = &["Failed", "Canceled"];

pub struct HttpArmClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    poll_interval: Duration,
}

impl HttpArmClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let token = config
            .require_token()
            .map_err(|e| ProviderError::validation(e.to_string()))?
            .to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("azweb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ArmError::from)?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token,
            poll_interval: config.poll_interval,
        })
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Json>,
    ) -> Result<Response, ArmError> {
        debug!("{} {}", method, url);
        let mut request = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Turn a non-success response into [`ArmError::Api`]
    async fn check(method: &'static str, path: &str, response: Response) -> Result<Response, ArmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await?;
        let envelope: ErrorEnvelope = serde_json::from_str(&text).unwrap_or_default();
        Err(ArmError::Api {
            method,
            path: path.to_string(),
            status: status.as_u16(),
            code: envelope.error.code,
            message: if envelope.error.message.is_empty() {
                text
            } else {
                envelope.error.message
            },
        })
    }

    async fn body(response: Response) -> Result<Option<Json>, ArmError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Wait for the operation a mutating response started
    ///
    /// Returns the final body when the protocol yields one.
    async fn complete(
        &self,
        ctx: &OperationContext,
        path: &str,
        response: Response,
    ) -> ProviderResult<Option<Json>> {
        let status = response.status();
        let async_operation = header(response.headers(), ASYNC_OPERATION);
        let location = header(response.headers(), LOCATION.as_str());

        match (status, async_operation, location) {
            (StatusCode::CREATED | StatusCode::ACCEPTED, Some(url), _) => {
                self.wait_async_operation(ctx, path, &url).await?;
                Ok(None)
            }
            (StatusCode::ACCEPTED, None, Some(url)) => self.wait_location(ctx, path, &url).await,
            _ => Ok(Self::body(response).await?),
        }
    }

    async fn wait_async_operation(
        &self,
        ctx: &OperationContext,
        path: &str,
        url: &str,
    ) -> ProviderResult<()> {
        let conf = StateChangeConf::new(OPERATION_PENDING, OPERATION_SUCCEEDED, ctx.deadline)
            .with_failure(OPERATION_FAILED)
            .with_min_poll_interval(self.poll_interval)
            .with_subject(format!("operation on {}", path));

        conf.wait_for_state(|| async move {
            let response = self.send(Method::GET, url, None).await?;
            let response = Self::check("GET", url, response).await?;
            let body = Self::body(response).await?.unwrap_or(Json::Null);
            let status = body
                .get("status")
                .and_then(Json::as_str)
                .ok_or_else(|| ArmError::MissingStatus {
                    path: path.to_string(),
                })?
                .to_string();
            Ok::<_, ProviderError>(PollState::new((), status))
        })
        .await
    }

    async fn wait_location(
        &self,
        ctx: &OperationContext,
        path: &str,
        url: &str,
    ) -> ProviderResult<Option<Json>> {
        let conf = StateChangeConf::new(&["InProgress"], OPERATION_SUCCEEDED, ctx.deadline)
            .with_min_poll_interval(self.poll_interval)
            .with_subject(format!("operation on {}", path));

        conf.wait_for_state(|| async move {
            let response = self.send(Method::GET, url, None).await?;
            if response.status() == StatusCode::ACCEPTED {
                return Ok(PollState::new(None, "InProgress"));
            }
            let response = Self::check("GET", url, response).await?;
            Ok::<_, ProviderError>(PollState::new(Self::body(response).await?, "Succeeded"))
        })
        .await
    }

    async fn put_or_patch(
        &self,
        ctx: &OperationContext,
        method: Method,
        path: &str,
        api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json> {
        let name = if method == Method::PUT { "PUT" } else { "PATCH" };
        let response = self.send(method, &self.url(path, api_version), Some(body)).await?;
        let response = Self::check(name, path, response).await?;

        if let Some(body) = self.complete(ctx, path, response).await? {
            return Ok(body);
        }
        self.get(path, api_version).await?.ok_or_else(|| {
            ProviderError::not_found(format!("{} was not found after {}", path, name))
        })
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ArmClient for HttpArmClient {
    async fn get(&self, path: &str, api_version: &str) -> ProviderResult<Option<Json>> {
        let response = self
            .send(Method::GET, &self.url(path, api_version), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check("GET", path, response).await?;
        Ok(Self::body(response).await?)
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        path: &str,
        api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json> {
        self.put_or_patch(ctx, Method::PUT, path, api_version, body)
            .await
    }

    async fn patch(
        &self,
        ctx: &OperationContext,
        path: &str,
        api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json> {
        self.put_or_patch(ctx, Method::PATCH, path, api_version, body)
            .await
    }

    async fn post(&self, path: &str, api_version: &str, body: Option<&Json>) -> ProviderResult<Json> {
        let response = self
            .send(Method::POST, &self.url(path, api_version), body)
            .await?;
        let response = Self::check("POST", path, response).await?;
        Ok(Self::body(response).await?.unwrap_or(Json::Null))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        path: &str,
        api_version: &str,
    ) -> ProviderResult<()> {
        let response = self
            .send(Method::DELETE, &self.url(path, api_version), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let response = Self::check("DELETE", path, response).await?;
        self.complete(ctx, path, response).await?;
        Ok(())
    }
}
