//! Movement store over the toolroom REST API.
//!
//! Instances live under `/instances/{id}`; checkouts and returns under
//! `/checkouts/{instanceId}/{employeeId}/{timestamp}` and the mirrored
//! `/returns` path. Reads are retried on transport failures; writes are sent
//! exactly once.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toolroom_core::{
    CheckoutRecord, CheckoutUpdate, ConfigError, EntityId, EntityKind, InstanceUpdate, ListQuery,
    MovementKey, NewToolInstance, Page, ReturnRecord, ReturnUpdate, StoreError, ToolInstance,
    ToolroomError, ToolroomResult, ValidationError,
};
use toolroom_storage::MovementStore;
use tracing::{debug, warn};

use crate::config::ClientConfig;

/// Error body returned by the API for 4xx responses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    message: Option<String>,
    field: Option<String>,
}

/// The resource a request addresses, for error reporting.
struct Target {
    kind: EntityKind,
    key: String,
}

impl Target {
    fn collection(kind: EntityKind) -> Self {
        Self {
            kind,
            key: kind.collection().to_string(),
        }
    }

    fn item(kind: EntityKind, key: impl ToString) -> Self {
        Self {
            kind,
            key: key.to_string(),
        }
    }
}

/// [`MovementStore`] backed by the remote service.
///
/// Custody rules are the service's business; this store only maps HTTP
/// statuses onto [`StoreError`] variants.
#[derive(Clone)]
pub struct RestMovementStore {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
    timeout_ms: u64,
    idempotent_retries: u32,
}

impl RestMovementStore {
    /// Build the HTTP client. Fails on an invalid config or an unusable
    /// bearer token, before any request is sent.
    pub fn new(config: &ClientConfig) -> ToolroomResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| StoreError::transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            auth_header: build_auth_headers(config.bearer_token.as_deref())?,
            timeout_ms: config.request_timeout_ms,
            idempotent_retries: config.idempotent_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url).headers(self.auth_header.clone())
    }

    /// GET with up to `idempotent_retries` extra attempts on timeouts and
    /// transport errors.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        target: &Target,
    ) -> ToolroomResult<T> {
        let mut attempt = 0;
        loop {
            let request = self.request(Method::GET, path).query(query);
            match self.execute(request, target).await {
                Err(ToolroomError::Store(err))
                    if err.is_transient() && attempt < self.idempotent_retries =>
                {
                    attempt += 1;
                    warn!(path, attempt, error = %err, "Retrying idempotent request");
                }
                result => return result.and_then(|(status, body)| decode(status, &body)),
            }
        }
    }

    async fn send_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        target: &Target,
    ) -> ToolroomResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.request(method, path).json(body);
        let (status, body) = self.execute(request, target).await?;
        decode(status, &body)
    }

    async fn delete(&self, path: &str, target: &Target) -> ToolroomResult<()> {
        self.execute(self.request(Method::DELETE, path), target)
            .await
            .map(|_| ())
    }

    /// Send once and map failures. Returns the body of a 2xx response.
    async fn execute(
        &self,
        request: RequestBuilder,
        target: &Target,
    ) -> ToolroomResult<(StatusCode, String)> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(status = status.as_u16(), kind = %target.kind, key = %target.key, "Response");
        if status.is_success() {
            Ok((status, body))
        } else {
            Err(error_for_status(status, &body, target))
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ToolroomError {
        if err.is_timeout() {
            StoreError::Timeout {
                after_ms: self.timeout_ms,
            }
            .into()
        } else {
            StoreError::transport(err.to_string()).into()
        }
    }
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> ToolroomResult<T> {
    serde_json::from_str(body).map_err(|e| {
        StoreError::UnexpectedResponse {
            status: status.as_u16(),
            body: format!("{}: {}", e, truncate(body)),
        }
        .into()
    })
}

/// 404 maps to `NotFound`, 409 to `Conflict` and 400/422 to a field
/// validation error. Anything else is reported verbatim.
fn error_for_status(status: StatusCode, body: &str, target: &Target) -> ToolroomError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    match status {
        StatusCode::NOT_FOUND => StoreError::not_found(target.kind, &target.key).into(),
        StatusCode::CONFLICT => StoreError::conflict(target.kind, &target.key, message).into(),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            let field = parsed.field.unwrap_or_else(|| "request".to_string());
            ValidationError::invalid(field, message).into()
        }
        _ => StoreError::UnexpectedResponse {
            status: status.as_u16(),
            body: truncate(body),
        }
        .into(),
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

fn build_auth_headers(bearer_token: Option<&str>) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            ConfigError::InvalidValue {
                field: "bearer_token",
                reason: e.to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

fn instance_path(id: &EntityId) -> String {
    format!("/instances/{}", id.to_path_segment())
}

fn movement_path(kind: EntityKind, key: &MovementKey) -> String {
    format!("/{}/{}", kind.collection(), key.to_path())
}

#[async_trait]
impl MovementStore for RestMovementStore {
    async fn instance_list(&self, query: &ListQuery) -> ToolroomResult<Page<ToolInstance>> {
        query.validate()?;
        let target = Target::collection(EntityKind::Instance);
        self.get_json("/instances", &query.to_query_pairs(), &target)
            .await
    }

    async fn instance_get(&self, id: &EntityId) -> ToolroomResult<ToolInstance> {
        let target = Target::item(EntityKind::Instance, id);
        self.get_json(&instance_path(id), &[], &target).await
    }

    async fn instance_create(&self, new: &NewToolInstance) -> ToolroomResult<ToolInstance> {
        let target = Target::collection(EntityKind::Instance);
        self.send_json(Method::POST, "/instances", new, &target)
            .await
    }

    async fn instance_update(
        &self,
        id: &EntityId,
        update: &InstanceUpdate,
    ) -> ToolroomResult<ToolInstance> {
        let target = Target::item(EntityKind::Instance, id);
        self.send_json(Method::PUT, &instance_path(id), update, &target)
            .await
    }

    async fn instance_delete(&self, id: &EntityId) -> ToolroomResult<()> {
        let target = Target::item(EntityKind::Instance, id);
        self.delete(&instance_path(id), &target).await
    }

    async fn checkout_list(&self, query: &ListQuery) -> ToolroomResult<Page<CheckoutRecord>> {
        query.validate()?;
        let target = Target::collection(EntityKind::Checkout);
        self.get_json("/checkouts", &query.to_query_pairs(), &target)
            .await
    }

    async fn checkout_get(&self, key: &MovementKey) -> ToolroomResult<CheckoutRecord> {
        let target = Target::item(EntityKind::Checkout, key);
        self.get_json(&movement_path(EntityKind::Checkout, key), &[], &target)
            .await
    }

    async fn checkout_create(&self, record: &CheckoutRecord) -> ToolroomResult<CheckoutRecord> {
        let target = Target::item(EntityKind::Checkout, record.key());
        self.send_json(Method::POST, "/checkouts", record, &target)
            .await
    }

    async fn checkout_update(
        &self,
        key: &MovementKey,
        update: &CheckoutUpdate,
    ) -> ToolroomResult<CheckoutRecord> {
        let target = Target::item(EntityKind::Checkout, key);
        let path = movement_path(EntityKind::Checkout, key);
        self.send_json(Method::PUT, &path, update, &target).await
    }

    async fn checkout_delete(&self, key: &MovementKey) -> ToolroomResult<()> {
        let target = Target::item(EntityKind::Checkout, key);
        self.delete(&movement_path(EntityKind::Checkout, key), &target)
            .await
    }

    async fn return_list(&self, query: &ListQuery) -> ToolroomResult<Page<ReturnRecord>> {
        query.validate()?;
        let target = Target::collection(EntityKind::Return);
        self.get_json("/returns", &query.to_query_pairs(), &target)
            .await
    }

    async fn return_get(&self, key: &MovementKey) -> ToolroomResult<ReturnRecord> {
        let target = Target::item(EntityKind::Return, key);
        self.get_json(&movement_path(EntityKind::Return, key), &[], &target)
            .await
    }

    async fn return_create(&self, record: &ReturnRecord) -> ToolroomResult<ReturnRecord> {
        let target = Target::item(EntityKind::Return, record.key());
        self.send_json(Method::POST, "/returns", record, &target)
            .await
    }

    async fn return_update(
        &self,
        key: &MovementKey,
        update: &ReturnUpdate,
    ) -> ToolroomResult<ReturnRecord> {
        let target = Target::item(EntityKind::Return, key);
        let path = movement_path(EntityKind::Return, key);
        self.send_json(Method::PUT, &path, update, &target).await
    }

    async fn return_delete(&self, key: &MovementKey) -> ToolroomResult<()> {
        let target = Target::item(EntityKind::Return, key);
        self.delete(&movement_path(EntityKind::Return, key), &target)
            .await
    }
}
