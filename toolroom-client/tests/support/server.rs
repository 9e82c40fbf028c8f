//! Throw-away HTTP movement store for client tests.
//!
//! Serves the REST surface on `127.0.0.1:0` on top of an
//! [`InMemoryMovementStore`]. Requests can be stalled past the client timeout
//! to exercise retries.

#![allow(dead_code)]

use axum::extract::{Path, Query, Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use toolroom_core::{
    CheckoutRecord, CheckoutUpdate, EntityId, ErrorKind, InstanceUpdate, ListQuery, MovementKey,
    NewToolInstance, Page, ReturnRecord, ReturnUpdate, ToolInstance, ToolroomError,
    ValidationError,
};
use toolroom_storage::{InMemoryMovementStore, MovementStore};

/// How long a stalled request sleeps before being handled.
pub const STALL: Duration = Duration::from_secs(2);

struct Inner {
    store: Arc<InMemoryMovementStore>,
    stall_next: AtomicU32,
    requests: AtomicUsize,
    last_authorization: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct FakeApi {
    inner: Arc<Inner>,
    pub base_url: String,
}

impl FakeApi {
    pub fn store(&self) -> &Arc<InMemoryMovementStore> {
        &self.inner.store
    }

    /// Hold the next `n` requests for [`STALL`].
    pub fn stall_next(&self, n: u32) {
        self.inner.stall_next.store(n, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.inner
            .last_authorization
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    fn take_stall(&self) -> bool {
        self.inner
            .stall_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub async fn spawn(store: Arc<InMemoryMovementStore>) -> FakeApi {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let api = FakeApi {
        inner: Arc::new(Inner {
            store,
            stall_next: AtomicU32::new(0),
            requests: AtomicUsize::new(0),
            last_authorization: Mutex::new(None),
        }),
        base_url: format!("http://{}", addr),
    };

    let app = Router::new()
        .route("/instances", get(list_instances).post(create_instance))
        .route(
            "/instances/:id",
            get(get_instance).put(update_instance).delete(delete_instance),
        )
        .route("/checkouts", get(list_checkouts).post(create_checkout))
        .route(
            "/checkouts/:instance_id/:employee_id/:timestamp",
            get(get_checkout).put(update_checkout).delete(delete_checkout),
        )
        .route("/returns", get(list_returns).post(create_return))
        .route(
            "/returns/:instance_id/:employee_id/:timestamp",
            get(get_return).put(update_return).delete(delete_return),
        )
        .layer(middleware::from_fn_with_state(api.clone(), gate))
        .with_state(api.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    api
}

async fn gate(State(api): State<FakeApi>, request: Request, next: Next) -> Response {
    api.inner.requests.fetch_add(1, Ordering::SeqCst);
    let auth = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Ok(mut last) = api.inner.last_authorization.lock() {
        *last = auth;
    }
    if api.take_stall() {
        tokio::time::sleep(STALL).await;
    }
    next.run(request).await
}

struct ApiError(ToolroomError);

impl From<ToolroomError> for ApiError {
    fn from(err: ToolroomError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "message": self.0.to_string(), "field": self.0.field() });
        (status, Json(body)).into_response()
    }
}

type Reply<T> = Result<Json<T>, ApiError>;
type Created<T> = Result<(StatusCode, Json<T>), ApiError>;

fn list_query(params: HashMap<String, String>) -> Result<ListQuery, ApiError> {
    let number = |name: &str, default: u32| -> Result<u32, ApiError> {
        match params.get(name) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ValidationError::invalid(name, "must be a number").into()),
            None => Ok(default),
        }
    };
    let mut query = ListQuery::new(number("page", 1)?, number("pageSize", 10)?);
    for (key, value) in &params {
        match key.as_str() {
            "page" | "pageSize" => {}
            "search" => query = query.with_search(value.as_str()),
            _ => query = query.with_filter(key.as_str(), value.as_str()),
        }
    }
    Ok(query)
}

fn movement_key(raw: (String, String, String)) -> Result<MovementKey, ApiError> {
    Ok(MovementKey::parse(&raw.0, &raw.1, &raw.2)?)
}

async fn list_instances(
    State(api): State<FakeApi>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply<Page<ToolInstance>> {
    Ok(Json(api.store().instance_list(&list_query(params)?).await?))
}

async fn get_instance(State(api): State<FakeApi>, Path(id): Path<String>) -> Reply<ToolInstance> {
    Ok(Json(api.store().instance_get(&EntityId::parse(&id)).await?))
}

async fn create_instance(
    State(api): State<FakeApi>,
    Json(new): Json<NewToolInstance>,
) -> Created<ToolInstance> {
    let created = api.store().instance_create(&new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_instance(
    State(api): State<FakeApi>,
    Path(id): Path<String>,
    Json(update): Json<InstanceUpdate>,
) -> Reply<ToolInstance> {
    Ok(Json(api.store().instance_update(&EntityId::parse(&id), &update).await?))
}

async fn delete_instance(
    State(api): State<FakeApi>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    api.store().instance_delete(&EntityId::parse(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_checkouts(
    State(api): State<FakeApi>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply<Page<CheckoutRecord>> {
    Ok(Json(api.store().checkout_list(&list_query(params)?).await?))
}

async fn get_checkout(
    State(api): State<FakeApi>,
    Path(raw): Path<(String, String, String)>,
) -> Reply<CheckoutRecord> {
    Ok(Json(api.store().checkout_get(&movement_key(raw)?).await?))
}

async fn create_checkout(
    State(api): State<FakeApi>,
    Json(record): Json<CheckoutRecord>,
) -> Created<CheckoutRecord> {
    let created = api.store().checkout_create(&record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_checkout(
    State(api): State<FakeApi>,
    Path(raw): Path<(String, String, String)>,
    Json(update): Json<CheckoutUpdate>,
) -> Reply<CheckoutRecord> {
    Ok(Json(api.store().checkout_update(&movement_key(raw)?, &update).await?))
}

async fn delete_checkout(
    State(api): State<FakeApi>,
    Path(raw): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    api.store().checkout_delete(&movement_key(raw)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_returns(
    State(api): State<FakeApi>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply<Page<ReturnRecord>> {
    Ok(Json(api.store().return_list(&list_query(params)?).await?))
}

async fn get_return(
    State(api): State<FakeApi>,
    Path(raw): Path<(String, String, String)>,
) -> Reply<ReturnRecord> {
    Ok(Json(api.store().return_get(&movement_key(raw)?).await?))
}

async fn create_return(
    State(api): State<FakeApi>,
    Json(record): Json<ReturnRecord>,
) -> Created<ReturnRecord> {
    let created = api.store().return_create(&record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_return(
    State(api): State<FakeApi>,
    Path(raw): Path<(String, String, String)>,
    Json(update): Json<ReturnUpdate>,
) -> Reply<ReturnRecord> {
    Ok(Json(api.store().return_update(&movement_key(raw)?, &update).await?))
}

async fn delete_return(
    State(api): State<FakeApi>,
    Path(raw): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    api.store().return_delete(&movement_key(raw)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
