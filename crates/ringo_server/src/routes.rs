//! Declarative endpoint mapping for the user API.
//!
//! | Operation | Path | Method |
//! |---|---|---|
//! | search | `/users` | GET |
//! | create | `/users` | POST |
//! | read | `/users/:id` | GET |
//! | update | `/users/:id` | PUT |
//! | delete | `/users/:id` | DELETE |
//! | reset_password | `/users/:id/password` | POST |

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use log::{error, info, warn};
use ringo_core::{
    core_version, CrudError, LogCategory, SearchQuery, UserSearch, UserService, ValueMap,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    /// Wraps a migrated connection; requests are serialized on it.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned"))
    }
}

/// Per-request id attached to every log line of that request.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// API response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Query string of `GET /users`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub fields: Option<String>,
}

impl From<SearchParams> for UserSearch {
    fn from(params: SearchParams) -> Self {
        Self {
            query: SearchQuery {
                limit: params.limit,
                offset: params.offset.unwrap_or(0),
                filter: params.filter,
                sort: params.sort,
            },
            fields: params.fields,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetPasswordResponse {
    pub password: String,
}

/// Error surfaced to HTTP clients.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<CrudError> for ApiError {
    fn from(err: CrudError) -> Self {
        let status = match &err {
            CrudError::InvalidArgument(_) | CrudError::ClientError(_) => StatusCode::BAD_REQUEST,
            CrudError::NotFound { .. } => StatusCode::NOT_FOUND,
            CrudError::ConstraintViolation(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("event=api_error module=server status=error error={err}");
            return Self::internal("internal server error");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/users", get(search_users).post(create_user))
        .route(
            "/users/:id",
            get(read_user).put(update_user).delete(delete_user),
        )
        .route("/users/:id/password", post(reset_password))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(user_routes)
        .layer(middleware::from_fn(log_request))
        .layer(CorsLayer::permissive())
}

async fn log_request(mut request: Request, next: Next) -> Response {
    let started_at = Instant::now();
    let correlation_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let response = next.run(request).await;
    let status = response.status();
    let line = format!(
        "event=http_request category={} method={} path={} status={} correlation_id={} duration_ms={}",
        LogCategory::Request,
        method,
        path,
        status.as_u16(),
        correlation_id,
        started_at.elapsed().as_millis()
    );
    if status.is_server_error() {
        error!("{line}");
    } else if status.is_client_error() {
        warn!("{line}");
    } else {
        info!("{line}");
    }
    response
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(core_version()))
}

/// GET /users
async fn search_users(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<Vec<ValueMap>>>> {
    let Query(params) = params?;
    let conn = state.lock()?;
    let users = UserService::new(&conn)
        .with_correlation_id(correlation_id.0)
        .search(&params.into())?;
    Ok(Json(ApiResponse::ok(users)))
}

/// POST /users
async fn create_user(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    request: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ValueMap>>)> {
    let Json(request) = request?;
    let conn = state.lock()?;
    let user = UserService::new(&conn)
        .with_correlation_id(correlation_id.0)
        .create(&request.name, &request.password)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

/// GET /users/:id
async fn read_user(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<ApiResponse<ValueMap>>> {
    let Path(id) = id?;
    let conn = state.lock()?;
    let user = UserService::new(&conn)
        .with_correlation_id(correlation_id.0)
        .read(id)?;
    Ok(Json(ApiResponse::ok(user)))
}

/// PUT /users/:id
async fn update_user(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    id: Result<Path<i64>, PathRejection>,
    values: Result<Json<ValueMap>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<ValueMap>>> {
    let Path(id) = id?;
    let Json(values) = values?;
    let conn = state.lock()?;
    let user = UserService::new(&conn)
        .with_correlation_id(correlation_id.0)
        .update(id, &values)?;
    Ok(Json(ApiResponse::ok(user)))
}

/// DELETE /users/:id
async fn delete_user(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    let conn = state.lock()?;
    UserService::new(&conn)
        .with_correlation_id(correlation_id.0)
        .delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /users/:id/password
///
/// An empty body generates a random password. A non-empty body must be a
/// valid `{"password": ...}` object.
async fn reset_password(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    id: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<ResetPasswordResponse>>> {
    let Path(id) = id?;
    let requested = if body.is_empty() {
        None
    } else {
        let Json(request) = Json::<ResetPasswordRequest>::from_bytes(&body)?;
        request.password
    };
    let conn = state.lock()?;
    let password = UserService::new(&conn)
        .with_correlation_id(correlation_id.0)
        .reset_password(id, requested.as_deref())?;
    Ok(Json(ApiResponse::ok(ResetPasswordResponse { password })))
}
