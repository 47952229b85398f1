use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::debug;
use registry::{ClientsResponse, InitRequest, InitResponse, RegistryError, RegistryService, SetRequest, UpdatesRequest};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// HTTP API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<RegistryService>,
}

/// Create the HTTP API router
pub fn create_router(service: Arc<RegistryService>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/init", post(handle_init))
        .route("/api/updates", post(handle_updates))
        .route("/api/set", post(handle_set))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(ApiState { service })
}

async fn health_check() -> &'static str {
    "Registry is alive"
}

/// Register, list clients, or look one up
async fn handle_init(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InitResponse>, Response> {
    let request: InitRequest = parse_body(&headers, &body)?;
    let response = state.service.init(request).await.map_err(error_response)?;
    Ok(Json(response))
}

/// Drain the caller's peer updates
async fn handle_updates(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ClientsResponse>, Response> {
    let request: UpdatesRequest = parse_body(&headers, &body)?;
    let response = state.service.updates(request).await.map_err(error_response)?;
    Ok(Json(response))
}

/// Replace the caller's data or deregister
async fn handle_set(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Response> {
    let request: SetRequest = parse_body(&headers, &body)?;
    state.service.set(request).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

/// Decode a JSON object body, taking the token from `Authorization` if sent
fn parse_body<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, Response> {
    let mut fields = if body.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice(body) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) | Err(_) => return Err(bad_request("Body is not an object")),
        }
    };

    if let Some(token) = bearer_token(headers) {
        fields.insert("token".to_string(), Value::String(token));
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        debug!("Rejected request body: {}", e);
        bad_request("Body has malformed fields")
    })
}

/// Everything after the first space of the `Authorization` header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.split_once(' ').map_or(value, |(_, token)| token);
    Some(token.to_string())
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

pub fn status_for(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::MissingAddress | RegistryError::DataWithoutName | RegistryError::InvalidData(_) => {
            StatusCode::BAD_REQUEST
        }
        RegistryError::MissingToken => StatusCode::UNAUTHORIZED,
        RegistryError::InvalidToken => StatusCode::FORBIDDEN,
        RegistryError::ServerNotFound | RegistryError::NameNotFound | RegistryError::NameNotRegisterable => {
            StatusCode::NOT_FOUND
        }
        RegistryError::NameAlreadyTaken => StatusCode::CONFLICT,
        RegistryError::ExhaustedKeyspace => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: RegistryError) -> Response {
    let status = status_for(&error);
    let mut response = (status, error.to_string()).into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}
