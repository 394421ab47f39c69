//! Control-plane routes.
//!
//! Session CRUD consumed by the UI, plus the stream upgrade into the
//! binary protocol. Every mutation fans SESSIONS_CHANGE out to the
//! owner's connected streams.

use crate::auth::{extract_token, verify_token, AuthedUser};
use crate::errors::{ApiError, ApiResult, ErrorBody};
use crate::pty::{
    ClosedResponse, CreateSessionRequest, HealthResponse, RenameSessionRequest, SessionInfo,
    SessionRegistry,
};
use crate::ws::{self, UserStreams};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi as UtoipaOpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub streams: UserStreams,
    jwt_secret: Arc<String>,
}

#[derive(UtoipaOpenApi)]
#[openapi(
    paths(
        health,
        list_sessions,
        create_session,
        rename_session,
        delete_session,
        close_all_sessions,
    ),
    components(schemas(
        SessionInfo,
        CreateSessionRequest,
        RenameSessionRequest,
        ClosedResponse,
        HealthResponse,
        ErrorBody
    )),
    tags((name = "sessions", description = "Manage shared terminal sessions"))
)]
pub struct ApiDoc;

pub fn build_router(
    registry: Arc<SessionRegistry>,
    streams: UserStreams,
    jwt_secret: String,
) -> Router {
    let state = AppState {
        registry,
        streams,
        jwt_secret: Arc::new(jwt_secret),
    };
    let openapi = ApiDoc::openapi();
    let swagger_routes: Router<AppState> =
        SwaggerUi::new("/docs").url("/openapi.json", openapi).into();

    Router::new()
        .route("/healthz", get(health))
        .route(
            "/api/sessions",
            get(list_sessions)
                .post(create_session)
                .delete(close_all_sessions),
        )
        .route(
            "/api/sessions/{id}",
            patch(rename_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/stream", any(open_stream))
        .merge(swagger_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> ApiResult<AuthedUser> {
    let token = extract_token(headers, query_token)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    verify_token(&token, &state.jwt_secret).map_err(ApiError::Unauthorized)
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Server is healthy", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[utoipa::path(
    get,
    path = "/api/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "The caller's sessions", body = [SessionInfo]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    let user = authenticate(&state, &headers, None)?;
    Ok(Json(state.registry.list_by_user(&user.user_id)))
}

#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionInfo),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 500, description = "Shell spawn failed", body = ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let user = authenticate(&state, &headers, None)?;
    let session = state
        .registry
        .create(&user.user_id, request.name)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state.streams.notify_sessions_changed(&user.user_id);
    Ok((StatusCode::CREATED, Json(session.info())))
}

#[utoipa::path(
    patch,
    path = "/api/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session ID")),
    request_body = RenameSessionRequest,
    responses(
        (status = 200, description = "Renamed session", body = SessionInfo),
        (status = 404, description = "Session not found", body = ErrorBody),
        (status = 403, description = "Session owned by another user", body = ErrorBody)
    )
)]
pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RenameSessionRequest>,
) -> ApiResult<Json<SessionInfo>> {
    let user = authenticate(&state, &headers, None)?;
    if request.name.is_empty() {
        return Err(ApiError::InvalidRequest("name must not be empty".to_string()));
    }
    let session = owned_session(&state, &id, &user)?;
    session.set_name(request.name);
    state.streams.notify_sessions_changed(&user.user_id);
    Ok(Json(session.info()))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Deleted session", body = SessionInfo),
        (status = 404, description = "Session not found", body = ErrorBody),
        (status = 403, description = "Session owned by another user", body = ErrorBody)
    )
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionInfo>> {
    let user = authenticate(&state, &headers, None)?;
    let session = owned_session(&state, &id, &user)?;
    let info = session.info();
    state.registry.delete(&id);
    state.streams.notify_sessions_changed(&user.user_id);
    Ok(Json(info))
}

#[utoipa::path(
    delete,
    path = "/api/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "All of the caller's sessions closed", body = ClosedResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    )
)]
pub async fn close_all_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ClosedResponse>> {
    let user = authenticate(&state, &headers, None)?;
    let closed = state.registry.close_user_sessions(&user.user_id);
    info!(user_id = %user.user_id, closed, "bulk-closed sessions");
    state.streams.notify_sessions_changed(&user.user_id);
    Ok(Json(ClosedResponse { closed }))
}

fn owned_session(
    state: &AppState,
    id: &str,
    user: &AuthedUser,
) -> ApiResult<Arc<crate::pty::Session>> {
    let session = state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("session {}", id)))?;
    if session.user_id != user.user_id {
        return Err(ApiError::Forbidden("session owned by another user".to_string()));
    }
    Ok(session)
}

#[derive(Deserialize)]
struct StreamParams {
    token: Option<String>,
}

/// Upgrade to the binary stream protocol. Authentication failures reject
/// at the HTTP layer; an unknown or foreign session closes at the
/// protocol level once upgraded.
async fn open_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    let user = authenticate(&state, &headers, params.token.as_deref())?;
    let registry = state.registry.clone();
    let streams = state.streams.clone();
    Ok(ws.on_upgrade(move |socket| {
        ws::handle_stream(socket, registry, streams, user.user_id, id)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn mint(sub: &str) -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};
        #[derive(serde::Serialize)]
        struct Claims {
            sub: String,
            exp: u64,
        }
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn app(registry: Arc<SessionRegistry>) -> Router {
        build_router(registry, UserStreams::default(), SECRET.to_string())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requests_without_token_are_unauthorized() {
        let app = app(Arc::new(SessionRegistry::new(1024)));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_list_roundtrip() {
        let registry = Arc::new(SessionRegistry::new(1024));
        let token = mint("alice");

        let response = app(registry.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("authorization", format!("Bearer {}", token))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"demo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["name"], "demo");
        assert_eq!(created["attached"], false);

        let response = app(registry.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/sessions")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["id"], created["id"]);

        registry.close_user_sessions("alice");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreign_sessions_are_forbidden() {
        let registry = Arc::new(SessionRegistry::new(1024));
        let session = registry.create("bob", None).unwrap();

        let response = app(registry.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sessions/{}", session.id))
                    .header("authorization", format!("Bearer {}", mint("alice")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app(registry.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sessions/missing")
                    .header("authorization", format!("Bearer {}", mint("alice")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        registry.close_user_sessions("bob");
    }
}
