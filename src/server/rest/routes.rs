use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::proxy;
use crate::server::rest::{
    handlers, logging_middleware::request_logging_middleware, middleware::auth_middleware,
    openapi::ApiDoc,
};
use crate::shared::models::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes: health, version and the completion callback issued
    // from inside sandboxes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route(
            "/api/containers/{id}/complete",
            post(handlers::containers::complete_container),
        );

    let protected_routes = Router::new()
        .route(
            "/api/exercises/upload",
            post(handlers::exercises::upload_exercise)
                .layer(DefaultBodyLimit::max(state.config.upload_max_size)),
        )
        .route("/api/exercises", get(handlers::exercises::list_exercises))
        .route(
            "/api/exercises/{id}",
            delete(handlers::exercises::delete_exercise),
        )
        .route(
            "/api/exercises/launch/{id}",
            post(handlers::containers::launch_container),
        )
        .route("/api/containers", get(handlers::containers::list_containers))
        .route(
            "/api/containers/{id}/stop",
            post(handlers::containers::stop_container),
        )
        .route(
            "/api/admin/containers",
            get(handlers::containers::admin_list_containers),
        )
        .route(
            "/api/admin/containers/{id}/stop",
            post(handlers::containers::admin_stop_container),
        )
        .route("/api/admin/events", get(handlers::events::list_events))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let api_routes = public_routes.merge(protected_routes).with_state(state.clone());

    // The proxy middleware sits outside everything else so sandbox-subdomain
    // traffic never reaches the API router
    Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            proxy::proxy_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn version() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "v1"
    }))
}
