use axum::{http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod events;
pub mod extract;
pub mod karigars;
pub mod metrics;
pub mod middleware;
pub mod state;
pub mod stones;
pub mod work_orders;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
            axum::http::HeaderName::from_static(middleware::auth::USER_HEADER),
            axum::http::HeaderName::from_static(middleware::auth::ROLE_HEADER),
        ]);

    let v1 = Router::new()
        .merge(work_orders::routes())
        .merge(karigars::routes())
        .merge(stones::routes())
        .merge(events::routes())
        .route_layer(axum::middleware::from_fn(middleware::identity_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(v1)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
