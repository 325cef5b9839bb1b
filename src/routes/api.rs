use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{diagnostics, health_check, ready_check};
use crate::ws::handler::websocket_handler;
use crate::AppState;

/// Create API routes
pub fn create_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/health", get(health_check))
        .route("/v1/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Full application router: API, note websocket and Swagger UI
pub fn create_app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .nest("/api", create_api_routes())
        .route("/ws/:note_id", get(websocket_handler))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityProvider;
    use crate::db::memstore::MemoryNoteStore;
    use crate::ws::{Collab, CollabSettings};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use jsonwebtoken::{encode, EncodingKey, Header};

    #[tokio::test]
    async fn serves_health_ready_and_diagnostics() {
        let collab = Collab::start(Arc::new(MemoryNoteStore::new()), CollabSettings::default());
        let state = Arc::new(AppState {
            coordinator: collab.coordinator().clone(),
            identity: IdentityProvider::new(Some("secret".to_string())),
        });
        let app = create_app(state, &[]);

        for path in ["/api/v1/health", "/api/v1/ready"] {
            let res = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "{}", path);
        }

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/diagnostics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let claims = serde_json::json!({ "sub": "ops", "exp": chrono::Utc::now().timestamp() + 600 });
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/diagnostics")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["n_conn"], 0);
        assert_eq!(json["n_notes"], 0);

        collab.shutdown().await;
    }
}
