// Module: http
// WHIP ingest, WebSocket signaling and the demo index page

pub mod error;
pub mod websocket;
pub mod whip;

use axum::{
    http::{header, HeaderMap},
    response::Html,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use streamcast_sfu::{Broadcaster, Config};

pub use error::{AppError, AppResult};

const INDEX_HTML: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/index.html"));

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub config: Arc<Config>,
}

/// Create the HTTP router with all routes
pub fn create_router(broadcaster: Arc<Broadcaster>, config: Arc<Config>) -> Router {
    let state = AppState {
        broadcaster,
        config,
    };

    Router::new()
        .route("/", get(index))
        .route("/websocket", get(websocket::websocket_handler))
        .route("/whip", post(whip::whip_create))
        .route("/whip/:id", delete(whip::whip_delete))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Demo page, with the signaling URL pointed back at this host.
async fn index(headers: HeaderMap) -> Html<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost:8080");
    Html(INDEX_HTML.replace("__SIGNAL_URL__", &format!("ws://{host}/websocket")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use streamcast_sfu::DistributionPolicy;
    use tower::ServiceExt;

    fn test_router() -> (Router, Arc<Broadcaster>) {
        let broadcaster = Broadcaster::new(DistributionPolicy::RoundRobin);
        let router = create_router(Arc::clone(&broadcaster), Arc::new(Config::default()));
        (router, broadcaster)
    }

    #[tokio::test]
    async fn test_whip_rejects_wrong_content_type() {
        let (router, broadcaster) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/whip")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("v=0"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(broadcaster.publisher_count().await, 0);
    }

    #[tokio::test]
    async fn test_whip_rejects_missing_content_type() {
        let (router, broadcaster) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/whip")
                    .body(Body::from("v=0"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(broadcaster.publisher_count().await, 0);
    }

    #[tokio::test]
    async fn test_whip_delete_unknown_id() {
        let (router, _broadcaster) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/whip/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_whip_delete_unparseable_id() {
        let (router, _broadcaster) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/whip/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_embeds_signal_url() {
        let (router, _broadcaster) = test_router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::HOST, "example.test:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains("ws://example.test:8080/websocket"));
    }
}
