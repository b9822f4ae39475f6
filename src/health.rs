//! Lifecycle HTTP routes.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use tokio::sync::watch;

use crate::consumer::ConsumerState;

/// Build the router exposing `GET /health`.
pub fn routes(state: watch::Receiver<ConsumerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<watch::Receiver<ConsumerState>>) -> impl IntoResponse {
    let consumer = *state.borrow();
    Json(serde_json::json!({
        "status": "ok",
        "consumer": consumer,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    async fn get_health(router: Router) -> serde_json::Value {
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn reports_current_consumer_state() {
        let (tx, rx) = watch::channel(ConsumerState::Disconnected);
        let router = routes(rx);

        let body = get_health(router.clone()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["consumer"], "disconnected");

        tx.send_replace(ConsumerState::Consuming);
        assert_eq!(get_health(router.clone()).await["consumer"], "consuming");

        tx.send_replace(ConsumerState::ShuttingDown);
        assert_eq!(get_health(router).await["consumer"], "shutting_down");
    }
}
