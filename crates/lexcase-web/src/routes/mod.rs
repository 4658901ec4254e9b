pub mod cases;
pub mod chat;
pub mod documents;
pub mod search;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use lexcase_core::llm::ChatModel;

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(documents::routes())
        .merge(cases::routes())
        .merge(search::routes())
        .merge(chat::routes())
        .fallback(not_found)
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state.storage.ping().await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "database": if db_ok { "connected" } else { "unavailable" },
            "embedding_provider": state.embedding.provider_name(),
            "chat_model": state.llm.as_ref().map(|m| m.model_id()),
            "summary_model": state.summarizer.as_ref().map(|m| m.model_id()),
        })),
    )
}

async fn not_found() -> ApiError {
    ApiError::not_found("No such endpoint")
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn test_health_reports_providers() {
        let app = app(test_state());
        let resp = send(
            &app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["embedding_provider"], "hash");
        assert!(json["chat_model"].is_null());
    }

    #[tokio::test]
    async fn test_missing_user_header_is_unauthorized() {
        let app = app(test_state());
        let resp = send(
            &app,
            Request::builder().uri("/documents").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["status"], "error");

        let resp = send(
            &app,
            Request::builder()
                .uri("/documents")
                .header("x-lexcase-user", "   ")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = app(test_state());
        let resp = send(&app, get("/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["status"], "error");
    }
}
