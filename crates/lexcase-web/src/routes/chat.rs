use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use lexcase_core::conversation::{self, ChatContext, ChatOverview, ChatReply};
use lexcase_core::model::{Conversation, MessageView};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", get(open_chat))
        .route("/chat/send", post(send_message))
        .route("/chat/new", post(new_conversation))
        .route("/chat/{id}", get(get_conversation))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: i64,
    #[serde(default)]
    pub message: String,
}

async fn open_chat(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<ChatOverview>, ApiError> {
    let overview = conversation::open_chat(&state.storage, user.name()).await?;
    Ok(Json(overview))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(input) = payload?;
    let model = state
        .llm
        .as_ref()
        .ok_or_else(|| ApiError::internal("No chat model is configured"))?;

    let ctx = ChatContext {
        storage: &state.storage,
        embedder: &state.embedding,
        model,
        config: &state.config.orchestrator,
    };
    let reply =
        conversation::send_message(&ctx, user.name(), input.conversation_id, &input.message)
            .await?;
    Ok(Json(reply))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = conversation::get_conversation(&state.storage, user.name(), id).await?;
    Ok(Json(messages))
}

async fn new_conversation(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Conversation>, ApiError> {
    let created = conversation::new_conversation(&state.storage, user.name()).await?;
    Ok(Json(created))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-lexcase-user", USER)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_chat_creates_default_case_once() {
        let app = app(test_state());
        let first = body_json(send(&app, get("/chat")).await).await;
        assert_eq!(first["case"]["title"], "Default Case");
        assert!(first["conversation"]["title"]
            .as_str()
            .unwrap()
            .starts_with("Legal Consultation - "));

        let second = body_json(send(&app, get("/chat")).await).await;
        assert_eq!(first["case"]["id"], second["case"]["id"]);
        assert_eq!(first["conversation"]["id"], second["conversation"]["id"]);
    }

    #[tokio::test]
    async fn test_new_conversation_is_numbered() {
        let app = app(test_state());
        let resp = send(&app, post_empty("/chat/new")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["title"], "New Conversation 1");

        let second = body_json(send(&app, post_empty("/chat/new")).await).await;
        assert_eq!(second["title"], "New Conversation 2");
    }

    #[tokio::test]
    async fn test_send_message_end_to_end() {
        let app = app(state_with_llm(&mock_openai().await));
        let resp = send(&app, post_files("/document", &[("lease.txt", b"Deposit terms.")])).await;
        let doc_id = body_json(resp).await["id"].as_i64().unwrap();
        let conversation = body_json(send(&app, post_empty("/chat/new")).await).await;
        let id = conversation["id"].as_i64().unwrap();

        let resp = send(
            &app,
            post_json(
                "/chat/send",
                json!({"conversation_id": id, "message": "When is my deposit returned?"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let reply = body_json(resp).await;
        assert_eq!(reply["content"], ANSWER);
        // The expert's answer closes the exchange without the token.
        assert_eq!(reply["agent_messages"].as_array().unwrap().len(), 2);
        assert_eq!(reply["agent_messages"][1]["sender"], "LegalExpert");
        assert_eq!(reply["referenced_documents"][0]["id"], doc_id);
        assert_eq!(reply["referenced_documents"][0]["filename"], "lease.txt");

        let history = body_json(send(&app, get(&format!("/chat/{id}"))).await).await;
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0]["message_type"], "user");
        assert_eq!(history[2]["message_type"], "assistant");
        assert_eq!(history[2]["content"], ANSWER);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_and_not_stored() {
        let app = app(state_with_llm("http://127.0.0.1:9"));
        let conversation = body_json(send(&app, post_empty("/chat/new")).await).await;
        let id = conversation["id"].as_i64().unwrap();

        let resp = send(
            &app,
            post_json("/chat/send", json!({"conversation_id": id, "message": "   "})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["status"], "error");

        let history = body_json(send(&app, get(&format!("/chat/{id}"))).await).await;
        assert!(history.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_of_another_user_is_not_found() {
        let app = app(state_with_llm("http://127.0.0.1:9"));
        let conversation = body_json(send(&app, post_empty("/chat/new")).await).await;
        let id = conversation["id"].as_i64().unwrap();

        let req = Request::builder()
            .uri(format!("/chat/{id}"))
            .header("x-lexcase-user", "mallory")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method("POST")
            .uri("/chat/send")
            .header("x-lexcase-user", "mallory")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"conversation_id": id, "message": "hi"}).to_string(),
            ))
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_without_chat_model_is_server_error() {
        let app = app(test_state());
        let conversation = body_json(send(&app, post_empty("/chat/new")).await).await;
        let resp = send(
            &app,
            post_json(
                "/chat/send",
                json!({"conversation_id": conversation["id"], "message": "hi"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
