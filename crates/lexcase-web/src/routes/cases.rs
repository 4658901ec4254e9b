use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use lexcase_core::cases;
use lexcase_core::model::{Case, CaseStatus, CaseSummary};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/case/create", post(create_case))
        .route("/cases", get(list_cases))
        .route("/case/{id}", get(get_case))
        .route("/case/{id}/status", post(update_status))
}

#[derive(Debug, Deserialize)]
pub struct CreateCaseRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListCasesParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

fn parse_status(raw: &str) -> Result<CaseStatus, ApiError> {
    raw.parse().map_err(|e: String| ApiError::bad_request(e))
}

async fn create_case(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    payload: Result<Json<CreateCaseRequest>, JsonRejection>,
) -> Result<Json<Case>, ApiError> {
    let Json(input) = payload?;
    let case = cases::create_case(
        &state.storage,
        user.name(),
        &input.title,
        &input.description,
        &input.tags,
        &input.document_ids,
    )
    .await?;
    Ok(Json(case))
}

async fn list_cases(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    params: Result<Query<ListCasesParams>, QueryRejection>,
) -> Result<Json<Vec<Case>>, ApiError> {
    let Query(params) = params?;
    // An empty `?status=` means no filter.
    let status = match params.status.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_status(raw)?),
        _ => None,
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let cases = cases::list_cases(&state.storage, user.name(), status, limit).await?;
    Ok(Json(cases))
}

async fn get_case(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<CaseSummary>, ApiError> {
    let summary = cases::case_summary(&state.storage, user.name(), id).await?;
    Ok(Json(summary))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Case>, ApiError> {
    let Json(input) = payload?;
    let status = parse_status(&input.status)?;
    let case = cases::update_case_status(&state.storage, user.name(), id, status).await?;
    Ok(Json(case))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use super::super::test_support::get;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateCaseRequest = serde_json::from_str(r#"{"title": "Doe v. Roe"}"#).unwrap();
        assert_eq!(req.title, "Doe v. Roe");
        assert!(req.description.is_empty());
        assert!(req.document_ids.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_get_case() {
        let app = app(test_state());
        let resp = send(&app, post_files("/document", &[("brief.txt", b"Brief.")])).await;
        let doc_id = body_json(resp).await["id"].as_i64().unwrap();

        let resp = send(
            &app,
            post_json(
                "/case/create",
                json!({
                    "title": "Doe v. Roe",
                    "description": "Tenancy",
                    "tags": ["tenancy", " tenancy ", "appeal"],
                    "document_ids": [doc_id, 9999],
                }),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let case = body_json(resp).await;
        assert_eq!(case["status"], "active");
        let id = case["id"].as_i64().unwrap();

        let resp = send(&app, get(&format!("/case/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let summary = body_json(resp).await;
        assert_eq!(summary["title"], "Doe v. Roe");
        assert_eq!(summary["document_count"], 1);
        assert_eq!(summary["documents"][0]["id"], doc_id);
        assert_eq!(summary["tags"], json!(["tenancy", "appeal"]));
    }

    #[tokio::test]
    async fn test_create_case_validation() {
        let app = app(test_state());
        let resp = send(&app, post_json("/case/create", json!({"title": "  "}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, post_json("/case/create", json!({"description": "no title"}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["status"], "error");
    }

    #[tokio::test]
    async fn test_status_update_and_filter() {
        let app = app(test_state());
        let resp = send(&app, post_json("/case/create", json!({"title": "Old matter"}))).await;
        let id = body_json(resp).await["id"].as_i64().unwrap();
        send(&app, post_json("/case/create", json!({"title": "New matter"}))).await;

        let resp = send(
            &app,
            post_json(&format!("/case/{id}/status"), json!({"status": "closed"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "closed");

        let closed = body_json(send(&app, get("/cases?status=closed")).await).await;
        assert_eq!(closed.as_array().unwrap().len(), 1);
        assert_eq!(closed[0]["id"], id);

        let all = body_json(send(&app, get("/cases?status=&limit=10")).await).await;
        assert_eq!(all.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_status_is_bad_request() {
        let app = app(test_state());
        let resp = send(&app, post_json("/case/create", json!({"title": "Matter"}))).await;
        let id = body_json(resp).await["id"].as_i64().unwrap();

        let resp = send(
            &app,
            post_json(&format!("/case/{id}/status"), json!({"status": "pending"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, get("/cases?status=pending")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_case_of_another_user_is_not_found() {
        let app = app(test_state());
        let resp = send(&app, post_json("/case/create", json!({"title": "Private"}))).await;
        let id = body_json(resp).await["id"].as_i64().unwrap();

        let req = axum::http::Request::builder()
            .uri(format!("/case/{id}"))
            .header("x-lexcase-user", "mallory")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
