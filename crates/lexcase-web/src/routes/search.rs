use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use lexcase_core::model::{Case, DocumentSummary};
use lexcase_core::similarity;
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

const MAX_SEARCH_LIMIT: usize = 100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search/documents", get(search_documents))
        .route("/search/cases", get(search_cases))
}

/// How `/search/documents` matches: by embedding similarity or by keyword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Semantic,
    Text,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
    #[serde(default)]
    pub mode: SearchMode,
}

impl SearchParams {
    fn query(&self) -> Result<&str, ApiError> {
        let q = self.q.trim();
        if q.is_empty() {
            return Err(ApiError::bad_request("Query is required"));
        }
        Ok(q)
    }

    fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, MAX_SEARCH_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentHit {
    #[serde(flatten)]
    pub document: DocumentSummary,
    /// Absent for keyword matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct CaseHit {
    #[serde(flatten)]
    pub case: Case,
    pub score: f32,
}

async fn search_documents(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<DocumentHit>>, ApiError> {
    let Query(params) = params?;
    let limit = params.limit_or(state.config.retrieval.default_limit);
    let query = params.query()?;

    if params.mode == SearchMode::Text {
        let docs =
            similarity::search_documents_by_text(&state.storage, user.name(), query, limit).await?;
        return Ok(Json(
            docs.iter()
                .map(|doc| DocumentHit {
                    document: DocumentSummary::from(doc),
                    score: None,
                })
                .collect(),
        ));
    }

    let hits = similarity::search_documents_or_empty(
        &state.storage,
        &state.embedding,
        user.name(),
        query,
        limit,
    )
    .await;

    Ok(Json(
        hits.into_iter()
            .map(|(doc, score)| DocumentHit {
                document: DocumentSummary::from(&doc),
                score: Some(score),
            })
            .collect(),
    ))
}

async fn search_cases(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<CaseHit>>, ApiError> {
    let Query(params) = params?;
    let limit = params.limit_or(state.config.retrieval.case_limit);

    let hits = similarity::find_similar_cases_or_empty(
        &state.storage,
        &state.embedding,
        user.name(),
        params.query()?,
        limit,
    )
    .await;

    Ok(Json(
        hits.into_iter()
            .map(|(case, score)| CaseHit { case, score })
            .collect(),
    ))
}
