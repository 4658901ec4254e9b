use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use lexcase_core::embedding::EmbeddingService;
use lexcase_core::ingest::{self, BatchOutcome, IngestContext, Upload};
use lexcase_core::llm::LlmService;
use lexcase_core::model::{Document, DocumentSummary};
use lexcase_core::storage::SqliteStorage;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

/// Uploads are buffered in memory before extraction.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload_batch))
        .route("/document", post(upload_document))
        .route("/documents", get(list_documents))
        .route("/document/{id}", delete(delete_document))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

fn ingest_context(state: &AppState) -> IngestContext<'_, SqliteStorage, EmbeddingService, LlmService> {
    IngestContext {
        storage: &state.storage,
        embedder: &state.embedding,
        summarizer: state.summarizer.as_ref(),
        config: &state.config.ingest,
    }
}

/// Every file part of the form, in order. Parts without a filename are
/// ordinary form fields and are skipped.
async fn read_uploads(multipart: &mut Multipart) -> Result<Vec<Upload>, ApiError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        uploads.push(Upload::new(filename, bytes.to_vec()));
    }
    Ok(uploads)
}

async fn upload_batch(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<BatchOutcome>, ApiError> {
    let uploads = read_uploads(&mut multipart).await?;
    if uploads.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }

    let outcome = ingest::ingest_batch(ingest_context(&state), user.name(), &uploads).await;
    Ok(Json(outcome))
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<Document>, ApiError> {
    let upload = read_uploads(&mut multipart)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::bad_request("No file provided"))?;

    let document = ingest::ingest_document(ingest_context(&state), user.name(), &upload).await?;
    Ok(Json(document))
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let documents = ingest::list_documents(&state.storage, user.name()).await?;
    Ok(Json(documents.iter().map(DocumentSummary::from).collect()))
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ingest::delete_document(&state.storage, user.name(), id).await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Document deleted successfully",
    })))
}
