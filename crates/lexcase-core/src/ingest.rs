use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{LexError, Result};
use crate::llm::{ChatMessage, ChatModel};
use crate::model::{file_extension, Document};
use crate::storage::StorageBackend;

/// Extensions accepted by single-document ingestion.
pub const SINGLE_EXTENSIONS: &[&str] = &["txt", "pdf"];

/// Extensions accepted by batch ingestion.
pub const BATCH_EXTENSIONS: &[&str] = &["pdf"];

const SUMMARY_SYSTEM_PROMPT: &str = "You are a legal document summarizer. \
     Provide concise, accurate summaries capturing key legal aspects.";

/// A raw uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Everything ingestion needs: the store, the embedder, an optional
/// summarizer model and the `[ingest]` settings.
pub struct IngestContext<'a, S, E, L> {
    pub storage: &'a S,
    pub embedder: &'a E,
    pub summarizer: Option<&'a L>,
    pub config: &'a IngestConfig,
}

// Manual impls: the borrowed fields are always copyable.
impl<S, E, L> Clone for IngestContext<'_, S, E, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, E, L> Copy for IngestContext<'_, S, E, L> {}

/// Extract plain text from an uploaded file.
///
/// `.txt` is decoded as UTF-8. `.pdf` text is extracted page by page on the
/// blocking pool and the pages joined with newlines; a panic inside the PDF
/// parser is reported as an extraction error.
pub async fn extract_text(filename: &str, bytes: &[u8]) -> Result<String> {
    match file_extension(filename).as_deref() {
        Some("txt") => String::from_utf8(bytes.to_vec())
            .map_err(|e| LexError::Extraction(format!("{filename} is not valid UTF-8: {e}"))),
        Some("pdf") => {
            let bytes = bytes.to_vec();
            let name = filename.to_string();
            tokio::task::spawn_blocking(move || {
                let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
                    .map_err(|e| LexError::Extraction(format!("failed to parse {name}: {e}")))?;
                Ok(pages.join("\n").trim().to_string())
            })
            .await
            .map_err(|e| {
                LexError::Extraction(format!("PDF extraction for {filename} aborted: {e}"))
            })?
        }
        _ => Err(LexError::Extraction(format!(
            "no text extractor for {filename}"
        ))),
    }
}

fn ensure_extension(filename: &str, allowed: &[&str]) -> Result<()> {
    match file_extension(filename) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        _ => Err(LexError::InvalidInput(format!(
            "unsupported file type for {filename} (allowed: {})",
            allowed.join(", ")
        ))),
    }
}

/// User prompt for the summarizer: filename plus the leading `char_limit`
/// characters of the contents.
pub fn summary_prompt(filename: &str, contents: &str, char_limit: usize) -> String {
    let excerpt: String = contents.chars().take(char_limit).collect();
    format!(
        "Given the following legal document, summarize in a single to three paragraphs \
         the contents of the document, capture all the necessary aspects, the title is \
         {filename} and the content is: {excerpt}"
    )
}

/// Write the raw upload under `dir`, prefixed with a timestamp so repeated
/// filenames don't collide.
async fn store_raw(dir: &Path, upload: &Upload) -> Result<PathBuf> {
    let name = Path::new(&upload.filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| LexError::InvalidInput(format!("invalid filename: {}", upload.filename)))?;

    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        LexError::Storage(format!("failed to create upload directory {}: {e}", dir.display()))
    })?;

    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%f");
    let path = dir.join(format!("{stamp}_{name}"));
    tokio::fs::write(&path, &upload.bytes).await.map_err(|e| {
        LexError::Storage(format!("failed to write upload {}: {e}", path.display()))
    })?;
    Ok(path)
}

/// Summarize and embed the document in place. Each failed step is logged
/// and leaves the corresponding fields empty.
async fn enrich<E, L>(
    document: Document,
    embedder: &E,
    summarizer: Option<&L>,
    char_limit: usize,
) -> Document
where
    E: EmbeddingProvider,
    L: ChatModel,
{
    let Some(summarizer) = summarizer else {
        tracing::warn!(
            filename = %document.filename,
            step = "summary",
            "no summarizer configured, storing document without description"
        );
        return document;
    };
    let contents = document.contents.clone().unwrap_or_default();

    let messages = [
        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(summary_prompt(&document.filename, &contents, char_limit)),
    ];
    let description = match summarizer.chat(&messages).await {
        Ok(summary) => summary.trim().to_string(),
        Err(e) => {
            tracing::warn!(
                filename = %document.filename,
                step = "summary",
                error = %e,
                "failed to summarize document"
            );
            return document;
        }
    };

    let embedding = match embedder.embed(&description).await {
        Ok(vector) => Some(vector),
        Err(e) => {
            tracing::warn!(
                filename = %document.filename,
                step = "embedding",
                error = %e,
                "failed to embed document summary"
            );
            None
        }
    };

    tracing::info!(
        filename = %document.filename,
        summarizer = summarizer.model_id(),
        embedder = embedder.model_id(),
        embedded = embedding.is_some(),
        "enriched document"
    );
    document.with_enrichment(description, embedding)
}

/// Ingest one uploaded `.txt` or `.pdf` file for `owner`.
///
/// Extraction and enrichment are best effort: the document row is persisted
/// with whatever succeeded. Fails only for a disallowed extension, an
/// unwritable upload directory, or a storage error.
pub async fn ingest_document<S, E, L>(
    ctx: IngestContext<'_, S, E, L>,
    owner: &str,
    upload: &Upload,
) -> Result<Document>
where
    S: StorageBackend,
    E: EmbeddingProvider,
    L: ChatModel,
{
    ingest_with(ctx, owner, upload, SINGLE_EXTENSIONS).await
}

async fn ingest_with<S, E, L>(
    ctx: IngestContext<'_, S, E, L>,
    owner: &str,
    upload: &Upload,
    allowed: &[&str],
) -> Result<Document>
where
    S: StorageBackend,
    E: EmbeddingProvider,
    L: ChatModel,
{
    ensure_extension(&upload.filename, allowed)?;

    let mut document = Document::new(&upload.filename, owner);
    let mut raw_path = None;
    if let Some(dir) = ctx.config.upload_dir.as_deref() {
        let path = store_raw(Path::new(dir), upload).await?;
        document = document.with_filepath(path.to_string_lossy());
        raw_path = Some(path);
    }

    match extract_text(&upload.filename, &upload.bytes).await {
        Ok(text) => document = document.with_contents(text),
        Err(e) => tracing::warn!(
            filename = %upload.filename,
            step = "extraction",
            error = %e,
            "failed to extract text"
        ),
    }

    if document.needs_enrichment() {
        document = enrich(
            document,
            ctx.embedder,
            ctx.summarizer,
            ctx.config.summary_char_limit,
        )
        .await;
    }

    let stored = match ctx.storage.insert_document(&document).await {
        Ok(stored) => stored,
        Err(e) => {
            if let Some(path) = &raw_path {
                remove_raw(path).await;
            }
            return Err(e);
        }
    };
    tracing::info!(
        document_id = stored.id,
        filename = %stored.filename,
        owner,
        has_description = stored.description.is_some(),
        "ingested document"
    );
    Ok(stored)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    PartialSuccess,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub file: String,
    pub error: String,
}

/// Result of a batch upload: what was stored and what was rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub message: String,
    pub documents: Vec<Document>,
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    fn new(documents: Vec<Document>, errors: Vec<BatchError>) -> Self {
        let total = documents.len() + errors.len();
        let status = match (documents.is_empty(), errors.is_empty()) {
            (_, true) => BatchStatus::Success,
            (false, false) => BatchStatus::PartialSuccess,
            (true, false) => BatchStatus::Error,
        };
        let message = format!("Processed {} of {total} files", documents.len());
        Self {
            status,
            message,
            documents,
            errors,
        }
    }
}

/// Ingest several `.pdf` uploads sequentially, collecting per-file errors
/// instead of stopping at the first one.
pub async fn ingest_batch<S, E, L>(
    ctx: IngestContext<'_, S, E, L>,
    owner: &str,
    uploads: &[Upload],
) -> BatchOutcome
where
    S: StorageBackend,
    E: EmbeddingProvider,
    L: ChatModel,
{
    let mut documents = Vec::new();
    let mut errors = Vec::new();

    for upload in uploads {
        match ingest_with(ctx, owner, upload, BATCH_EXTENSIONS).await {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                tracing::warn!(filename = %upload.filename, error = %e, "batch upload file rejected");
                errors.push(BatchError {
                    file: upload.filename.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    BatchOutcome::new(documents, errors)
}

/// The owner's documents, newest first.
pub async fn list_documents(storage: &impl StorageBackend, owner: &str) -> Result<Vec<Document>> {
    storage.list_documents(owner).await
}

/// Delete one of the owner's documents and, if stored, its raw file.
pub async fn delete_document(storage: &impl StorageBackend, owner: &str, id: i64) -> Result<()> {
    let document = storage.get_document(owner, id).await?;
    storage.delete_document(owner, id).await?;

    if let Some(path) = document.filepath.as_deref() {
        remove_raw(Path::new(path)).await;
    }
    tracing::info!(document_id = id, owner, "deleted document");
    Ok(())
}

async fn remove_raw(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove stored upload");
    }
}
