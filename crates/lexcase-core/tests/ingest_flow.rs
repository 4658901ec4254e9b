//! Ingestion against in-memory SQLite with scripted summarizers.

mod common;

use common::{ingest_context, storage, DownModel, FailingEmbedder, RoleScripted, SUMMARY};
use lexcase_core::config::IngestConfig;
use lexcase_core::embedding::HashEmbeddingProvider;
use lexcase_core::error::LexError;
use lexcase_core::ingest::{delete_document, ingest_batch, ingest_document, list_documents, BatchStatus, Upload};
use lexcase_core::similarity::search_documents;

#[tokio::test]
async fn test_batch_rejects_non_pdf_and_keeps_the_rest() {
    let s = storage();
    let model = RoleScripted::new();
    let embedder = HashEmbeddingProvider::new();
    let config = IngestConfig::default();

    let uploads = [
        Upload::new("notes.txt", "plain text"),
        Upload::new("brief.pdf", b"not really a pdf".to_vec()),
        Upload::new("motion.pdf", b"also not a pdf".to_vec()),
    ];
    let outcome = ingest_batch(
        ingest_context(&s, &embedder, Some(&model), &config),
        "alice",
        &uploads,
    )
    .await;

    assert_eq!(outcome.status, BatchStatus::PartialSuccess);
    assert_eq!(outcome.message, "Processed 2 of 3 files");
    assert_eq!(outcome.documents.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].file, "notes.txt");
    assert_eq!(list_documents(&s, "alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_embedding_failure_still_persists_summary() {
    let s = storage();
    let model = RoleScripted::new();
    let config = IngestConfig::default();

    let doc = ingest_document(
        ingest_context(&s, &FailingEmbedder, Some(&model), &config),
        "alice",
        &Upload::new("lease.txt", "The tenant pays rent monthly."),
    )
    .await
    .unwrap();

    assert_eq!(doc.description.as_deref(), Some(SUMMARY));
    assert!(!doc.has_embedding());

    let hits = search_documents(&s, &HashEmbeddingProvider::new(), "alice", "rent", 10)
        .await
        .unwrap();
    assert!(hits.is_empty(), "unembedded documents are never ranked");
}

#[tokio::test]
async fn test_summarizer_failure_still_persists_contents() {
    let s = storage();
    let embedder = HashEmbeddingProvider::new();
    let config = IngestConfig::default();

    let doc = ingest_document(
        ingest_context(&s, &embedder, Some(&DownModel), &config),
        "alice",
        &Upload::new("lease.txt", "The tenant pays rent monthly."),
    )
    .await
    .unwrap();

    assert_eq!(doc.contents.as_deref(), Some("The tenant pays rent monthly."));
    assert!(doc.description.is_none());
    assert!(!doc.has_embedding());
}

#[tokio::test]
async fn test_stored_upload_is_removed_with_document() {
    let dir = std::env::temp_dir().join(format!(
        "lexcase-ingest-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let s = storage();
    let embedder = HashEmbeddingProvider::new();
    let config = IngestConfig {
        upload_dir: Some(dir.to_string_lossy().into_owned()),
        ..IngestConfig::default()
    };

    let doc = ingest_document(
        ingest_context(&s, &embedder, None::<&RoleScripted>, &config),
        "alice",
        &Upload::new("memo.txt", "Call the client."),
    )
    .await
    .unwrap();
    let path = doc.filepath.clone().unwrap();
    assert!(std::path::Path::new(&path).exists());
    assert!(doc.description.is_none(), "no summarizer, no description");

    let err = delete_document(&s, "bob", doc.id).await.unwrap_err();
    assert!(matches!(err, LexError::NotFound(_)));
    assert!(std::path::Path::new(&path).exists());

    delete_document(&s, "alice", doc.id).await.unwrap();
    assert!(!std::path::Path::new(&path).exists());
    assert!(list_documents(&s, "alice").await.unwrap().is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}
