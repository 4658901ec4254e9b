use crate::embedding::EmbeddingProvider;
use crate::error::{LexError, Result};
use crate::model::{Case, CaseQuery, Document};
use crate::storage::StorageBackend;

/// Cosine similarity of two vectors, clamped to [-1, 1].
///
/// Returns 0.0 for empty inputs, mismatched lengths, or a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Sort `(item, score)` pairs by score, highest first. Equal scores keep
/// their input order.
pub fn rank_descending<T>(mut scored: Vec<(T, f32)>) -> Vec<(T, f32)> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

async fn embed_query(embedder: &impl EmbeddingProvider, query: &str) -> Result<Vec<f32>> {
    embedder
        .embed(query)
        .await
        .map_err(|e| LexError::Retrieval(format!("failed to embed query: {e}")))
}

/// Score a document against the query vector, skipping vectors of the wrong length.
fn score_document(doc: &Document, query: &[f32]) -> Option<f32> {
    let embedding = doc.embedding.as_deref().filter(|e| !e.is_empty())?;
    if embedding.len() != query.len() {
        tracing::warn!(
            document_id = doc.id,
            expected = query.len(),
            actual = embedding.len(),
            "skipping document with mismatched embedding length"
        );
        return None;
    }
    Some(cosine_similarity(embedding, query))
}

/// Rank the owner's embedded documents by similarity to `query`.
///
/// The query is embedded once. Documents without an embedding are never
/// returned.
pub async fn search_documents(
    storage: &impl StorageBackend,
    embedder: &impl EmbeddingProvider,
    owner: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<(Document, f32)>> {
    let query_vec = embed_query(embedder, query).await?;
    let documents = storage.embedded_documents(owner).await?;

    let scored: Vec<(Document, f32)> = documents
        .into_iter()
        .filter_map(|doc| score_document(&doc, &query_vec).map(|s| (doc, s)))
        .collect();

    let mut ranked = rank_descending(scored);
    ranked.truncate(limit);
    tracing::debug!(owner, hits = ranked.len(), "document similarity search");
    Ok(ranked)
}

/// [`search_documents`] for callers whose flow must not fail on retrieval.
pub async fn search_documents_or_empty(
    storage: &impl StorageBackend,
    embedder: &impl EmbeddingProvider,
    owner: &str,
    query: &str,
    limit: usize,
) -> Vec<(Document, f32)> {
    match search_documents(storage, embedder, owner, query, limit).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(owner, error = %e, "document search failed, returning no results");
            Vec::new()
        }
    }
}

/// Keyword search over the owner's documents: case-insensitive substring
/// match on contents, description or filename, newest first. Unembedded
/// documents are included.
pub async fn search_documents_by_text(
    storage: &impl StorageBackend,
    owner: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<Document>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(LexError::InvalidInput("Query is required".into()));
    }
    let hits = storage.search_documents_by_text(owner, query, limit).await?;
    tracing::debug!(owner, hits = hits.len(), "text search");
    Ok(hits)
}

/// Rank the owner's cases by the mean similarity of their embedded documents.
///
/// Cases are visited in insertion order so ties keep that order. Cases with
/// no embedded documents are left out.
pub async fn find_similar_cases(
    storage: &impl StorageBackend,
    embedder: &impl EmbeddingProvider,
    owner: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<(Case, f32)>> {
    let query_vec = embed_query(embedder, query).await?;
    let cases = storage
        .list_cases(&CaseQuery::for_owner(owner).in_insertion_order())
        .await?;

    let mut scored = Vec::new();
    for case in cases {
        let documents = storage.case_documents(owner, case.id).await?;
        let scores: Vec<f32> = documents
            .iter()
            .filter_map(|doc| score_document(doc, &query_vec))
            .collect();
        if scores.is_empty() {
            continue;
        }
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        scored.push((case, mean));
    }

    let mut ranked = rank_descending(scored);
    ranked.truncate(limit);
    tracing::debug!(owner, hits = ranked.len(), "case similarity search");
    Ok(ranked)
}

/// [`find_similar_cases`] for callers whose flow must not fail on retrieval.
pub async fn find_similar_cases_or_empty(
    storage: &impl StorageBackend,
    embedder: &impl EmbeddingProvider,
    owner: &str,
    query: &str,
    limit: usize,
) -> Vec<(Case, f32)> {
    match find_similar_cases(storage, embedder, owner, query, limit).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(owner, error = %e, "case search failed, returning no results");
            Vec::new()
        }
    }
}
