use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded document together with whatever enrichment succeeded.
///
/// `description` and `embedding` are generated together during ingestion;
/// an embedding without a description never exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub filepath: Option<String>,
    pub contents: Option<String>,
    pub description: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A not-yet-persisted document. The store assigns `id` on insert.
    pub fn new(filename: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            filename: filename.into(),
            filepath: None,
            contents: None,
            description: None,
            embedding: None,
            owner: owner.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_filepath(mut self, path: impl Into<String>) -> Self {
        self.filepath = Some(path.into());
        self
    }

    pub fn with_contents(mut self, contents: impl Into<String>) -> Self {
        self.contents = Some(contents.into());
        self
    }

    /// Attach a summary and, optionally, the embedding generated from it.
    pub fn with_enrichment(mut self, description: String, embedding: Option<Vec<f32>>) -> Self {
        self.description = Some(description);
        self.embedding = embedding;
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Whether ingestion should still ask the provider for a summary/embedding.
    pub fn needs_enrichment(&self) -> bool {
        let has_text = self
            .contents
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        has_text && (self.description.is_none() || !self.has_embedding())
    }

    /// Lower-cased extension of the filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.filename)
    }
}

/// Lower-cased extension of `filename`, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Compact document view used in API responses and tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: i64,
    pub filename: String,
    pub description: Option<String>,
}

impl From<&Document> for DocumentRef {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            description: doc.description.clone(),
        }
    }
}

/// Document listing entry with creation time and enrichment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub filename: String,
    pub description: Option<String>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            description: doc.description.clone(),
            has_embedding: doc.has_embedding(),
            created_at: doc.created_at,
        }
    }
}
