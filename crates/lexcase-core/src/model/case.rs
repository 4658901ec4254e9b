use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::DocumentSummary;
use crate::error::{LexError, Result};

pub const MAX_TITLE_LENGTH: usize = 255;
pub const DEFAULT_CASE_TITLE: &str = "Default Case";
pub const DEFAULT_CASE_DESCRIPTION: &str = "Default case for general conversations";

/// Validate a case title: required, trimmed, bounded.
pub fn validate_case_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(LexError::InvalidInput("Title is required".into()));
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(LexError::InvalidInput(format!(
            "title exceeds maximum length of {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim tags, dropping blanks and repeats; first occurrence wins.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// A user's organizational unit grouping documents and conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: CaseStatus,
    pub owner: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    pub fn new(title: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            title: title.into(),
            description: String::new(),
            status: CaseStatus::Active,
            owner: owner.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Active,
    Closed,
    Archived,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 3] = [Self::Active, Self::Closed, Self::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            "archived" => Ok(Self::Archived),
            other => Err(format!(
                "unknown case status: '{other}' (expected 'active', 'closed', or 'archived')"
            )),
        }
    }
}

/// Listing order for case queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseOrder {
    /// Most recently created first.
    #[default]
    Newest,
    /// Insertion order (oldest first).
    Inserted,
}

/// Filter for listing a user's cases.
#[derive(Debug, Clone)]
pub struct CaseQuery {
    pub owner: String,
    pub status: Option<CaseStatus>,
    pub limit: usize,
    pub order: CaseOrder,
}

impl CaseQuery {
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            status: None,
            limit: usize::MAX,
            order: CaseOrder::Newest,
        }
    }

    pub fn with_status(mut self, status: Option<CaseStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn in_insertion_order(mut self) -> Self {
        self.order = CaseOrder::Inserted;
        self
    }
}

/// Case with its documents, as returned by the case summary tool and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub document_count: usize,
    pub documents: Vec<DocumentSummary>,
    pub tags: Vec<String>,
}

impl CaseSummary {
    pub fn new(case: &Case, documents: Vec<DocumentSummary>) -> Self {
        Self {
            id: case.id,
            title: case.title.clone(),
            description: case.description.clone(),
            status: case.status,
            created_at: case.created_at,
            updated_at: case.updated_at,
            document_count: documents.len(),
            documents,
            tags: case.tags.clone(),
        }
    }
}
