use crate::error::Result;
use crate::model::*;
use crate::storage::StorageBackend;

/// Create a case for `owner`, linking those of `document_ids` the owner owns.
pub async fn create_case(
    storage: &impl StorageBackend,
    owner: &str,
    title: &str,
    description: &str,
    tags: &[String],
    document_ids: &[i64],
) -> Result<Case> {
    let title = validate_case_title(title)?;
    let case = storage
        .insert_case(
            &Case::new(title, owner)
                .with_description(description.trim())
                .with_tags(normalize_tags(tags)),
        )
        .await?;

    if !document_ids.is_empty() {
        let linked = storage
            .add_case_documents(owner, case.id, document_ids)
            .await?;
        if linked < document_ids.len() {
            tracing::warn!(
                case_id = case.id,
                requested = document_ids.len(),
                linked,
                "some documents were not linked (unknown or not owned)"
            );
        }
    }

    tracing::info!(case_id = case.id, owner, title = %case.title, "created case");
    Ok(case)
}

pub async fn get_case(storage: &impl StorageBackend, owner: &str, id: i64) -> Result<Case> {
    storage.get_case(owner, id).await
}

/// The owner's cases, newest first, optionally filtered by status.
pub async fn list_cases(
    storage: &impl StorageBackend,
    owner: &str,
    status: Option<CaseStatus>,
    limit: usize,
) -> Result<Vec<Case>> {
    storage
        .list_cases(
            &CaseQuery::for_owner(owner)
                .with_status(status)
                .with_limit(limit),
        )
        .await
}

/// Link more of the owner's documents to a case. Returns how many were newly linked.
pub async fn add_documents_to_case(
    storage: &impl StorageBackend,
    owner: &str,
    case_id: i64,
    document_ids: &[i64],
) -> Result<usize> {
    storage
        .add_case_documents(owner, case_id, document_ids)
        .await
}

pub async fn update_case_status(
    storage: &impl StorageBackend,
    owner: &str,
    case_id: i64,
    status: CaseStatus,
) -> Result<Case> {
    let case = storage.update_case_status(owner, case_id, status).await?;
    tracing::info!(case_id, owner, status = %status, "updated case status");
    Ok(case)
}

/// Documents linked to the case, newest first.
pub async fn case_documents(
    storage: &impl StorageBackend,
    owner: &str,
    case_id: i64,
) -> Result<Vec<Document>> {
    storage.case_documents(owner, case_id).await
}

pub async fn case_summary(
    storage: &impl StorageBackend,
    owner: &str,
    case_id: i64,
) -> Result<CaseSummary> {
    let case = storage.get_case(owner, case_id).await?;
    let documents = storage.case_documents(owner, case_id).await?;
    Ok(CaseSummary::new(
        &case,
        documents.iter().map(DocumentSummary::from).collect(),
    ))
}
