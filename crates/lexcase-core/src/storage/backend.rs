use crate::error::Result;
use crate::model::*;

/// Owner-scoped persistence for documents, cases, conversations and messages.
///
/// Every read that takes an `owner` only ever sees that owner's rows; a row
/// owned by someone else is reported as `NotFound`, never returned.
pub trait StorageBackend: Send + Sync {
    // -- Documents --

    /// Insert a document (and its embedding, if any). Returns it with its new id.
    fn insert_document(
        &self,
        document: &Document,
    ) -> impl std::future::Future<Output = Result<Document>> + Send;

    fn get_document(
        &self,
        owner: &str,
        id: i64,
    ) -> impl std::future::Future<Output = Result<Document>> + Send;

    /// Fetch the owner's documents among `ids`, ordered by id. Unknown or
    /// foreign ids are skipped.
    fn get_documents(
        &self,
        owner: &str,
        ids: &[i64],
    ) -> impl std::future::Future<Output = Result<Vec<Document>>> + Send;

    /// All of the owner's documents, newest first.
    fn list_documents(
        &self,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Document>>> + Send;

    /// The owner's documents that carry an embedding, in insertion order.
    fn embedded_documents(
        &self,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Document>>> + Send;

    /// Case-insensitive substring search over contents, description and filename.
    fn search_documents_by_text(
        &self,
        owner: &str,
        query: &str,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Document>>> + Send;

    fn delete_document(
        &self,
        owner: &str,
        id: i64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    // -- Cases --

    fn insert_case(&self, case: &Case) -> impl std::future::Future<Output = Result<Case>> + Send;

    fn get_case(
        &self,
        owner: &str,
        id: i64,
    ) -> impl std::future::Future<Output = Result<Case>> + Send;

    fn list_cases(
        &self,
        query: &CaseQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Case>>> + Send;

    /// Idempotent upsert keyed by (owner, title). Returns the case and whether
    /// it was created by this call.
    fn get_or_create_case(
        &self,
        owner: &str,
        title: &str,
        description: &str,
    ) -> impl std::future::Future<Output = Result<(Case, bool)>> + Send;

    fn update_case_status(
        &self,
        owner: &str,
        id: i64,
        status: CaseStatus,
    ) -> impl std::future::Future<Output = Result<Case>> + Send;

    /// Link the owner's documents among `document_ids` to the case. Returns the
    /// number of documents now linked that were not linked before.
    fn add_case_documents(
        &self,
        owner: &str,
        case_id: i64,
        document_ids: &[i64],
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// Documents linked to the case, newest first.
    fn case_documents(
        &self,
        owner: &str,
        case_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Document>>> + Send;

    // -- Conversations --

    fn insert_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<Conversation>> + Send;

    /// Insert a conversation titled `<title_prefix> <n>`, where n is the
    /// owner's conversation count plus one. Counting and inserting happen
    /// atomically.
    fn insert_numbered_conversation(
        &self,
        owner: &str,
        case_id: i64,
        title_prefix: &str,
    ) -> impl std::future::Future<Output = Result<Conversation>> + Send;

    fn get_conversation(
        &self,
        owner: &str,
        id: i64,
    ) -> impl std::future::Future<Output = Result<Conversation>> + Send;

    /// The owner's conversations, most recently updated first.
    fn list_conversations(
        &self,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>>> + Send;

    // -- Messages --

    /// Append a message and its document references; bumps the
    /// conversation's `updated_at`.
    fn append_message(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<Message>> + Send;

    /// Append several messages in order, all or nothing.
    fn append_messages(
        &self,
        messages: &[Message],
    ) -> impl std::future::Future<Output = Result<Vec<Message>>> + Send;

    /// Messages of a conversation, oldest first.
    fn list_messages(
        &self,
        conversation_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Message>>> + Send;
}
