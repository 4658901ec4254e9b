use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::agents::{Orchestrator, Role, Toolset, Transcript};
use crate::config::OrchestratorConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{LexError, Result};
use crate::llm::ChatModel;
use crate::model::*;
use crate::storage::StorageBackend;

const NO_RESPONSE: &str = "No response was generated.";

/// Find or create the owner's `Default Case`.
pub async fn get_or_create_default_case(storage: &impl StorageBackend, owner: &str) -> Result<Case> {
    let (case, created) = storage
        .get_or_create_case(owner, DEFAULT_CASE_TITLE, DEFAULT_CASE_DESCRIPTION)
        .await?;
    if created {
        tracing::info!(case_id = case.id, owner, "created default case");
    }
    Ok(case)
}

/// State needed to render the chat screen.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOverview {
    pub case: Case,
    pub conversation: Conversation,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<MessageView>,
}

/// The default case, the owner's most recently updated conversation (or a
/// fresh consultation), all their conversations and the current history.
pub async fn open_chat(storage: &impl StorageBackend, owner: &str) -> Result<ChatOverview> {
    let case = get_or_create_default_case(storage, owner).await?;

    let mut conversations = storage.list_conversations(owner).await?;
    let conversation = match conversations.first() {
        Some(latest) => latest.clone(),
        None => {
            let title = format!(
                "Legal Consultation - {}",
                Utc::now().format("%b %d, %Y %I:%M %p")
            );
            let created = storage
                .insert_conversation(&Conversation::new(title, case.id, owner))
                .await?;
            tracing::info!(conversation_id = created.id, owner, "started consultation");
            conversations.push(created.clone());
            created
        }
    };

    let messages = storage
        .list_messages(conversation.id)
        .await?
        .iter()
        .map(MessageView::from)
        .collect();

    Ok(ChatOverview {
        case,
        conversation,
        conversations,
        messages,
    })
}

/// Start a new conversation in the owner's default case.
pub async fn new_conversation(storage: &impl StorageBackend, owner: &str) -> Result<Conversation> {
    let case = get_or_create_default_case(storage, owner).await?;
    let conversation = storage
        .insert_numbered_conversation(owner, case.id, "New Conversation")
        .await?;
    tracing::info!(conversation_id = conversation.id, owner, "created conversation");
    Ok(conversation)
}

/// Ordered message history of one of the owner's conversations.
pub async fn get_conversation(
    storage: &impl StorageBackend,
    owner: &str,
    id: i64,
) -> Result<Vec<MessageView>> {
    let conversation = storage.get_conversation(owner, id).await?;
    Ok(storage
        .list_messages(conversation.id)
        .await?
        .iter()
        .map(MessageView::from)
        .collect())
}

/// Agent contribution as returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMessage {
    pub sender: String,
    pub role: MessageRole,
    pub content: String,
    pub documents: Vec<i64>,
}

/// Response to a chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub content: String,
    pub agent_messages: Vec<AgentMessage>,
    pub referenced_documents: Vec<DocumentRef>,
}

/// Messages to persist for an exchange, plus its final answer and the
/// documents it referenced.
#[derive(Debug, Clone)]
pub struct AssembledOutput {
    pub messages: Vec<Message>,
    pub final_answer: Option<String>,
    /// Deduplicated, first-seen order.
    pub referenced_documents: Vec<i64>,
}

/// Turn a transcript into conversation messages.
///
/// The opening user turn and turns with no content are skipped.
/// `LegalExpert` turns become assistant messages; every other role's turns
/// are system messages.
pub fn assemble_output(conversation_id: i64, transcript: &Transcript) -> AssembledOutput {
    let mut messages = Vec::new();
    let mut referenced = Vec::new();
    let mut final_answer = None;
    let mut last_other = None;

    for turn in transcript.turns().iter().skip(1) {
        let role = if turn.role == Role::LegalExpert {
            MessageRole::Assistant
        } else {
            MessageRole::System
        };

        for id in &turn.documents {
            if !referenced.contains(id) {
                referenced.push(*id);
            }
        }

        if turn.content.is_empty() {
            continue;
        }

        if turn.role == Role::LegalExpert {
            final_answer = Some(turn.content.clone());
        }
        if turn.role.is_agent() {
            last_other = Some(turn.content.clone());
        }

        messages.push(
            Message::new(conversation_id, role, &turn.content)
                .with_metadata(json!({
                    "sender": turn.role.name(),
                    "role": role,
                    "documents": turn.documents,
                    "tool_calls": turn.tool_calls,
                }))
                .with_documents(turn.documents.clone()),
        );
    }

    AssembledOutput {
        messages,
        final_answer: final_answer.or(last_other),
        referenced_documents: referenced,
    }
}

/// What the chat flow needs besides the store: embedder, chat model and
/// orchestrator limits.
pub struct ChatContext<'a, S, E, M> {
    pub storage: &'a S,
    pub embedder: &'a E,
    pub model: &'a M,
    pub config: &'a OrchestratorConfig,
}

/// Handle a user message: persist it, run the consultation, persist the
/// agent messages and return the final answer with referenced documents.
pub async fn send_message<S, E, M>(
    ctx: &ChatContext<'_, S, E, M>,
    owner: &str,
    conversation_id: i64,
    content: &str,
) -> Result<ChatReply>
where
    S: StorageBackend,
    E: EmbeddingProvider,
    M: ChatModel,
{
    let content = content.trim();
    if content.is_empty() {
        return Err(LexError::InvalidInput("Message content is required".into()));
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(LexError::InvalidInput(format!(
            "message exceeds maximum length of {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    let conversation = ctx.storage.get_conversation(owner, conversation_id).await?;
    ctx.storage
        .append_message(&Message::new(conversation.id, MessageRole::User, content))
        .await?;

    let orchestrator = Orchestrator::new(
        ctx.model,
        Toolset::new(ctx.storage, ctx.embedder, owner),
        ctx.config,
    );
    let transcript = orchestrator.run(content).await?;
    let output = assemble_output(conversation.id, &transcript);

    let agent_messages: Vec<AgentMessage> = ctx
        .storage
        .append_messages(&output.messages)
        .await?
        .into_iter()
        .map(|stored| AgentMessage {
            sender: stored.sender().unwrap_or_default().to_string(),
            role: stored.role,
            content: stored.content,
            documents: stored.referenced_documents,
        })
        .collect();

    let referenced_documents =
        referenced_refs(ctx.storage, owner, &output.referenced_documents).await?;

    tracing::info!(
        conversation_id = conversation.id,
        owner,
        agent_messages = agent_messages.len(),
        referenced = referenced_documents.len(),
        "chat message handled"
    );

    Ok(ChatReply {
        content: output
            .final_answer
            .unwrap_or_else(|| NO_RESPONSE.to_string()),
        agent_messages,
        referenced_documents,
    })
}

/// Resolve document ids to refs, keeping the given order and dropping ids
/// that no longer resolve.
async fn referenced_refs(
    storage: &impl StorageBackend,
    owner: &str,
    ids: &[i64],
) -> Result<Vec<DocumentRef>> {
    let by_id: HashMap<i64, DocumentRef> = storage
        .get_documents(owner, ids)
        .await?
        .iter()
        .map(|d| (d.id, DocumentRef::from(d)))
        .collect();
    Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ToolInvocation, Turn};
    use crate::storage::SqliteStorage;

    fn turn(role: Role, content: &str, documents: Vec<i64>) -> Turn {
        Turn {
            role,
            content: content.into(),
            documents,
            tool_calls: Vec::new(),
        }
    }

    fn transcript(turns: Vec<Turn>) -> Transcript {
        Transcript::from(turns)
    }

    #[test]
    fn test_assemble_classifies_and_skips_opening() {
        let t = transcript(vec![
            turn(Role::UserProxy, "question", vec![]),
            turn(Role::Planner, "Routing to LegalExpert.", vec![]),
            turn(Role::LegalExpert, "answer", vec![3, 1]),
            turn(Role::Critic, "fine", vec![1, 2]),
        ]);
        let out = assemble_output(9, &t);

        let roles: Vec<MessageRole> = out.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::Assistant, MessageRole::System]
        );
        assert_eq!(out.messages[1].sender(), Some("LegalExpert"));
        assert_eq!(out.messages[1].referenced_documents, vec![3, 1]);
        assert_eq!(out.final_answer.as_deref(), Some("answer"));
        assert_eq!(out.referenced_documents, vec![3, 1, 2]);
        assert!(out.messages.iter().all(|m| m.conversation_id == 9));
    }

    #[test]
    fn test_final_answer_falls_back_to_last_agent_message() {
        let t = transcript(vec![
            turn(Role::UserProxy, "question", vec![]),
            turn(Role::Planner, "Routing to Critic.", vec![]),
            turn(Role::Critic, "needs more facts", vec![]),
        ]);
        let out = assemble_output(1, &t);
        assert_eq!(out.final_answer.as_deref(), Some("needs more facts"));
    }

    #[test]
    fn test_empty_turns_are_not_persisted() {
        let t = transcript(vec![
            turn(Role::UserProxy, "question", vec![]),
            turn(Role::Planner, "Routing to LegalExpert.", vec![]),
            turn(Role::LegalExpert, "answer", vec![4]),
            turn(Role::Planner, "", vec![]),
        ]);
        let out = assemble_output(1, &t);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.final_answer.as_deref(), Some("answer"));
        assert_eq!(out.referenced_documents, vec![4]);
    }

    #[test]
    fn test_metadata_carries_tool_calls() {
        let mut expert = turn(Role::LegalExpert, "answer", vec![5]);
        expert.tool_calls.push(ToolInvocation {
            name: "search_documents".into(),
            arguments: json!({"query": "lease"}),
            ok: true,
        });
        let t = transcript(vec![turn(Role::UserProxy, "q", vec![]), expert]);
        let out = assemble_output(1, &t);
        let meta = out.messages[0].metadata.as_ref().unwrap();
        assert_eq!(meta["role"], "assistant");
        assert_eq!(meta["documents"], json!([5]));
        assert_eq!(meta["tool_calls"][0]["name"], "search_documents");
    }

    #[tokio::test]
    async fn test_default_case_is_idempotent() {
        let s = SqliteStorage::open_in_memory().unwrap();
        let a = get_or_create_default_case(&s, "alice").await.unwrap();
        let b = get_or_create_default_case(&s, "alice").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.title, DEFAULT_CASE_TITLE);
        assert_eq!(a.description, DEFAULT_CASE_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_open_chat_reuses_latest_conversation() {
        let s = SqliteStorage::open_in_memory().unwrap();
        let first = open_chat(&s, "alice").await.unwrap();
        assert!(first.conversation.title.starts_with("Legal Consultation - "));
        assert_eq!(first.conversations.len(), 1);
        assert!(first.messages.is_empty());

        let again = open_chat(&s, "alice").await.unwrap();
        assert_eq!(again.conversation.id, first.conversation.id);
        assert_eq!(again.case.id, first.case.id);
    }

    #[tokio::test]
    async fn test_new_conversation_numbering() {
        let s = SqliteStorage::open_in_memory().unwrap();
        let a = new_conversation(&s, "alice").await.unwrap();
        let b = new_conversation(&s, "alice").await.unwrap();
        assert_eq!(a.title, "New Conversation 1");
        assert_eq!(b.title, "New Conversation 2");
        assert_eq!(a.case_id, b.case_id);

        let c = new_conversation(&s, "bob").await.unwrap();
        assert_eq!(c.title, "New Conversation 1");
    }

    #[tokio::test]
    async fn test_concurrent_new_conversations_get_distinct_titles() {
        let s = SqliteStorage::open_in_memory().unwrap();
        let (a, b, c) = tokio::join!(
            new_conversation(&s, "alice"),
            new_conversation(&s, "alice"),
            new_conversation(&s, "alice"),
        );
        let mut titles = vec![a.unwrap().title, b.unwrap().title, c.unwrap().title];
        titles.sort();
        assert_eq!(
            titles,
            vec!["New Conversation 1", "New Conversation 2", "New Conversation 3"]
        );
    }

    #[tokio::test]
    async fn test_get_conversation_not_owned() {
        let s = SqliteStorage::open_in_memory().unwrap();
        let conv = new_conversation(&s, "alice").await.unwrap();
        let err = get_conversation(&s, "bob", conv.id).await.unwrap_err();
        assert!(matches!(err, LexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_referenced_refs_keep_first_seen_order() {
        let s = SqliteStorage::open_in_memory().unwrap();
        let a = s.insert_document(&Document::new("a.pdf", "alice")).await.unwrap();
        let b = s.insert_document(&Document::new("b.pdf", "alice")).await.unwrap();
        let refs = referenced_refs(&s, "alice", &[b.id, 999, a.id]).await.unwrap();
        let names: Vec<&str> = refs.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "a.pdf"]);
    }
}
