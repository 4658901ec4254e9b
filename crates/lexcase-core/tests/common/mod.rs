#![allow(dead_code)]

use std::sync::Mutex;

use lexcase_core::config::{IngestConfig, OrchestratorConfig};
use lexcase_core::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use lexcase_core::error::{LexError, Result};
use lexcase_core::ingest::IngestContext;
use lexcase_core::llm::{ChatMessage, ChatModel, ChatRole};
use lexcase_core::storage::SqliteStorage;

pub const SUMMARY: &str = "Employment agreement with a two-year non-compete clause.";
pub const ANSWER: &str = "The non-compete clause is likely enforceable for two years.";

/// A chat model that answers by role, read off the system prompt, so a
/// whole consultation can run without a provider.
///
/// The Planner routes to the LegalExpert and terminates once it has
/// answered. The LegalExpert searches documents once, then answers.
#[derive(Default)]
pub struct RoleScripted {
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RoleScripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

fn system_prompt(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .find(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

impl ChatModel for RoleScripted {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let system = system_prompt(messages);
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();

        let reply = if system.starts_with("You are a legal document summarizer") {
            SUMMARY.to_string()
        } else if system.starts_with("You are the Planner") {
            let answered = messages
                .iter()
                .any(|m| m.role == ChatRole::User && m.content.starts_with("LegalExpert:"));
            if answered {
                "TERMINATE".to_string()
            } else {
                "Routing to LegalExpert.".to_string()
            }
        } else if system.starts_with("You are the LegalExpert") {
            if last.starts_with("Tool result") {
                ANSWER.to_string()
            } else {
                r#"{"tool": "search_documents", "arguments": {"query": "non-compete clause"}}"#
                    .to_string()
            }
        } else {
            "LegalExpert".to_string()
        };
        Ok(reply)
    }

    fn model_id(&self) -> &str {
        "role-scripted"
    }
}

/// A chat model whose every call fails.
pub struct DownModel;

impl ChatModel for DownModel {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(LexError::Llm("503 service unavailable".into()))
    }

    fn model_id(&self) -> &str {
        "down"
    }
}

/// An embedder whose every call fails.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(LexError::Embedding("connection refused".into()))
    }

    fn dimensions(&self) -> usize {
        128
    }

    fn model_id(&self) -> &str {
        "failing"
    }
}

pub fn storage() -> SqliteStorage {
    SqliteStorage::open_in_memory().expect("in-memory storage should open")
}

pub fn hash_embedder() -> HashEmbeddingProvider {
    HashEmbeddingProvider::new()
}

pub fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
}

pub fn ingest_context<'a, E, L>(
    storage: &'a SqliteStorage,
    embedder: &'a E,
    summarizer: Option<&'a L>,
    config: &'a IngestConfig,
) -> IngestContext<'a, SqliteStorage, E, L> {
    IngestContext {
        storage,
        embedder,
        summarizer,
        config,
    }
}
