use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_LENGTH: usize = 20_000;

/// A chat thread attached to exactly one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub case_id: i64,
    pub owner: String,
    pub is_active: bool,
    /// Free-form conversation context/memory.
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>, case_id: i64, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            title: title.into(),
            case_id,
            owner: owner.into(),
            is_active: true,
            context: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Who a persisted message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message role: '{other}'")),
        }
    }
}

/// One entry in a conversation log. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub referenced_documents: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: i64, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            conversation_id,
            role,
            content: content.into(),
            metadata: None,
            referenced_documents: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_documents(mut self, document_ids: Vec<i64>) -> Self {
        self.referenced_documents = document_ids;
        self
    }

    /// Sender recorded in metadata, if any.
    pub fn sender(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("sender"))
            .and_then(|s| s.as_str())
    }
}

/// Read-path view of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub content: String,
    pub message_type: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageView {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            message_type: msg.role,
            sender: msg.sender().map(str::to_string),
            created_at: msg.created_at,
        }
    }
}
