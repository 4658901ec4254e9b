use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cases;
use crate::embedding::EmbeddingProvider;
use crate::error::{LexError, Result};
use crate::model::CaseStatus;
use crate::similarity;
use crate::storage::StorageBackend;

const DEFAULT_CASE_LIST_LIMIT: usize = 10;
const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_TOOL_LIMIT: usize = 50;

/// Tool names, in catalogue order.
pub const TOOL_NAMES: &[&str] = &[
    "create_case",
    "get_case",
    "get_cases",
    "search_similar_cases",
    "search_documents",
    "get_case_documents",
    "get_case_summary",
];

const CATALOGUE: &str = "\
Available tools:
- create_case(title: string, description?: string, tags?: string[]): create a new case.
- get_case(case_id: integer): fetch a case by id.
- get_cases(status?: \"active\"|\"closed\"|\"archived\", limit?: integer = 10): list cases, newest first.
- search_similar_cases(query: string, limit?: integer = 5): cases whose documents best match the query.
- search_documents(query: string, limit?: integer = 5): documents most similar to the query.
- get_case_documents(case_id: integer): documents attached to a case.
- get_case_summary(case_id: integer): case details with its document count and status.

To call a tool, reply with exactly one JSON object and nothing else:
{\"tool\": \"<name>\", \"arguments\": {...}}
The result comes back in the next message. Otherwise reply in plain text.";

/// A tool invocation requested by a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    json!({})
}

impl ToolCall {
    /// Parse a reply that consists of a single tool-call JSON object,
    /// optionally wrapped in a markdown fence. Anything else is plain text.
    pub fn parse(reply: &str) -> Option<Self> {
        let cleaned = reply
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        if !cleaned.starts_with('{') {
            return None;
        }
        let call: ToolCall = serde_json::from_str(cleaned).ok()?;
        if call.tool.trim().is_empty() {
            return None;
        }
        Some(call)
    }
}

/// Result of a tool run: the JSON handed back to the role and any document
/// ids it surfaced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    pub documents: Vec<i64>,
}

impl ToolOutput {
    fn value(value: Value) -> Self {
        Self {
            value,
            documents: Vec::new(),
        }
    }
}

/// The tools every agent role can call, bound to one user. Nothing reachable
/// through a `Toolset` belongs to anyone but `owner`.
pub struct Toolset<'a, S, E> {
    storage: &'a S,
    embedder: &'a E,
    owner: &'a str,
}

impl<'a, S, E> Toolset<'a, S, E>
where
    S: StorageBackend,
    E: EmbeddingProvider,
{
    pub fn new(storage: &'a S, embedder: &'a E, owner: &'a str) -> Self {
        Self {
            storage,
            embedder,
            owner,
        }
    }

    pub fn owner(&self) -> &str {
        self.owner
    }

    /// Tool descriptions and the calling convention, for system prompts.
    pub fn catalogue(&self) -> &'static str {
        CATALOGUE
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        let args = &call.arguments;
        match call.tool.as_str() {
            "create_case" => {
                let title = str_arg(args, "title")?;
                let description = args["description"].as_str().unwrap_or_default();
                let tags: Vec<String> = args["tags"]
                    .as_array()
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let case =
                    cases::create_case(self.storage, self.owner, title, description, &tags, &[])
                        .await?;
                Ok(ToolOutput::value(json!({
                    "id": case.id,
                    "title": case.title,
                    "description": case.description,
                    "tags": case.tags,
                })))
            }
            "get_case" => {
                let id = id_arg(args, "case_id")?;
                match cases::get_case(self.storage, self.owner, id).await {
                    Ok(case) => Ok(ToolOutput::value(json!({
                        "id": case.id,
                        "title": case.title,
                        "description": case.description,
                        "status": case.status,
                    }))),
                    Err(LexError::NotFound(_)) => Ok(ToolOutput::value(Value::Null)),
                    Err(e) => Err(e),
                }
            }
            "get_cases" => {
                let status = match args["status"].as_str().filter(|s| !s.trim().is_empty()) {
                    Some(s) => Some(s.parse::<CaseStatus>().map_err(LexError::InvalidInput)?),
                    None => None,
                };
                let limit = limit_arg(args, DEFAULT_CASE_LIST_LIMIT);
                let found = cases::list_cases(self.storage, self.owner, status, limit).await?;
                Ok(ToolOutput::value(Value::Array(
                    found
                        .iter()
                        .map(|c| json!({"id": c.id, "title": c.title, "status": c.status}))
                        .collect(),
                )))
            }
            "search_similar_cases" => {
                let query = str_arg(args, "query")?;
                let limit = limit_arg(args, DEFAULT_SEARCH_LIMIT);
                let hits = similarity::find_similar_cases_or_empty(
                    self.storage,
                    self.embedder,
                    self.owner,
                    query,
                    limit,
                )
                .await;
                Ok(ToolOutput::value(Value::Array(
                    hits.iter()
                        .map(|(c, score)| {
                            json!({
                                "case": {"id": c.id, "title": c.title},
                                "similarity": score,
                            })
                        })
                        .collect(),
                )))
            }
            "search_documents" => {
                let query = str_arg(args, "query")?;
                let limit = limit_arg(args, DEFAULT_SEARCH_LIMIT);
                let hits = similarity::search_documents_or_empty(
                    self.storage,
                    self.embedder,
                    self.owner,
                    query,
                    limit,
                )
                .await;
                Ok(ToolOutput {
                    documents: hits.iter().map(|(d, _)| d.id).collect(),
                    value: Value::Array(
                        hits.iter()
                            .map(|(d, score)| {
                                json!({
                                    "id": d.id,
                                    "filename": d.filename,
                                    "description": d.description,
                                    "similarity": score,
                                })
                            })
                            .collect(),
                    ),
                })
            }
            "get_case_documents" => {
                let id = id_arg(args, "case_id")?;
                let docs = cases::case_documents(self.storage, self.owner, id).await?;
                Ok(ToolOutput {
                    documents: docs.iter().map(|d| d.id).collect(),
                    value: Value::Array(
                        docs.iter()
                            .map(|d| {
                                json!({
                                    "id": d.id,
                                    "filename": d.filename,
                                    "description": d.description,
                                })
                            })
                            .collect(),
                    ),
                })
            }
            "get_case_summary" => {
                let id = id_arg(args, "case_id")?;
                let summary = cases::case_summary(self.storage, self.owner, id).await?;
                Ok(ToolOutput::value(json!({
                    "id": summary.id,
                    "title": summary.title,
                    "description": summary.description,
                    "document_count": summary.document_count,
                    "status": summary.status,
                })))
            }
            other => Err(LexError::InvalidInput(format!(
                "unknown tool '{other}' (available: {})",
                TOOL_NAMES.join(", ")
            ))),
        }
    }
}

fn str_arg<'v>(args: &'v Value, name: &str) -> Result<&'v str> {
    args[name]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LexError::InvalidInput(format!("missing string argument '{name}'")))
}

/// Integer id argument; numeric strings are accepted since models often quote ids.
fn id_arg(args: &Value, name: &str) -> Result<i64> {
    let value = &args[name];
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| LexError::InvalidInput(format!("missing integer argument '{name}'")))
}

fn limit_arg(args: &Value, default: usize) -> usize {
    args["limit"]
        .as_u64()
        .map(|n| n as usize)
        .unwrap_or(default)
        .clamp(1, MAX_TOOL_LIMIT)
}
