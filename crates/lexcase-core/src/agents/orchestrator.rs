use serde::Serialize;

use super::roles::{is_termination, named_roles, strip_termination, Role, TERMINATE};
use super::tools::{ToolCall, Toolset};
use crate::config::OrchestratorConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel};
use crate::storage::StorageBackend;

const SELECTOR_PROMPT: &str = "You coordinate a legal team conversation. \
     Select the next role to speak. Reply with only the role name.";

const TOOL_LIMIT_NOTICE: &str =
    "Tool call limit reached for this turn. Reply to the conversation without calling tools.";

/// One tool run within a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
    pub ok: bool,
}

/// One message of the shared transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Documents surfaced by tools during this turn, first-seen order.
    pub documents: Vec<i64>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            documents: Vec::new(),
            tool_calls: Vec::new(),
        }
    }
}

/// Strictly ordered record of an exchange. The first turn is always the
/// `UserProxy` opening.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Turns authored by LLM roles.
    pub fn agent_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role.is_agent())
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}

impl From<Vec<Turn>> for Transcript {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

/// Runs a bounded, turn-taking exchange among the four roles.
pub struct Orchestrator<'a, M, S, E> {
    model: &'a M,
    tools: Toolset<'a, S, E>,
    config: &'a OrchestratorConfig,
}

impl<'a, M, S, E> Orchestrator<'a, M, S, E>
where
    M: ChatModel,
    S: StorageBackend,
    E: EmbeddingProvider,
{
    pub fn new(model: &'a M, tools: Toolset<'a, S, E>, config: &'a OrchestratorConfig) -> Self {
        Self {
            model,
            tools,
            config,
        }
    }

    /// Run an exchange opened by `message`.
    ///
    /// Ends after `max_rounds` turns (opening included) or when a turn
    /// contains `TERMINATE`; the token is stripped from the closing turn's
    /// content, which may leave it empty. A provider failure before any agent has spoken
    /// is returned; later failures end the exchange with the partial
    /// transcript.
    pub async fn run(&self, message: &str) -> Result<Transcript> {
        let mut transcript = Transcript::default();
        transcript.push(Turn::new(Role::UserProxy, message));

        while transcript.len() < self.config.max_rounds {
            let Some(last) = transcript.last() else { break };
            let speaker = self.select_speaker(last).await;
            debug_assert!(last.role.can_hand_off(speaker));
            tracing::debug!(
                round = transcript.len(),
                from = %last.role,
                to = %speaker,
                "next speaker"
            );

            match self.take_turn(speaker, &transcript).await {
                Ok(mut turn) => {
                    let done = is_termination(&turn.content);
                    if done {
                        turn.content = strip_termination(&turn.content);
                    }
                    transcript.push(turn);
                    if done {
                        tracing::debug!(rounds = transcript.len(), "exchange terminated");
                        break;
                    }
                }
                Err(e) if transcript.agent_turns().next().is_none() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        role = %speaker,
                        rounds = transcript.len(),
                        error = %e,
                        "provider failed mid-exchange, keeping partial transcript"
                    );
                    break;
                }
            }
        }

        Ok(transcript)
    }

    /// Choose who speaks after `last` among its allowed successors.
    async fn select_speaker(&self, last: &Turn) -> Role {
        let candidates = last.role.successors();
        if let [only] = candidates {
            return *only;
        }

        if let [named] = named_roles(&last.content, candidates).as_slice() {
            return *named;
        }

        let names: Vec<&str> = candidates.iter().map(Role::name).collect();
        let prompt = format!(
            "Candidates: {}.\nLast message from {}:\n{}\n\nWhich role should speak next?",
            names.join(", "),
            last.role,
            last.content
        );
        let messages = [ChatMessage::system(SELECTOR_PROMPT), ChatMessage::user(prompt)];

        match self.model.chat(&messages).await {
            Ok(reply) => pick_named(&reply, candidates).unwrap_or(candidates[0]),
            Err(e) => {
                tracing::warn!(error = %e, "speaker selection failed, using first candidate");
                candidates[0]
            }
        }
    }

    /// The transcript as seen by `role`: its own turns as assistant
    /// messages, everyone else's as attributed user messages.
    fn build_messages(&self, role: Role, transcript: &Transcript) -> Vec<ChatMessage> {
        let system = format!(
            "{}\n\nYou are assisting user '{}'.\n\n{}\n\nWhen the work is complete, include {} in your reply.",
            role.system_prompt(),
            self.tools.owner(),
            self.tools.catalogue(),
            TERMINATE,
        );
        let mut messages = vec![ChatMessage::system(system)];
        for turn in transcript.turns() {
            if turn.role == role {
                messages.push(ChatMessage::assistant(&turn.content));
            } else {
                messages.push(ChatMessage::user(format!(
                    "{}: {}",
                    turn.role, turn.content
                )));
            }
        }
        messages
    }

    /// Compute one turn for `role`, running any tools it asks for.
    async fn take_turn(&self, role: Role, transcript: &Transcript) -> Result<Turn> {
        let mut messages = self.build_messages(role, transcript);
        let mut turn = Turn::new(role, String::new());

        loop {
            let reply = self.model.chat(&messages).await?;

            let Some(call) = ToolCall::parse(&reply) else {
                turn.content = reply.trim().to_string();
                return Ok(turn);
            };

            messages.push(ChatMessage::assistant(&reply));
            if turn.tool_calls.len() >= self.config.max_tool_calls {
                tracing::warn!(role = %role, tool = %call.tool, "tool call limit reached");
                messages.push(ChatMessage::user(TOOL_LIMIT_NOTICE));
                let reply = self.model.chat(&messages).await?;
                turn.content = reply.trim().to_string();
                return Ok(turn);
            }

            let feedback = match self.tools.execute(&call).await {
                Ok(output) => {
                    for id in output.documents {
                        if !turn.documents.contains(&id) {
                            turn.documents.push(id);
                        }
                    }
                    turn.tool_calls.push(ToolInvocation {
                        name: call.tool.clone(),
                        arguments: call.arguments.clone(),
                        ok: true,
                    });
                    format!("Tool result for {}: {}", call.tool, output.value)
                }
                Err(e) => {
                    tracing::warn!(role = %role, tool = %call.tool, error = %e, "tool call failed");
                    turn.tool_calls.push(ToolInvocation {
                        name: call.tool.clone(),
                        arguments: call.arguments.clone(),
                        ok: false,
                    });
                    format!("Tool error for {}: {e}", call.tool)
                }
            };
            messages.push(ChatMessage::user(feedback));
        }
    }
}

/// The candidate whose name appears earliest in `reply`.
fn pick_named(reply: &str, candidates: &[Role]) -> Option<Role> {
    candidates
        .iter()
        .filter_map(|r| reply.find(r.name()).map(|pos| (pos, *r)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, r)| r)
}
