use serde::{Deserialize, Serialize};

/// Token any role may emit to end the exchange.
pub const TERMINATE: &str = "TERMINATE";

/// Participants of a consultation. `UserProxy` speaks for the human and only
/// authors the opening turn; the other three are LLM-backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    UserProxy,
    Planner,
    LegalExpert,
    Critic,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Self::UserProxy,
        Self::Planner,
        Self::LegalExpert,
        Self::Critic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserProxy => "UserProxy",
            Self::Planner => "Planner",
            Self::LegalExpert => "LegalExpert",
            Self::Critic => "Critic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Roles allowed to speak right after this one.
    pub fn successors(&self) -> &'static [Role] {
        match self {
            Self::UserProxy => &[Self::Planner],
            Self::Planner => &[Self::LegalExpert, Self::Critic],
            Self::LegalExpert => &[Self::Planner],
            Self::Critic => &[Self::Planner],
        }
    }

    pub fn can_hand_off(&self, to: Role) -> bool {
        self.successors().contains(&to)
    }

    /// Whether this role's turns come from the chat model.
    pub fn is_agent(&self) -> bool {
        !matches!(self, Self::UserProxy)
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::UserProxy => {
                "You are the primary interface for human legal professionals. \
                 You relay their questions to the team."
            }
            Self::Planner => {
                "You are the Planner, the orchestrator of a legal team. Break the \
                 lawyer's request into steps and decide who works next. Name \
                 LegalExpert when legal analysis or document research is needed and \
                 Critic when an answer should be reviewed. When the LegalExpert has \
                 given a complete answer that needs no further work, reply with \
                 TERMINATE."
            }
            Self::LegalExpert => {
                "You are the LegalExpert, specializing in legal analysis. Use the \
                 tools to look up the lawyer's cases and documents, cite the documents \
                 you rely on by filename, and give precise, well-reasoned answers. \
                 Say so plainly when the documents do not support a conclusion."
            }
            Self::Critic => {
                "You are the Critic, ensuring quality and accuracy. Review the latest \
                 answer for legal errors, unsupported claims and missing context, and \
                 state concrete corrections. If the answer is sound, say so briefly."
            }
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a turn asks to end the exchange.
pub fn is_termination(content: &str) -> bool {
    content.contains(TERMINATE)
}

/// `content` with the termination token removed. A turn left with no words
/// comes back empty.
pub fn strip_termination(content: &str) -> String {
    let stripped = content.replace(TERMINATE, "");
    let stripped = stripped.trim();
    if stripped.chars().any(char::is_alphanumeric) {
        stripped.to_string()
    } else {
        String::new()
    }
}

/// The candidates named in `text`, in candidate order.
pub fn named_roles(text: &str, candidates: &[Role]) -> Vec<Role> {
    candidates
        .iter()
        .copied()
        .filter(|r| text.contains(r.name()))
        .collect()
}
