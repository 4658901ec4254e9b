//! Multi-agent consultation: four fixed roles taking turns over a shared
//! transcript, with an owner-scoped toolset for case and document lookups.

mod orchestrator;
mod roles;
mod tools;

pub use orchestrator::{Orchestrator, ToolInvocation, Transcript, Turn};
pub use roles::{is_termination, named_roles, strip_termination, Role, TERMINATE};
pub use tools::{ToolCall, ToolOutput, Toolset, TOOL_NAMES};
