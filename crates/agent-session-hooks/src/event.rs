//! Tool-call lifecycle events.

use agent_session_core::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decision state of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallState {
    /// No hook has decided yet.
    Pending,
    /// The tool body may run.
    Proceed,
    /// The tool body must not run.
    Cancelled { reason: String },
}

impl ToolCallState {
    /// Whether a decision has been made.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Emitted by the runtime before a tool body executes.
#[derive(Debug, Clone)]
pub struct BeforeToolCallEvent {
    pub session_id: SessionId,
    pub tool_name: String,
    pub tool_use_id: String,
    pub input: Value,
    state: ToolCallState,
}

impl BeforeToolCallEvent {
    /// Create a pending event.
    #[must_use]
    pub fn new(
        session_id: impl Into<SessionId>,
        tool_name: impl Into<String>,
        tool_use_id: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            tool_use_id: tool_use_id.into(),
            input,
            state: ToolCallState::Pending,
        }
    }

    /// Current decision state.
    #[must_use]
    pub const fn state(&self) -> &ToolCallState {
        &self.state
    }

    /// Allow the tool to run. Ignored once decided.
    pub fn proceed(&mut self) {
        if !self.state.is_terminal() {
            self.state = ToolCallState::Proceed;
        }
    }

    /// Veto the tool. Ignored once decided.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = ToolCallState::Cancelled {
                reason: reason.into(),
            };
        }
    }
}
