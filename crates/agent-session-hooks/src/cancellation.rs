//! Cooperative cancellation of tool calls for stopped sessions.

use agent_session_core::{CancelFlag, SessionId};

use crate::{event::BeforeToolCallEvent, hook::ToolHook};

/// Reason attached to invocations vetoed by a stop request.
pub const STOPPED_REASON: &str = "session stopped by user";

/// Vetoes tool calls once the owning session is stopped.
///
/// The flag is read once per invocation and never written.
#[derive(Debug, Clone)]
pub struct CancellationHook {
    session_id: SessionId,
    flag: CancelFlag,
}

impl CancellationHook {
    /// Bind a hook to a session's cancellation flag.
    pub fn new(session_id: impl Into<SessionId>, flag: CancelFlag) -> Self {
        Self {
            session_id: session_id.into(),
            flag,
        }
    }

    /// Session this hook guards.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl ToolHook for CancellationHook {
    fn id(&self) -> &str {
        "session_cancellation"
    }

    fn before_tool_call(&self, event: &mut BeforeToolCallEvent) {
        if self.flag.is_cancelled() {
            tracing::warn!(
                session_id = %self.session_id,
                tool = %event.tool_name,
                tool_use_id = %event.tool_use_id,
                "Cancelling tool call for stopped session"
            );
            event.cancel(STOPPED_REASON);
        } else {
            event.proceed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::ToolCallState,
        hook::{HookRegistry, ToolOutcome},
    };
    use serde_json::Value;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn event() -> BeforeToolCallEvent {
        BeforeToolCallEvent::new("s-1", "search", "tu-1", Value::Null)
    }

    #[test]
    fn test_unset_flag_proceeds() {
        let flag = CancelFlag::new();
        let hook = CancellationHook::new("s-1", flag.clone());
        let mut e = event();
        hook.before_tool_call(&mut e);
        assert_eq!(e.state(), &ToolCallState::Proceed);
        assert!(!flag.is_cancelled());
    }

    #[test]
    fn test_set_flag_cancels() {
        let flag = CancelFlag::new();
        flag.cancel();
        let hook = CancellationHook::new("s-1", flag);
        let mut e = event();
        hook.before_tool_call(&mut e);
        assert_eq!(
            e.state(),
            &ToolCallState::Cancelled {
                reason: STOPPED_REASON.to_string()
            }
        );
    }

    /// Vetoes shell commands regardless of session state.
    struct DenyShell;

    impl ToolHook for DenyShell {
        fn id(&self) -> &str {
            "deny_shell"
        }

        fn before_tool_call(&self, event: &mut BeforeToolCallEvent) {
            if event.tool_name == "shell" {
                event.cancel("shell is disabled");
            }
        }
    }

    #[tokio::test]
    async fn test_hooks_after_cancellation_still_gate() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(CancellationHook::new("s-1", CancelFlag::new())));
        registry.register(Arc::new(DenyShell));

        let mut shell = BeforeToolCallEvent::new("s-1", "shell", "tu-1", Value::Null);
        let outcome = registry.invoke_tool(&mut shell, || async { "ran" }).await;
        assert_eq!(
            outcome,
            ToolOutcome::Cancelled {
                reason: "shell is disabled".to_string()
            }
        );

        let outcome = registry.invoke_tool(&mut event(), || async { "ran" }).await;
        assert_eq!(outcome, ToolOutcome::Executed("ran"));
    }

    #[tokio::test]
    async fn test_stop_between_calls() {
        let flag = CancelFlag::new();
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(CancellationHook::new("s-1", flag.clone())));
        let runs = AtomicUsize::new(0);

        let first = registry
            .invoke_tool(&mut event(), || async {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(first, ToolOutcome::Executed(()));

        flag.cancel();
        let second = registry
            .invoke_tool(&mut event(), || async {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(matches!(second, ToolOutcome::Cancelled { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
