//! Hook registration and dispatch.

use std::{future::Future, sync::Arc};

use crate::event::{BeforeToolCallEvent, ToolCallState};

/// Observer of tool-call lifecycle events.
///
/// Implement this to gate tool execution. Decisions are synchronous.
pub trait ToolHook: Send + Sync {
    /// Hook identifier for logging.
    fn id(&self) -> &str;

    /// Inspect a pending invocation and optionally decide it.
    fn before_tool_call(&self, event: &mut BeforeToolCallEvent);
}

/// Result of running a tool through the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome<T> {
    /// The body ran and produced a value.
    Executed(T),
    /// A hook vetoed the call; the body did not run.
    Cancelled { reason: String },
}

/// Ordered set of tool hooks.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ToolHook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks run in registration order.
    pub fn register(&mut self, hook: Arc<dyn ToolHook>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Decide a pending event.
    ///
    /// Every hook sees the call while it is still pending, so an approval
    /// from one hook never hides a later hook's veto. The first veto
    /// cancels the call; otherwise it proceeds. An event that is already
    /// decided is left as is.
    pub fn dispatch(&self, event: &mut BeforeToolCallEvent) {
        if event.state().is_terminal() {
            return;
        }
        for hook in &self.hooks {
            let mut view = event.clone();
            hook.before_tool_call(&mut view);
            if let ToolCallState::Cancelled { reason } = view.state() {
                tracing::debug!(
                    hook = hook.id(),
                    tool = %event.tool_name,
                    %reason,
                    "Tool call vetoed"
                );
                event.cancel(reason.clone());
                return;
            }
        }
        event.proceed();
    }

    /// Dispatch, then run `body` exactly once if the call may proceed.
    pub async fn invoke_tool<T, F, Fut>(
        &self,
        event: &mut BeforeToolCallEvent,
        body: F,
    ) -> ToolOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.dispatch(event);
        match event.state() {
            ToolCallState::Cancelled { reason } => ToolOutcome::Cancelled {
                reason: reason.clone(),
            },
            ToolCallState::Proceed | ToolCallState::Pending => ToolOutcome::Executed(body().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Vetoes one tool by name.
    struct DenyTool(&'static str);

    impl ToolHook for DenyTool {
        fn id(&self) -> &str {
            "deny_tool"
        }

        fn before_tool_call(&self, event: &mut BeforeToolCallEvent) {
            if event.tool_name == self.0 {
                event.cancel(format!("{} is not allowed", self.0));
            }
        }
    }

    /// Approves everything.
    struct AllowAll;

    impl ToolHook for AllowAll {
        fn id(&self) -> &str {
            "allow_all"
        }

        fn before_tool_call(&self, event: &mut BeforeToolCallEvent) {
            event.proceed();
        }
    }

    #[test]
    fn test_empty_registry_proceeds() {
        let registry = HookRegistry::new();
        let mut event = BeforeToolCallEvent::new("s-1", "search", "tu-1", json!({}));
        registry.dispatch(&mut event);
        assert_eq!(event.state(), &ToolCallState::Proceed);
    }

    #[test]
    fn test_later_veto_overrides_earlier_approval() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(AllowAll));
        registry.register(Arc::new(DenyTool("shell")));
        assert_eq!(registry.len(), 2);

        let mut event = BeforeToolCallEvent::new("s-1", "shell", "tu-1", json!({}));
        registry.dispatch(&mut event);
        assert_eq!(
            event.state(),
            &ToolCallState::Cancelled {
                reason: "shell is not allowed".to_string()
            }
        );

        let mut event = BeforeToolCallEvent::new("s-1", "search", "tu-2", json!({}));
        registry.dispatch(&mut event);
        assert_eq!(event.state(), &ToolCallState::Proceed);
    }

    #[test]
    fn test_first_veto_reason_is_kept() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(DenyTool("shell")));
        registry.register(Arc::new(DenyTool("shell")));

        let mut event = BeforeToolCallEvent::new("s-1", "shell", "tu-1", json!({}));
        registry.dispatch(&mut event);
        assert!(matches!(event.state(), ToolCallState::Cancelled { .. }));
    }

    #[test]
    fn test_decided_event_is_left_alone() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(DenyTool("shell")));

        let mut event = BeforeToolCallEvent::new("s-1", "shell", "tu-1", json!({}));
        event.proceed();
        registry.dispatch(&mut event);
        assert_eq!(event.state(), &ToolCallState::Proceed);
    }

    #[tokio::test]
    async fn test_cancelled_tool_body_never_runs() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(DenyTool("shell")));

        let mut calls = 0;
        let mut event = BeforeToolCallEvent::new("s-1", "shell", "tu-1", json!({"cmd": "ls"}));
        let outcome = registry
            .invoke_tool(&mut event, || {
                calls += 1;
                async { "ran" }
            })
            .await;
        assert_eq!(
            outcome,
            ToolOutcome::Cancelled {
                reason: "shell is not allowed".to_string()
            }
        );
        assert_eq!(calls, 0);

        let mut event = BeforeToolCallEvent::new("s-1", "search", "tu-2", json!({}));
        let outcome = registry
            .invoke_tool(&mut event, || {
                calls += 1;
                async { "ran" }
            })
            .await;
        assert_eq!(outcome, ToolOutcome::Executed("ran"));
        assert_eq!(calls, 1);
    }
}
