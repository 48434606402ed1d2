//! Tool-call lifecycle hooks.
//!
//! Provides:
//! - `BeforeToolCallEvent` / `ToolCallState` - Per-invocation decision state
//! - `ToolHook` / `HookRegistry` - Hook seam and dispatch
//! - `CancellationHook` - Veto tool calls for stopped sessions

pub mod cancellation;
pub mod event;
pub mod hook;

pub use cancellation::CancellationHook;
pub use event::{BeforeToolCallEvent, ToolCallState};
pub use hook::{HookRegistry, ToolHook, ToolOutcome};
