//! # envmedic Core
//!
//! Domain types, traits, and error definitions for the envmedic agent runtime.
//! Everything the other crates exchange is defined here: messages and
//! history, the `Provider` abstraction over LLM backends, the tool registry
//! with its approval gate, and the event sink observers subscribe to.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their respective
//! crates, so tests can swap in scripted providers, fake process runners and
//! canned approvers.

pub mod approval;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalDecision, ApprovalGate, ApprovalRequest, Approver, AutoApprove};
pub use error::{ProviderError, RunError, RunErrorKind, ToolError};
pub use event::{AgentEvent, EventHandler, EventLog, EventSink, LogHandler, MessageTag, TurnEntry};
pub use message::{History, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{
    Tool, ToolArgs, ToolContext, ToolDescriptor, ToolInvocation, ToolParameter, ToolRegistry,
    ToolResult, ToolStatus,
};
