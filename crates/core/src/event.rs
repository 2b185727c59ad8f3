//! Agent events and the sink that delivers them to observers.
//!
//! The engine emits one [`AgentEvent`] per observable step. Events go through
//! a bounded channel to a dispatcher task, which hands each one to every
//! subscribed [`EventHandler`] in emission order. A slow observer only stalls
//! the engine once the buffer is full; a failing or panicking observer is
//! logged and skipped.

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::RunErrorKind;
use crate::tool::ToolResult;

pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Presentation hint for chat surfaces. Carries no behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageTag {
    Assistant,
    AssistantLog,
    AssistantForUser,
    ToolCall,
    AssistantError,
    User,
}

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::AssistantLog => "assistantLog",
            Self::AssistantForUser => "assistantForUser",
            Self::ToolCall => "toolCall",
            Self::AssistantError => "assistantError",
            Self::User => "user",
        }
    }

    /// Whether a "user-facing only" view should show this tag.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::User | Self::AssistantForUser)
    }
}

/// One entry of an LLM turn as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnEntry {
    Message { content: String },
    Call { tool: String, arguments: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A tool ran (or was refused) during a subgraph iteration.
    ToolCall {
        tool: String,
        arguments: serde_json::Value,
        result: ToolResult,
    },

    /// The model answered one turn.
    LlmTurn {
        assistant_messages: Vec<TurnEntry>,
        invoked_tools: Vec<String>,
    },

    /// Narration meant for the human, attached to a strategy edge.
    StageFinished { stage: String, text: String },

    RunFinished { result: String },

    RunError { kind: RunErrorKind, message: String },
}

impl AgentEvent {
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::ToolCall { .. } => MessageTag::ToolCall,
            Self::LlmTurn { .. } => MessageTag::AssistantLog,
            Self::StageFinished { .. } => MessageTag::AssistantForUser,
            Self::RunFinished { .. } => MessageTag::Assistant,
            Self::RunError { kind: RunErrorKind::Cancelled, .. } => MessageTag::Assistant,
            Self::RunError { .. } => MessageTag::AssistantError,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    /// Human-readable narration of the event.
    pub fn render(&self) -> String {
        match self {
            Self::ToolCall { tool, arguments, result } => {
                format!(
                    "Tool call: {tool}\nArguments: {arguments}\nResult:\n{}",
                    unwrap_json_string(&result.output)
                )
            }
            Self::LlmTurn { assistant_messages, invoked_tools } => {
                let mut out = String::from("LLM Responses:\n");
                for entry in assistant_messages {
                    match entry {
                        TurnEntry::Message { content } => {
                            out.push_str(&format!("  - message: {content}\n"));
                        }
                        TurnEntry::Call { tool, arguments } => {
                            out.push_str(&format!("  - call: {tool}, message: {arguments}\n"));
                        }
                    }
                }
                if !invoked_tools.is_empty() {
                    out.push_str(&format!("Tools: [{}]\n", invoked_tools.join(", ")));
                }
                out
            }
            Self::StageFinished { text, .. } => text.clone(),
            Self::RunFinished { result } => format!("Agent finished with result: {result}"),
            Self::RunError { kind: RunErrorKind::Cancelled, .. } => "Agent stopped: the run was cancelled".into(),
            Self::RunError { message, .. } => format!("Agent execution error: {message}"),
        }
    }
}

/// Tool outputs sometimes arrive as a quoted JSON string; show the content.
fn unwrap_json_string(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(inner)) => inner,
        _ => raw.to_string(),
    }
}

/// Observer of agent events. Runs on the sink's dispatcher task.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AgentEvent) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &AgentEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Collects every event in memory.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Arc<AgentEvent>>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Arc<AgentEvent>> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventHandler for EventLog {
    fn handle(&self, event: &AgentEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("event log poisoned"))?
            .push(Arc::new(event.clone()));
        Ok(())
    }
}

/// Mirrors events into `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl EventHandler for LogHandler {
    fn handle(&self, event: &AgentEvent) -> anyhow::Result<()> {
        match event {
            AgentEvent::ToolCall { tool, result, .. } => {
                info!(tool = %tool, status = ?result.status, "Tool call finished");
            }
            AgentEvent::LlmTurn { invoked_tools, .. } => {
                debug!(tools = ?invoked_tools, "LLM turn");
            }
            AgentEvent::StageFinished { stage, .. } => info!(stage = %stage, "Stage finished"),
            AgentEvent::RunFinished { .. } => info!("Agent run finished"),
            AgentEvent::RunError { kind: RunErrorKind::Cancelled, .. } => info!("Agent run stopped by cancellation"),
            AgentEvent::RunError { kind, message } => {
                warn!(kind = ?kind, error = %message, "Agent run failed");
            }
        }
        Ok(())
    }
}

enum Envelope {
    Event(Arc<AgentEvent>),
    Flush(oneshot::Sender<()>),
}

type Handlers = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

/// Bounded, ordered fan-out of events to handlers.
///
/// Must be created inside a tokio runtime; the dispatcher task lives until
/// every clone of the sink is dropped.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::Sender<Envelope>,
    handlers: Handlers,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventSink").field("handlers", &handlers).finish()
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handlers: Handlers = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(dispatch(receiver, handlers.clone()));
        Self { sender, handlers }
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(_) => warn!("Event handler list poisoned, subscription dropped"),
        }
    }

    /// Queue an event. Waits only while the buffer is full.
    pub async fn emit(&self, event: AgentEvent) {
        if self.sender.send(Envelope::Event(Arc::new(event))).await.is_err() {
            warn!("Event dispatcher stopped, event dropped");
        }
    }

    /// Wait until every event emitted so far has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Envelope::Flush(tx)).await.is_err() {
            return;
        }
        let _ = rx.await;
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

async fn dispatch(mut receiver: mpsc::Receiver<Envelope>, handlers: Handlers) {
    while let Some(envelope) = receiver.recv().await {
        match envelope {
            Envelope::Event(event) => {
                let current: Vec<_> = match handlers.read() {
                    Ok(h) => h.clone(),
                    Err(_) => continue,
                };
                for handler in current {
                    match catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, tag = event.tag().as_str(), "Event handler failed"),
                        Err(_) => warn!(tag = event.tag().as_str(), "Event handler panicked"),
                    }
                }
            }
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Event dispatcher exiting");
}
