//! Error types for the envmedic domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `RunError` is the only one
//! that reaches the caller of an agent run.

use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures inside a tool. These never leave the tool registry: they are
/// rendered into the textual `ToolResult` handed back to the model.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("Command execution failed:\n```\n{reason}\n```")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Command timed out after {timeout_secs}s and was terminated: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Command cancelled and terminated: {command}")]
    Cancelled { command: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Why an agent run stopped without a result.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("LLM service error: {0}")]
    LlmService(#[from] ProviderError),

    #[error("node '{node}' exceeded its limit of {limit} iterations")]
    IterationExceeded { node: String, limit: u32 },

    #[error("session exceeded the global limit of {limit} LLM turns")]
    GlobalIterationExceeded { limit: u32 },

    #[error("no applicable edge out of node '{0}'")]
    NoApplicableEdge(String),

    #[error("invalid strategy graph: {0}")]
    InvalidStrategy(String),

    #[error("run cancelled")]
    Cancelled,
}

/// Discriminant of [`RunError`], carried by `RunError` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    MissingCredential,
    LlmService,
    IterationExceeded,
    GlobalIterationExceeded,
    NoApplicableEdge,
    InvalidStrategy,
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::MissingCredential(_) => RunErrorKind::MissingCredential,
            Self::LlmService(_) => RunErrorKind::LlmService,
            Self::IterationExceeded { .. } => RunErrorKind::IterationExceeded,
            Self::GlobalIterationExceeded { .. } => RunErrorKind::GlobalIterationExceeded,
            Self::NoApplicableEdge(_) => RunErrorKind::NoApplicableEdge,
            Self::InvalidStrategy(_) => RunErrorKind::InvalidStrategy,
            Self::Cancelled => RunErrorKind::Cancelled,
        }
    }
}
