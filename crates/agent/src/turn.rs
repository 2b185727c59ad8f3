//! One request/response exchange with the model, under a session budget.

use envmedic_core::error::RunError;
use envmedic_core::message::{History, Message, MessageToolCall};
use envmedic_core::provider::{Provider, ProviderRequest, ToolDefinition};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Model options for every turn of a session.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// LLM turns allowed across the whole session.
    pub max_agent_iterations: u32,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: None,
            max_agent_iterations: 100,
        }
    }
}

/// What the model produced in one turn.
#[derive(Debug, Clone)]
pub enum TurnResult {
    /// A plain answer with no tool calls.
    Assistant { text: String, message: Message },
    /// The model asked to run tools.
    ToolCalls { calls: Vec<MessageToolCall>, message: Message },
}

impl TurnResult {
    pub fn message(&self) -> &Message {
        match self {
            Self::Assistant { message, .. } | Self::ToolCalls { message, .. } => message,
        }
    }

    fn from_message(message: Message) -> Self {
        if message.tool_calls.is_empty() {
            Self::Assistant { text: message.content.clone(), message }
        } else {
            Self::ToolCalls { calls: message.tool_calls.clone(), message }
        }
    }
}

/// Issues turns against a provider and counts them against the session cap.
pub struct TurnService {
    provider: Arc<dyn Provider>,
    options: TurnOptions,
    turns: AtomicU32,
}

impl TurnService {
    pub fn new(provider: Arc<dyn Provider>, options: TurnOptions) -> Self {
        Self {
            provider,
            options,
            turns: AtomicU32::new(0),
        }
    }

    /// Turns issued so far.
    pub fn turns_used(&self) -> u32 {
        self.turns.load(Ordering::SeqCst)
    }

    /// Send the history (after an optional system prompt) and classify the
    /// reply. An empty `tools` slice disables tool calls for this turn.
    pub async fn complete(
        &self,
        history: &History,
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<TurnResult, RunError> {
        let limit = self.options.max_agent_iterations;
        let turn = self
            .turns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .map_err(|_| RunError::GlobalIterationExceeded { limit })?
            + 1;

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(history.messages().iter().cloned());

        let request = ProviderRequest {
            model: self.options.model.clone(),
            messages,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            tools: tools.to_vec(),
        };

        debug!(
            provider = self.provider.name(),
            turn,
            limit,
            tools = tools.len(),
            "Requesting LLM turn"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            response = self.provider.complete(request) => response?,
        };

        if let Some(usage) = &response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "LLM turn complete"
            );
        }

        Ok(TurnResult::from_message(response.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response};
    use envmedic_core::error::ProviderError;
    use envmedic_core::message::Role;

    fn service(provider: Arc<SequentialMockProvider>, limit: u32) -> TurnService {
        TurnService::new(
            provider,
            TurnOptions {
                max_agent_iterations: limit,
                ..TurnOptions::default()
            },
        )
    }

    fn history(text: &str) -> History {
        let mut h = History::new();
        h.push(Message::user(text));
        h
    }

    #[tokio::test]
    async fn classifies_text_and_tool_calls() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("check_package_version", serde_json::json!({"package_name": "numpy"}))], ""),
            make_text_response("numpy is missing"),
        ]));
        let turns = service(provider, 10);
        let cancel = CancellationToken::new();

        let first = turns.complete(&history("hi"), None, &[], &cancel).await.unwrap();
        assert!(matches!(&first, TurnResult::ToolCalls { calls, .. } if calls[0].name == "check_package_version"));

        let second = turns.complete(&history("hi"), None, &[], &cancel).await.unwrap();
        assert!(matches!(&second, TurnResult::Assistant { text, .. } if text == "numpy is missing"));
        assert_eq!(turns.turns_used(), 2);
    }

    #[tokio::test]
    async fn system_prompt_goes_first() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let turns = service(provider.clone(), 10);
        turns
            .complete(&history("issue"), Some("be helpful"), &[], &CancellationToken::new())
            .await
            .unwrap();

        let request = provider.last_request().unwrap();
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "be helpful");
        assert_eq!(request.messages[1].content, "issue");
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn budget_is_enforced_after_last_allowed_turn() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("one"),
            make_text_response("two"),
        ]));
        let turns = service(provider.clone(), 2);
        let cancel = CancellationToken::new();

        turns.complete(&history("a"), None, &[], &cancel).await.unwrap();
        turns.complete(&history("b"), None, &[], &cancel).await.unwrap();
        let err = turns.complete(&history("c"), None, &[], &cancel).await.unwrap_err();

        assert!(matches!(err, RunError::GlobalIterationExceeded { limit: 2 }));
        assert_eq!(provider.call_count(), 2);
        assert_eq!(turns.turns_used(), 2);
    }

    #[tokio::test]
    async fn provider_errors_map_to_llm_service() {
        let provider = Arc::new(SequentialMockProvider::failing(ProviderError::AuthenticationFailed(
            "bad key".into(),
        )));
        let turns = service(provider, 10);
        let err = turns
            .complete(&history("x"), None, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::LlmService(ProviderError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn cancellation_preempts_pending_call() {
        let provider = Arc::new(SequentialMockProvider::single_text("late"));
        let turns = service(provider, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = turns.complete(&history("x"), None, &[], &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }
}
