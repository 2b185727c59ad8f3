//! The envmedic agent: a strategy graph walked by an LLM.
//!
//! The fix-issue strategy drives the model through five stages:
//!
//! 1. **Info collection**: investigate with read-only tools
//! 2. **Hypothesis**: explain what is wrong, no tools
//! 3. **Planning**: describe the fix step by step, no tools
//! 4. **Resolution**: apply the plan, mutating tools behind approval
//! 5. **Verification**: check the issue is gone
//!
//! Every step is reported as an [`AgentEvent`] to the caller's handler.

pub mod engine;
pub mod graph;
pub mod prompts;
pub mod session;
pub mod strategy;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use engine::StrategyEngine;
pub use graph::{Edge, GraphError, Node, NodeOutput, StrategyGraph, StrategyGraphBuilder, Transition};
pub use session::Session;
pub use strategy::fix_issue_strategy;
pub use turn::{TurnOptions, TurnResult, TurnService};

use envmedic_config::AppConfig;
use envmedic_core::approval::{ApprovalGate, Approver};
use envmedic_core::error::RunError;
use envmedic_core::event::{AgentEvent, EventHandler, EventSink, LogHandler};
use envmedic_core::provider::Provider;
use envmedic_tools::{ConfiguredInterpreters, ProcessRunner, SdkCatalog, ShellRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything needed to run fix-issue sessions with one configuration.
///
/// Collaborators default to the real ones (provider from config, shell
/// runner, configured interpreters) and can be replaced for tests or
/// embedding.
pub struct SetupAgent {
    config: AppConfig,
    provider: Option<Arc<dyn Provider>>,
    runner: Option<Arc<dyn ProcessRunner>>,
    catalog: Option<Arc<dyn SdkCatalog>>,
}

impl SetupAgent {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            provider: None,
            runner: None,
            catalog: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_process_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_sdk_catalog(mut self, catalog: Arc<dyn SdkCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one fix-issue session on `issue`.
    ///
    /// `handler` sees every event of the session, ending with exactly one
    /// `RunFinished` or `RunError`. `approver` is asked before any
    /// host-mutating tool runs; concurrent sessions given the same approver
    /// share one interaction thread, so it is never asked twice at once.
    pub async fn run_session(
        &self,
        issue: &str,
        handler: Arc<dyn EventHandler>,
        approver: Arc<dyn Approver>,
        cancel: &CancellationToken,
    ) -> Result<String, RunError> {
        let events = EventSink::new(self.config.events.buffer_capacity.max(1));
        events.subscribe(Arc::new(LogHandler));
        events.subscribe(handler);

        let engine = match self.engine(events.clone(), approver) {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, "Agent could not start");
                events
                    .emit(AgentEvent::RunError {
                        kind: e.kind(),
                        message: e.to_string(),
                    })
                    .await;
                events.flush().await;
                return Err(e);
            }
        };

        engine.run(issue, cancel).await
    }

    fn engine(&self, events: EventSink, approver: Arc<dyn Approver>) -> Result<StrategyEngine, RunError> {
        let provider = match &self.provider {
            Some(provider) => provider.clone(),
            None => {
                self.config
                    .require_api_key()
                    .map_err(|e| RunError::MissingCredential(e.to_string()))?;
                envmedic_providers::build_provider(&self.config)?
            }
        };

        let graph = fix_issue_strategy(self.config.agent.max_subgraph_iterations)
            .map_err(|e| RunError::InvalidStrategy(e.to_string()))?;

        let gate = ApprovalGate::shared(approver).unwrap_or_else(|e| {
            warn!(error = %e, "Approval thread failed to start, denying all mutating tools");
            ApprovalGate::closed()
        });

        let runner: Arc<dyn ProcessRunner> = match &self.runner {
            Some(runner) => runner.clone(),
            None => Arc::new(ShellRunner::new(Duration::from_secs(
                self.config.tools.command_timeout_secs,
            ))),
        };
        let catalog: Arc<dyn SdkCatalog> = match &self.catalog {
            Some(catalog) => catalog.clone(),
            None => Arc::new(ConfiguredInterpreters::from_config(&self.config.interpreters)),
        };
        let registry = envmedic_tools::registry_with_runner(runner, &self.config.tools, catalog, gate);
        info!(
            tools = registry.len(),
            model = %self.config.model,
            provider = provider.name(),
            "Agent ready"
        );

        let options = TurnOptions {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
            max_agent_iterations: self.config.agent.max_agent_iterations,
        };
        let system_prompt = self
            .config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| prompts::SYSTEM_PROMPT.to_string());

        Ok(StrategyEngine::new(graph, provider, options, Arc::new(registry), events)
            .with_system_prompt(system_prompt))
    }
}

/// Run one fix-issue session with the real collaborators from `config`.
pub async fn run_session(
    config: AppConfig,
    issue: &str,
    handler: Arc<dyn EventHandler>,
    approver: Arc<dyn Approver>,
    cancel: &CancellationToken,
) -> Result<String, RunError> {
    SetupAgent::new(config)
        .run_session(issue, handler, approver, cancel)
        .await
}
