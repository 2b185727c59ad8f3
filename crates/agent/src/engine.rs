//! Walks a strategy graph for one session.
//!
//! The engine owns no per-run state: every `run()` creates a fresh
//! [`Session`] and a fresh [`TurnService`], so the global turn budget and
//! the subgraph counters start at zero each time.

use crate::graph::{Node, NodeOutput, StrategyGraph};
use crate::session::Session;
use crate::turn::{TurnOptions, TurnResult, TurnService};
use envmedic_core::error::{RunError, RunErrorKind};
use envmedic_core::event::{AgentEvent, EventSink, TurnEntry};
use envmedic_core::message::Message;
use envmedic_core::provider::{Provider, ToolDefinition};
use envmedic_core::tool::{ToolInvocation, ToolRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StrategyEngine {
    graph: StrategyGraph,
    provider: Arc<dyn Provider>,
    options: TurnOptions,
    tools: Arc<ToolRegistry>,
    events: EventSink,
    system_prompt: Option<String>,
}

impl StrategyEngine {
    pub fn new(
        graph: StrategyGraph,
        provider: Arc<dyn Provider>,
        options: TurnOptions,
        tools: Arc<ToolRegistry>,
        events: EventSink,
    ) -> Self {
        Self {
            graph,
            provider,
            options,
            tools,
            events,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn graph(&self) -> &StrategyGraph {
        &self.graph
    }

    /// Run the strategy on `input`.
    ///
    /// Emits exactly one terminal event (`RunFinished` or `RunError`) as the
    /// last event of the run, and flushes the sink before returning.
    pub async fn run(&self, input: &str, cancel: &CancellationToken) -> Result<String, RunError> {
        let mut session = Session::new(input);
        info!(
            session_id = %session.id,
            strategy = self.graph.name(),
            "Starting agent run"
        );

        let turns = TurnService::new(self.provider.clone(), self.options.clone());
        let outcome = self.drive(&mut session, &turns, cancel).await.and_then(|()| {
            session
                .result
                .clone()
                .ok_or_else(|| RunError::NoApplicableEdge(session.current.clone()))
        });

        let terminal = match &outcome {
            Ok(result) => {
                info!(session_id = %session.id, turns = turns.turns_used(), "Agent run finished");
                AgentEvent::RunFinished { result: result.clone() }
            }
            Err(RunError::Cancelled) => {
                info!(session_id = %session.id, node = %session.current, "Agent run stopped by cancellation");
                AgentEvent::RunError {
                    kind: RunErrorKind::Cancelled,
                    message: RunError::Cancelled.to_string(),
                }
            }
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    node = %session.current,
                    error = %e,
                    "Agent run failed"
                );
                AgentEvent::RunError {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        self.events.emit(terminal).await;
        self.events.flush().await;
        outcome
    }

    async fn drive(
        &self,
        session: &mut Session,
        turns: &TurnService,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let mut input = session.input.clone();

        loop {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let node = self.graph.node(&session.current).ok_or_else(|| {
                RunError::InvalidStrategy(format!("unknown node '{}'", session.current))
            })?;

            let output = match node {
                Node::Start => NodeOutput::Text(input),
                Node::Finish => {
                    session.result = Some(input);
                    return Ok(());
                }
                Node::Llm { .. } => self.run_llm(session, turns, input, cancel).await?,
                Node::Subgraph { name, task, max_iterations } => {
                    self.run_subgraph(session, turns, name, &input, task, *max_iterations, cancel)
                        .await?
                }
            };

            let (edge, transition) = self
                .graph
                .route(&session.current, &output)
                .ok_or_else(|| RunError::NoApplicableEdge(session.current.clone()))?;

            if let Some(narration) = transition.narration {
                self.events
                    .emit(AgentEvent::StageFinished {
                        stage: narration.stage,
                        text: narration.text,
                    })
                    .await;
            }

            debug!(from = %session.current, to = %edge.to, "Taking edge");
            session.current = edge.to.clone();
            input = transition.input;
        }
    }

    async fn run_llm(
        &self,
        session: &mut Session,
        turns: &TurnService,
        input: String,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, RunError> {
        session.history.push(Message::user(input));
        let turn = self.turn(session, turns, &[], cancel).await?;
        Ok(match turn {
            TurnResult::Assistant { text, .. } => NodeOutput::Text(text),
            TurnResult::ToolCalls { calls, .. } => NodeOutput::ToolCalls(calls),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_subgraph(
        &self,
        session: &mut Session,
        turns: &TurnService,
        name: &str,
        input: &str,
        task: &str,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput, RunError> {
        session.history.push(Message::user(format!("{input}\n\n{task}")));
        let definitions = self.tools.definitions();

        loop {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let turn_no = session.next_subgraph_turn(name);
            let calls = match self.turn(session, turns, &definitions, cancel).await? {
                TurnResult::Assistant { text, .. } => return Ok(NodeOutput::Text(text)),
                TurnResult::ToolCalls { calls, .. } => calls,
            };

            if turn_no >= max_iterations {
                return Err(RunError::IterationExceeded {
                    node: name.to_string(),
                    limit: max_iterations,
                });
            }

            debug!(subgraph = name, turn = turn_no, calls = calls.len(), "Executing tool calls");
            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                let invocation = ToolInvocation::from(call);
                let result = self.tools.invoke(&invocation, cancel).await;
                session
                    .history
                    .push(Message::tool_result(call.id.clone(), result.output.clone()));
                self.events
                    .emit(AgentEvent::ToolCall {
                        tool: invocation.name,
                        arguments: invocation.arguments,
                        result,
                    })
                    .await;
            }
        }
    }

    /// One turn, reported as an `LlmTurn` event and appended to history.
    async fn turn(
        &self,
        session: &mut Session,
        turns: &TurnService,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<TurnResult, RunError> {
        let turn = turns
            .complete(&session.history, self.system_prompt.as_deref(), tools, cancel)
            .await?;

        let message = turn.message();
        let mut entries = Vec::with_capacity(message.tool_calls.len() + 1);
        if !message.content.is_empty() {
            entries.push(TurnEntry::Message {
                content: message.content.clone(),
            });
        }
        entries.extend(message.tool_calls.iter().map(|call| TurnEntry::Call {
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
        }));
        self.events
            .emit(AgentEvent::LlmTurn {
                assistant_messages: entries,
                invoked_tools: message.tool_calls.iter().map(|c| c.name.clone()).collect(),
            })
            .await;

        session.history.push(message.clone());
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, FINISH, START, StrategyGraphBuilder};
    use crate::test_helpers::{
        SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response,
    };
    use async_trait::async_trait;
    use envmedic_core::approval::{ApprovalGate, AutoApprove};
    use envmedic_core::error::{RunErrorKind, ToolError};
    use envmedic_core::event::EventLog;
    use envmedic_core::message::Role;
    use envmedic_core::tool::{Tool, ToolArgs, ToolContext, ToolDescriptor, ToolStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo(ToolDescriptor);

    impl Echo {
        fn new() -> Self {
            Self(ToolDescriptor::new("echo", "Echo the text back").param("text", "Text to echo"))
        }
    }

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext) -> Result<String, ToolError> {
            Ok(args.get("text").to_string())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let gate = ApprovalGate::spawn(Arc::new(AutoApprove)).unwrap();
        let mut registry = ToolRegistry::new(gate);
        registry.register(Arc::new(Echo::new()));
        Arc::new(registry)
    }

    fn single_llm() -> StrategyGraph {
        StrategyGraphBuilder::new("single")
            .llm("think")
            .edge(Edge::new(START, "think"))
            .edge(Edge::new("think", FINISH))
            .build()
            .unwrap()
    }

    fn single_subgraph(max_iterations: u32) -> StrategyGraph {
        StrategyGraphBuilder::new("loop")
            .subgraph("work", "Do the work", max_iterations)
            .edge(Edge::new(START, "work"))
            .edge(Edge::new("work", FINISH))
            .build()
            .unwrap()
    }

    fn engine(
        graph: StrategyGraph,
        provider: Arc<SequentialMockProvider>,
        options: TurnOptions,
    ) -> (StrategyEngine, EventLog) {
        let sink = EventSink::new(16);
        let log = EventLog::new();
        sink.subscribe(Arc::new(log.clone()));
        let engine = StrategyEngine::new(graph, provider, options, registry(), sink);
        (engine, log)
    }

    fn assert_single_terminal_last(log: &EventLog) {
        let events = log.events();
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn llm_node_result_reaches_finish() {
        let provider = Arc::new(SequentialMockProvider::single_text("answer"));
        let (engine, log) = engine(single_llm(), provider.clone(), TurnOptions::default());
        let engine = engine.with_system_prompt("system");

        let result = engine.run("question", &CancellationToken::new()).await.unwrap();
        assert_eq!(result, "answer");

        let request = provider.last_request().unwrap();
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "question");
        assert!(request.tools.is_empty());

        let events = log.events();
        assert!(matches!(events[0].as_ref(), AgentEvent::LlmTurn { invoked_tools, .. } if invoked_tools.is_empty()));
        assert!(matches!(events[1].as_ref(), AgentEvent::RunFinished { result } if result == "answer"));
        assert_single_terminal_last(&log);
    }

    #[tokio::test]
    async fn subgraph_runs_tools_until_text() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("echo", json!({"text": "hi"}))], "checking"),
            make_text_response("done"),
        ]));
        let (engine, log) = engine(single_subgraph(5), provider.clone(), TurnOptions::default());

        let result = engine.run("issue", &CancellationToken::new()).await.unwrap();
        assert_eq!(result, "done");

        let requests = provider.requests();
        assert_eq!(requests[0].messages[0].content, "issue\n\nDo the work");
        assert_eq!(requests[0].tools.len(), 1);
        let tool_msg = requests[1].messages.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.content, "hi");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_echo"));

        let events = log.events();
        assert_eq!(events.len(), 4);
        match events[0].as_ref() {
            AgentEvent::LlmTurn { assistant_messages, invoked_tools } => {
                assert_eq!(invoked_tools, &["echo"]);
                assert_eq!(
                    assistant_messages[0],
                    TurnEntry::Message { content: "checking".into() }
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
        match events[1].as_ref() {
            AgentEvent::ToolCall { tool, arguments, result } => {
                assert_eq!(tool, "echo");
                assert_eq!(arguments, &json!({"text": "hi"}));
                assert_eq!(result.status, ToolStatus::Success);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_single_terminal_last(&log);
    }

    #[tokio::test]
    async fn always_calling_tools_exceeds_subgraph_cap() {
        let provider = Arc::new(SequentialMockProvider::always(make_tool_call_response(
            vec![make_tool_call("echo", json!({"text": "again"}))],
            "",
        )));
        let (engine, log) = engine(single_subgraph(3), provider.clone(), TurnOptions::default());

        let err = engine.run("issue", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunError::IterationExceeded { ref node, limit: 3 } if node == "work"));
        assert_eq!(provider.call_count(), 3);

        let tool_calls = log
            .events()
            .iter()
            .filter(|e| matches!(e.as_ref(), AgentEvent::ToolCall { .. }))
            .count();
        assert_eq!(tool_calls, 2);
        assert!(matches!(
            log.events().last().unwrap().as_ref(),
            AgentEvent::RunError { kind: RunErrorKind::IterationExceeded, .. }
        ));
        assert_single_terminal_last(&log);
    }

    #[tokio::test]
    async fn global_budget_stops_the_session() {
        let provider = Arc::new(SequentialMockProvider::always(make_tool_call_response(
            vec![make_tool_call("echo", json!({"text": "again"}))],
            "",
        )));
        let options = TurnOptions {
            max_agent_iterations: 2,
            ..TurnOptions::default()
        };
        let (engine, _log) = engine(single_subgraph(10), provider.clone(), options);

        let err = engine.run("issue", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunError::GlobalIterationExceeded { limit: 2 }));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn tool_calls_from_llm_node_have_no_edge() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("echo", json!({"text": "x"}))],
            "",
        )]));
        let (engine, log) = engine(single_llm(), provider, TurnOptions::default());

        let err = engine.run("question", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunError::NoApplicableEdge(ref node) if node == "think"));
        assert_single_terminal_last(&log);
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancelled() {
        let provider = Arc::new(SequentialMockProvider::single_text("never"));
        let (engine, log) = engine(single_llm(), provider.clone(), TurnOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.run("question", &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(provider.call_count(), 0);

        let events = log.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref(),
            AgentEvent::RunError { kind: RunErrorKind::Cancelled, .. }
        ));
    }

    /// Counts its runs and cancels the session's token on the first one.
    struct StopButton {
        descriptor: ToolDescriptor,
        cancel: CancellationToken,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Tool for StopButton {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _args: &ToolArgs, _ctx: &ToolContext) -> Result<String, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Ok("stopping".into())
        }
    }

    #[tokio::test]
    async fn cancellation_mid_batch_skips_remaining_calls() {
        let cancel = CancellationToken::new();
        let stop = Arc::new(StopButton {
            descriptor: ToolDescriptor::new("stop", "Stops the run"),
            cancel: cancel.clone(),
            runs: AtomicUsize::new(0),
        });
        let mut tools = ToolRegistry::new(ApprovalGate::spawn(Arc::new(AutoApprove)).unwrap());
        tools.register(stop.clone());

        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![
                make_tool_call("stop", json!({})),
                make_tool_call("stop", json!({})),
                make_tool_call("stop", json!({})),
            ],
            "",
        )]));
        let sink = EventSink::new(16);
        let log = EventLog::new();
        sink.subscribe(Arc::new(log.clone()));
        let engine = StrategyEngine::new(
            single_subgraph(5),
            provider.clone(),
            TurnOptions::default(),
            Arc::new(tools),
            sink,
        );

        let err = engine.run("issue", &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(stop.runs.load(Ordering::SeqCst), 1);
        assert_eq!(provider.call_count(), 1);

        let tool_calls = log
            .events()
            .iter()
            .filter(|e| matches!(e.as_ref(), AgentEvent::ToolCall { .. }))
            .count();
        assert_eq!(tool_calls, 1);
        assert!(matches!(
            log.events().last().unwrap().as_ref(),
            AgentEvent::RunError { kind: RunErrorKind::Cancelled, .. }
        ));
        assert_single_terminal_last(&log);
    }

    #[tokio::test]
    async fn each_run_gets_a_fresh_budget() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("first"),
            make_text_response("second"),
        ]));
        let options = TurnOptions {
            max_agent_iterations: 1,
            ..TurnOptions::default()
        };
        let (engine, _log) = engine(single_llm(), provider, options);
        let cancel = CancellationToken::new();

        assert_eq!(engine.run("a", &cancel).await.unwrap(), "first");
        assert_eq!(engine.run("b", &cancel).await.unwrap(), "second");
    }
}
