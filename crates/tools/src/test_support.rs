//! Shared test helpers for tool tests.

use crate::process::{CommandOutput, ProcessRunner};
use async_trait::async_trait;
use envmedic_core::approval::{ApprovalGate, AutoApprove};
use envmedic_core::error::ToolError;
use envmedic_core::tool::{Tool, ToolArgs, ToolContext, ToolRegistry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Records every command and answers from a script, then with exit 0.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<CommandOutput>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_replies(replies: Vec<CommandOutput>) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, command: &str, _cancel: &CancellationToken) -> Result<CommandOutput, ToolError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or(CommandOutput {
            exit_code: Some(0),
            stdout: "ok".into(),
            stderr: String::new(),
        }))
    }
}

pub fn stdout(text: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: text.into(),
        stderr: String::new(),
    }
}

pub fn registry(approve: bool, tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    let gate = if approve {
        ApprovalGate::spawn(Arc::new(AutoApprove)).unwrap()
    } else {
        ApprovalGate::spawn(Arc::new(|_: &str, _: &str| false)).unwrap()
    };
    let mut registry = ToolRegistry::new(gate);
    registry.register_all(tools);
    registry
}

pub fn resolve(tool: &dyn Tool, args: serde_json::Value) -> ToolArgs {
    tool.descriptor().resolve(&args).unwrap()
}

pub fn ctx() -> ToolContext {
    ToolContext::default()
}
