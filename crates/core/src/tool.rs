//! Tool trait and registry, the agent's only way to touch the host.
//!
//! Each tool is an explicit [`ToolDescriptor`] paired with an implementation.
//! The registry looks tools up by name, resolves arguments against the
//! descriptor, routes anything marked `requires_approval` through the
//! [`ApprovalGate`], and always answers with a [`ToolResult`]: unknown tools,
//! bad arguments, denials and execution failures all come back as text the
//! model can read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    /// Value used when the model omits the argument. `None` means required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Static description of a tool, registered once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// True for anything that executes on or changes the host.
    pub requires_approval: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            requires_approval: false,
        }
    }

    /// Add a required parameter.
    pub fn param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameters.push(ToolParameter {
            name: name.into(),
            description: description.into(),
            default: None,
        });
        self
    }

    /// Add a parameter with a default value.
    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        self.parameters.push(ToolParameter {
            name: name.into(),
            description: description.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn requires_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// JSON-schema form sent to the LLM. All parameters are strings.
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = serde_json::json!({
                "type": "string",
                "description": p.description,
            });
            match &p.default {
                Some(default) => prop["default"] = serde_json::json!(default),
                None => required.push(serde_json::json!(p.name)),
            }
            properties.insert(p.name.clone(), prop);
        }

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Resolve raw JSON arguments against the declared parameters.
    pub fn resolve(&self, arguments: &serde_json::Value) -> Result<ToolArgs, ToolError> {
        let object = match arguments {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "expected a JSON object of arguments for '{}', got: {other}",
                    self.name
                )));
            }
        };

        let mut values = Vec::with_capacity(self.parameters.len());
        for p in &self.parameters {
            let provided = object.and_then(|m| m.get(&p.name)).and_then(|v| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });
            let value = match (provided, &p.default) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required argument '{}' for tool '{}'",
                        p.name, self.name
                    )));
                }
            };
            values.push((p.name.clone(), value));
        }
        Ok(ToolArgs { values })
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl From<&MessageToolCall> for ToolInvocation {
    fn from(call: &MessageToolCall) -> Self {
        let arguments = if call.arguments.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()))
        };
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }
}

/// Arguments after defaults were applied, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArgs {
    values: Vec<(String, String)>,
}

impl ToolArgs {
    /// Value of a declared parameter. Empty string for undeclared names.
    pub fn get(&self, name: &str) -> &str {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }
}

impl fmt::Display for ToolArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

/// Outcome tag of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Denied,
    Error,
}

/// The result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    pub status: ToolStatus,

    /// The output content handed back to the model
    pub output: String,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), status: ToolStatus::Success, output: output.into() }
    }

    pub fn denied(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), status: ToolStatus::Denied, output: output.into() }
    }

    pub fn error(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), status: ToolStatus::Error, output: output.into() }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Per-invocation context handed to tools.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Fires when the run is cancelled; long-running tools must stop.
    pub cancel: CancellationToken,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// What the approver is shown. Only consulted when the descriptor
    /// requires approval; an error rejects the call without asking.
    fn approval_request(&self, args: &ToolArgs) -> Result<ApprovalRequest, ToolError> {
        let descriptor = self.descriptor();
        let purpose = match args.get("purpose") {
            "" => descriptor.description.clone(),
            p => p.to_string(),
        };
        Ok(ApprovalRequest::new(format!("{} {args}", descriptor.name), purpose))
    }

    /// Run the tool. Errors are rendered into the result text by the registry.
    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Name → tool map plus the approval gate guarding mutating tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so definitions reach the model deterministically.
    order: Vec<String>,
    gate: ApprovalGate,
}

impl ToolRegistry {
    pub fn new(gate: ApprovalGate) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            gate,
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.order.iter().filter_map(|n| self.tools.get(n)).map(|t| t.descriptor()).collect()
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors().into_iter().map(ToolDescriptor::to_definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool. Never fails: every problem becomes a `ToolResult`.
    pub async fn invoke(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> ToolResult {
        let call_id = invocation.id.as_str();
        let Some(tool) = self.tools.get(&invocation.name) else {
            warn!(tool = %invocation.name, "Model requested an unknown tool");
            return ToolResult::error(call_id, ToolError::NotFound(invocation.name.clone()).to_string());
        };
        let descriptor = tool.descriptor();

        let args = match descriptor.resolve(&invocation.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(call_id, e.to_string()),
        };

        if descriptor.requires_approval {
            let request = match tool.approval_request(&args) {
                Ok(request) => request,
                Err(e) => {
                    warn!(tool = %descriptor.name, error = %e, "Rejected before approval");
                    return ToolResult::error(call_id, e.to_string());
                }
            };
            info!(tool = %descriptor.name, action = %request.action, "Requesting approval");
            match self.gate.confirm(request.clone(), cancel).await {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Denied => {
                    info!(tool = %descriptor.name, "User denied tool execution");
                    return ToolResult::denied(
                        call_id,
                        format!("User denied execution of `{}`", request.action),
                    );
                }
                ApprovalDecision::Cancelled => {
                    return ToolResult::denied(call_id, "approval cancelled: the run is being stopped");
                }
            }
        }

        debug!(tool = %descriptor.name, args = %args, "Executing tool");
        let ctx = ToolContext { cancel: cancel.clone() };
        match tool.execute(&args, &ctx).await {
            Ok(output) => ToolResult::success(call_id, output),
            Err(e) => {
                warn!(tool = %descriptor.name, error = %e, "Tool execution failed");
                ToolResult::error(call_id, e.to_string())
            }
        }
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}
