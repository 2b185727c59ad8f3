//! Command tools: a descriptor plus a shell command template.

use async_trait::async_trait;
use envmedic_core::approval::ApprovalRequest;
use envmedic_core::error::ToolError;
use envmedic_core::tool::{Tool, ToolArgs, ToolContext, ToolDescriptor};
use std::borrow::Cow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::process::{DEFAULT_MAX_OUTPUT_BYTES, ProcessRunner};

/// Runs commands and renders their output for the model.
///
/// Shared by every command-backed tool so they all apply the same
/// truncation policy.
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn ProcessRunner>,
    max_output_bytes: usize,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, max_output_bytes: usize) -> Self {
        Self {
            runner,
            max_output_bytes: max_output_bytes.max(1),
        }
    }

    pub fn with_default_limit(runner: Arc<dyn ProcessRunner>) -> Self {
        Self::new(runner, DEFAULT_MAX_OUTPUT_BYTES)
    }

    pub async fn execute(&self, command: &str, cancel: &CancellationToken) -> Result<String, ToolError> {
        let output = self.runner.run(command, cancel).await?;
        Ok(output.render(self.max_output_bytes))
    }

    /// Like [`execute`](Self::execute) but folds errors into the text. For
    /// tools that chain several checks into one answer.
    pub async fn execute_lossy(&self, command: &str, cancel: &CancellationToken) -> String {
        match self.execute(command, cancel).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        }
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}

/// Quote `value` as a single word for the host shell.
///
/// Values that need no quoting come back unchanged. Values the shell cannot
/// carry as one literal word are rejected.
pub fn shell_quote(value: &str) -> Result<Cow<'_, str>, ToolError> {
    if cfg!(windows) {
        cmd_quote(value)
    } else {
        shlex::try_quote(value)
            .map_err(|e| ToolError::InvalidArguments(format!("cannot pass {value:?} to the shell: {e}")))
    }
}

/// `cmd.exe` has no escape for `%`, `!` or `"` inside quotes, so those are
/// refused; everything else is wrapped in double quotes when needed.
fn cmd_quote(value: &str) -> Result<Cow<'_, str>, ToolError> {
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '"' | '%' | '!' | '^') || c.is_control())
    {
        return Err(ToolError::InvalidArguments(format!(
            "cannot pass {value:?} to cmd.exe: contains {c:?}"
        )));
    }
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '\\' | ':' | '@' | '+' | '='));
    if plain {
        Ok(Cow::Borrowed(value))
    } else {
        Ok(Cow::Owned(format!("\"{value}\"")))
    }
}

/// A tool whose whole behavior is one shell command.
///
/// `{name}` placeholders in the template are replaced by the resolved
/// argument of the same name, shell-quoted.
#[derive(Debug)]
pub struct CommandTool {
    descriptor: ToolDescriptor,
    template: String,
    executor: CommandExecutor,
}

impl CommandTool {
    pub fn new(descriptor: ToolDescriptor, template: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            descriptor,
            template: template.into(),
            executor,
        }
    }

    /// Fill the template in one pass, so text inside a substituted value is
    /// never read as a placeholder.
    pub fn render_command(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}').map(|close| (close, &after[..close])) {
                Some((close, name)) if self.descriptor.parameters.iter().any(|p| p.name == name) => {
                    out.push_str(&shell_quote(args.get(name))?);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn approval_request(&self, args: &ToolArgs) -> Result<ApprovalRequest, ToolError> {
        let purpose = match args.get("purpose") {
            "" => self.descriptor.description.clone(),
            p => p.to_string(),
        };
        Ok(ApprovalRequest::new(self.render_command(args)?, purpose))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        let command = self.render_command(args)?;
        self.executor.execute(&command, &ctx.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingRunner, ctx, registry, resolve};
    use envmedic_core::tool::{ToolInvocation, ToolStatus};

    fn pip_show(runner: Arc<RecordingRunner>, approval: bool) -> CommandTool {
        let mut descriptor = ToolDescriptor::new("pip_show", "Show package metadata")
            .param("package", "Package name")
            .optional_param("python", "Interpreter", "python3");
        descriptor.requires_approval = approval;
        CommandTool::new(descriptor, "{python} -m pip show {package}", CommandExecutor::with_default_limit(runner))
    }

    #[tokio::test]
    async fn substituted_command_reaches_runner_once() {
        let runner = RecordingRunner::new();
        let tool = pip_show(runner.clone(), false);
        let args = resolve(&tool, serde_json::json!({"package": "requests"}));

        let text = tool.execute(&args, &ctx()).await.unwrap();
        assert!(text.starts_with("Command execution exit code: 0"));
        assert_eq!(runner.commands(), ["python3 -m pip show requests"]);
    }

    #[test]
    fn approval_shows_the_exact_command() {
        let tool = pip_show(RecordingRunner::new(), true);
        let args = resolve(&tool, serde_json::json!({"package": "numpy", "python": "python3.11"}));
        let request = tool.approval_request(&args).unwrap();
        assert_eq!(request.action, "python3.11 -m pip show numpy");
        assert_eq!(request.purpose, "Show package metadata");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn metacharacters_stay_inside_one_argument() {
        let runner = RecordingRunner::new();
        let tool = pip_show(runner.clone(), false);
        let args = resolve(
            &tool,
            serde_json::json!({"package": "zzz; rm -rf ~ && echo $(id)", "python": "python3"}),
        );

        tool.execute(&args, &ctx()).await.unwrap();
        let command = &runner.commands()[0];
        assert_eq!(
            shlex::split(command).unwrap(),
            ["python3", "-m", "pip", "show", "zzz; rm -rf ~ && echo $(id)"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn substituted_values_are_not_rescanned() {
        let tool = pip_show(RecordingRunner::new(), false);
        let args = resolve(&tool, serde_json::json!({"package": "{python}", "python": "a b"}));
        let command = tool.render_command(&args).unwrap();
        assert_eq!(shlex::split(&command).unwrap(), ["a b", "-m", "pip", "show", "{python}"]);
    }

    #[cfg(unix)]
    #[test]
    fn quoting_leaves_plain_words_alone() {
        assert_eq!(shell_quote("python3.11").unwrap(), "python3.11");
        assert_eq!(shell_quote("/opt/venvs/app").unwrap(), "/opt/venvs/app");
        assert_eq!(shlex::split(&shell_quote("it's").unwrap()).unwrap(), ["it's"]);
        assert!(shell_quote("a\0b").is_err());
    }

    #[test]
    fn cmd_quoting_refuses_unescapable_characters() {
        assert_eq!(cmd_quote("numpy").unwrap(), "numpy");
        assert_eq!(cmd_quote("C:\\Program Files\\Python").unwrap(), "\"C:\\Program Files\\Python\"");
        assert_eq!(cmd_quote("a & b").unwrap(), "\"a & b\"");
        assert!(cmd_quote("%PATH%").is_err());
        assert!(cmd_quote("x\" & calc").is_err());
        assert!(cmd_quote("line\nbreak").is_err());
    }

    #[tokio::test]
    async fn denial_spawns_nothing() {
        let runner = RecordingRunner::new();
        let registry = registry(false, vec![Arc::new(pip_show(runner.clone(), true))]);
        let result = registry
            .invoke(
                &ToolInvocation {
                    id: "c1".into(),
                    name: "pip_show".into(),
                    arguments: serde_json::json!({"package": "numpy"}),
                },
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, ToolStatus::Denied);
        assert!(runner.commands().is_empty());
    }
}
