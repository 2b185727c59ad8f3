//! Python environment tools.
//!
//! Discovery, interpreter and package installation, virtual environments and
//! ad hoc scripts. Everything that changes the host asks for approval first;
//! the read-only lookups do not.

use async_trait::async_trait;
use envmedic_core::approval::ApprovalRequest;
use envmedic_core::error::ToolError;
use envmedic_core::tool::{Tool, ToolArgs, ToolContext, ToolDescriptor};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{CommandExecutor, CommandTool, shell_quote};

const PYTHON_EXECUTABLE_HELP: &str = "The Python executable to use (e.g., 'python3', 'python3.9')";

/// Operating system family, which decides how interpreters are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            _ => Self::Other,
        }
    }
}

// --- get_installed_python_versions ---

pub struct GetInstalledPythonVersions {
    descriptor: ToolDescriptor,
    executor: CommandExecutor,
}

impl GetInstalledPythonVersions {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "get_installed_python_versions",
                "Gets the list of installed Python versions on the system.",
            ),
            executor,
        }
    }
}

#[async_trait]
impl Tool for GetInstalledPythonVersions {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        let checks = [
            ("Python 3", "command -v python3 && python3 --version 2>&1 || echo 'Python 3 not found'"),
            ("Python 2", "command -v python2 && python2 --version 2>&1 || echo 'Python 2 not found'"),
            ("Default Python", "command -v python && python --version 2>&1 || echo 'Python command not found'"),
            ("Pyenv versions", "command -v pyenv && pyenv versions || echo 'pyenv not found'"),
        ];

        let mut sections = Vec::with_capacity(checks.len());
        for (title, command) in checks {
            if ctx.cancel.is_cancelled() {
                return Err(ToolError::Cancelled { command: command.into() });
            }
            let result = self.executor.execute_lossy(command, &ctx.cancel).await;
            sections.push(format!("{title}:\n{result}"));
        }
        Ok(format!("Installed Python versions:\n\n{}", sections.join("\n\n")))
    }
}

// --- install_python ---

pub struct InstallPython {
    descriptor: ToolDescriptor,
    executor: CommandExecutor,
    os: HostOs,
}

impl InstallPython {
    pub fn new(executor: CommandExecutor, os: HostOs) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "install_python",
                "Installs Python using the appropriate method for the current operating system.",
            )
            .param("version", "The Python version to install (e.g., '3.9', '3.10', '3.11')")
            .param("purpose", "The purpose or reason of installing python.")
            .requires_approval(),
            executor,
            os,
        }
    }

    /// The commands tried in order; later ones only run when an earlier one
    /// reports a missing package. Empty on Windows, where nothing is run.
    fn commands(&self, version: &str) -> Result<Vec<String>, ToolError> {
        let word = |prefix: &str, suffix: &str| -> Result<String, ToolError> {
            Ok(shell_quote(&format!("{prefix}{version}{suffix}"))?.into_owned())
        };
        Ok(match self.os {
            HostOs::Linux => {
                let packages = format!(
                    "{} {} {}",
                    word("python", "")?,
                    word("python", "-venv")?,
                    word("python", "-dev")?
                );
                vec![
                    format!("apt-get update && apt-get install -y {packages}"),
                    format!("add-apt-repository -y ppa:deadsnakes/ppa && apt-get update && apt-get install -y {packages}"),
                ]
            }
            HostOs::MacOs => vec![format!("brew update && brew install {}", word("python@", "")?)],
            HostOs::Windows => Vec::new(),
            HostOs::Other => vec![format!(
                "command -v pyenv || curl https://pyenv.run | bash && pyenv install {}",
                word("", "")?
            )],
        })
    }

    fn windows_instructions(version: &str) -> String {
        format!(
            "To install Python {version} on Windows, please:\n\n\
             1. Download the installer from https://www.python.org/downloads/\n\
             2. Run the installer and make sure to check \"Add Python to PATH\"\n\n\
             Alternatively, if you have winget installed, you can run:\n\
             winget install Python.Python.{version}\n\n\
             Please run this command in a Windows command prompt or PowerShell."
        )
    }
}

#[async_trait]
impl Tool for InstallPython {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn approval_request(&self, args: &ToolArgs) -> Result<ApprovalRequest, ToolError> {
        let version = args.get("version");
        let action = match self.commands(version)?.as_slice() {
            [] => format!("Show instructions for installing Python {version} (no command is run)"),
            [only] => only.clone(),
            [first, rest @ ..] => format!("{first}\nif the package is not found:\n{}", rest.join("\n")),
        };
        Ok(ApprovalRequest::new(action, args.get("purpose")))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        let version = args.get("version");
        info!(version, os = ?self.os, "Installing Python");

        let mut output = Self::windows_instructions(version);
        for (attempt, command) in self.commands(version)?.iter().enumerate() {
            if attempt > 0 {
                debug!(version, "Package not in default sources, trying deadsnakes PPA");
            }
            output = self.executor.execute(command, &ctx.cancel).await?;
            if !output.contains("E: Unable to locate package") {
                break;
            }
        }
        Ok(output)
    }
}

// --- install_python_package ---

pub struct InstallPythonPackage {
    descriptor: ToolDescriptor,
    executor: CommandExecutor,
}

impl InstallPythonPackage {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            descriptor: ToolDescriptor::new("install_python_package", "Installs a Python package using pip.")
                .param("package_name", "The name of the package to install")
                .optional_param("version", "The version of the package to install", "")
                .optional_param(
                    "python_executable",
                    "The Python executable to use (e.g., 'python', 'python3', 'python3.9')",
                    "python3",
                )
                .requires_approval(),
            executor,
        }
    }

    fn command(args: &ToolArgs) -> Result<String, ToolError> {
        let requirement = match args.get("version") {
            "" => args.get("package_name").to_string(),
            v => format!("{}=={v}", args.get("package_name")),
        };
        Ok(format!(
            "{} -m pip install {}",
            shell_quote(args.get("python_executable"))?,
            shell_quote(&requirement)?
        ))
    }
}

#[async_trait]
impl Tool for InstallPythonPackage {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn approval_request(&self, args: &ToolArgs) -> Result<ApprovalRequest, ToolError> {
        let purpose = match args.get("version") {
            "" => format!("Install Python package {}", args.get("package_name")),
            v => format!("Install Python package {} version {v}", args.get("package_name")),
        };
        Ok(ApprovalRequest::new(Self::command(args)?, purpose))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        self.executor.execute(&Self::command(args)?, &ctx.cancel).await
    }
}

// --- create_virtual_environment ---

pub struct CreateVirtualEnvironment {
    descriptor: ToolDescriptor,
    executor: CommandExecutor,
}

impl CreateVirtualEnvironment {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            descriptor: ToolDescriptor::new("create_virtual_environment", "Creates a Python virtual environment.")
                .param("purpose", "The purpose or reason for creating the virtual environment")
                .param("path", "The path where the virtual environment should be created")
                .optional_param("python_executable", PYTHON_EXECUTABLE_HELP, "python3")
                .requires_approval(),
            executor,
        }
    }

    fn command(args: &ToolArgs) -> Result<String, ToolError> {
        Ok(format!(
            "{} -m venv {}",
            shell_quote(args.get("python_executable"))?,
            shell_quote(args.get("path"))?
        ))
    }
}

#[async_trait]
impl Tool for CreateVirtualEnvironment {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn approval_request(&self, args: &ToolArgs) -> Result<ApprovalRequest, ToolError> {
        Ok(ApprovalRequest::new(Self::command(args)?, args.get("purpose")))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        let command = Self::command(args)?;
        let path = args.get("path");
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.descriptor.name.clone(),
                reason: format!("cannot create {path}: {e}"),
            })?;
        self.executor.execute(&command, &ctx.cancel).await
    }
}

// --- list_installed_packages ---

pub struct ListInstalledPackages {
    descriptor: ToolDescriptor,
    executor: CommandExecutor,
    os: HostOs,
}

impl ListInstalledPackages {
    pub fn new(executor: CommandExecutor, os: HostOs) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "list_installed_packages",
                "Lists installed Python packages in the current environment or a specified virtual environment.",
            )
            .optional_param("python_executable", PYTHON_EXECUTABLE_HELP, "python3")
            .optional_param("virtual_env_path", "The path to the virtual environment (optional)", ""),
            executor,
            os,
        }
    }

    fn command(&self, args: &ToolArgs) -> Result<String, ToolError> {
        Ok(match (args.get("virtual_env_path"), self.os) {
            ("", _) => format!("{} -m pip list", shell_quote(args.get("python_executable"))?),
            (venv, HostOs::Windows) => {
                format!("{} -m pip list", shell_quote(&format!("{venv}\\Scripts\\python.exe"))?)
            }
            (venv, _) => format!(
                "source {} && pip list && deactivate",
                shell_quote(&format!("{venv}/bin/activate"))?
            ),
        })
    }
}

#[async_trait]
impl Tool for ListInstalledPackages {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        self.executor.execute(&self.command(args)?, &ctx.cancel).await
    }
}

// --- check_package_version ---

/// Read-only `pip show`, expressed as a plain command template.
pub fn check_package_version(executor: CommandExecutor) -> CommandTool {
    CommandTool::new(
        ToolDescriptor::new(
            "check_package_version",
            "Checks if a specific Python package is installed and returns its version.",
        )
        .param("package_name", "The name of the package to check")
        .optional_param("python_executable", PYTHON_EXECUTABLE_HELP, "python3"),
        "{python_executable} -m pip show {package_name}",
        executor,
    )
}

// --- run_python_script ---

pub struct RunPythonScript {
    descriptor: ToolDescriptor,
    executor: CommandExecutor,
}

impl RunPythonScript {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "run_python_script",
                "Runs a Python script with the specified Python interpreter.",
            )
            .param("script_content", "The content of the Python script to run")
            .optional_param("python_executable", PYTHON_EXECUTABLE_HELP, "python3")
            .requires_approval(),
            executor,
        }
    }

    fn failed(&self, reason: impl std::fmt::Display) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.descriptor.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// File name derived from the script, so the prompt can name the exact
    /// file before it exists.
    fn script_name(args: &ToolArgs) -> String {
        let mut hasher = DefaultHasher::new();
        args.get("script_content").hash(&mut hasher);
        format!("envmedic_script_{:016x}", hasher.finish())
    }

    fn script_path(args: &ToolArgs) -> PathBuf {
        std::env::temp_dir().join(format!("{}.py", Self::script_name(args)))
    }

    fn command(args: &ToolArgs, script: &Path) -> Result<String, ToolError> {
        let script = script.to_str().ok_or_else(|| {
            ToolError::InvalidArguments(format!("temporary path {} is not UTF-8", script.display()))
        })?;
        Ok(format!(
            "{} {}",
            shell_quote(args.get("python_executable"))?,
            shell_quote(script)?
        ))
    }
}

#[async_trait]
impl Tool for RunPythonScript {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn approval_request(&self, args: &ToolArgs) -> Result<ApprovalRequest, ToolError> {
        Ok(ApprovalRequest::new(
            Self::command(args, &Self::script_path(args))?,
            format!("Execute Python script:\n{}", args.get("script_content")),
        ))
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String, ToolError> {
        // Created exclusively: the same script already running is an error,
        // not a shared file.
        let mut file = tempfile::Builder::new()
            .prefix(&Self::script_name(args))
            .suffix(".py")
            .rand_bytes(0)
            .tempfile_in(std::env::temp_dir())
            .map_err(|e| self.failed(format!("cannot create {}: {e}", Self::script_path(args).display())))?;
        file.write_all(args.get("script_content").as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| self.failed(e))?;

        // Close the handle but keep the file until `script` drops.
        let script = file.into_temp_path();
        let command = Self::command(args, &script)?;
        self.executor.execute(&command, &ctx.cancel).await
    }
}
