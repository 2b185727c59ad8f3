//! Built-in tool implementations for envmedic.
//!
//! Tools give the agent the ability to inspect and repair a Python
//! environment: discover interpreters, install interpreters and packages,
//! create virtual environments, run ad hoc scripts and list configured SDKs.
//! Every command runs through a [`ProcessRunner`] so tests can substitute a
//! fake one.

pub mod command;
pub mod process;
pub mod python;
pub mod sdk;

#[cfg(test)]
pub(crate) mod test_support;

use envmedic_config::ToolsConfig;
use envmedic_core::approval::ApprovalGate;
use envmedic_core::tool::{Tool, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

pub use command::{CommandExecutor, CommandTool, shell_quote};
pub use process::{CommandOutput, ProcessRunner, ShellRunner};
pub use python::HostOs;
pub use sdk::{ConfiguredInterpreters, SdkCatalog, SdkEntry};

/// The Python environment tool set, in the order the model sees it.
pub fn python_toolset(
    executor: CommandExecutor,
    catalog: Arc<dyn SdkCatalog>,
    os: HostOs,
) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(python::GetInstalledPythonVersions::new(executor.clone())),
        Arc::new(python::InstallPython::new(executor.clone(), os)),
        Arc::new(python::InstallPythonPackage::new(executor.clone())),
        Arc::new(python::CreateVirtualEnvironment::new(executor.clone())),
        Arc::new(python::ListInstalledPackages::new(executor.clone(), os)),
        Arc::new(python::check_package_version(executor.clone())),
        Arc::new(python::RunPythonScript::new(executor)),
        Arc::new(sdk::ListConfiguredPythonSdks::new(catalog)),
    ]
}

/// Create the default registry: real shell, configured limits, host OS.
pub fn default_registry(
    config: &ToolsConfig,
    catalog: Arc<dyn SdkCatalog>,
    gate: ApprovalGate,
) -> ToolRegistry {
    let runner = Arc::new(ShellRunner::new(Duration::from_secs(config.command_timeout_secs)));
    registry_with_runner(runner, config, catalog, gate)
}

/// Same as [`default_registry`] with a caller-supplied process runner.
pub fn registry_with_runner(
    runner: Arc<dyn ProcessRunner>,
    config: &ToolsConfig,
    catalog: Arc<dyn SdkCatalog>,
    gate: ApprovalGate,
) -> ToolRegistry {
    let executor = CommandExecutor::new(runner, config.max_output_bytes);
    let mut registry = ToolRegistry::new(gate);
    registry.register_all(python_toolset(executor, catalog, HostOs::current()));
    registry
}
