//! Python interpreters known to the host, and the tool that lists them.

use async_trait::async_trait;
use envmedic_config::InterpreterConfig;
use envmedic_core::error::ToolError;
use envmedic_core::tool::{Tool, ToolArgs, ToolContext, ToolDescriptor};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkEntry {
    pub name: String,
    pub home_path: String,
    pub version: Option<String>,
}

impl From<&InterpreterConfig> for SdkEntry {
    fn from(c: &InterpreterConfig) -> Self {
        Self {
            name: c.name.clone(),
            home_path: c.home_path.clone(),
            version: c.version.clone(),
        }
    }
}

/// Source of configured Python SDKs (an IDE's SDK table, a config file).
pub trait SdkCatalog: Send + Sync {
    fn python_sdks(&self) -> Vec<SdkEntry>;
}

/// A fixed list, typically from `[[interpreters]]` in the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredInterpreters(pub Vec<SdkEntry>);

impl ConfiguredInterpreters {
    pub fn from_config(entries: &[InterpreterConfig]) -> Self {
        Self(entries.iter().map(SdkEntry::from).collect())
    }
}

impl SdkCatalog for ConfiguredInterpreters {
    fn python_sdks(&self) -> Vec<SdkEntry> {
        self.0.clone()
    }
}

pub struct ListConfiguredPythonSdks {
    descriptor: ToolDescriptor,
    catalog: Arc<dyn SdkCatalog>,
}

impl ListConfiguredPythonSdks {
    pub fn new(catalog: Arc<dyn SdkCatalog>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "list_configured_python_sdks",
                "Lists all Python SDKs configured for the project.",
            ),
            catalog,
        }
    }
}

#[async_trait]
impl Tool for ListConfiguredPythonSdks {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: &ToolArgs, _ctx: &ToolContext) -> Result<String, ToolError> {
        let sdks = self.catalog.python_sdks();
        if sdks.is_empty() {
            return Ok("No Python SDKs are configured.".into());
        }

        let listing = sdks
            .iter()
            .map(|sdk| {
                format!(
                    "SDK Name: {}\nSDK Home Path: {}\nSDK Version: {}",
                    sdk.name,
                    sdk.home_path,
                    sdk.version.as_deref().unwrap_or("unknown")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(format!("Configured Python SDKs:\n\n{listing}"))
    }
}
