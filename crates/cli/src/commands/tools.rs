//! `envmedic tools`: list the tools the agent may call.

use std::sync::Arc;

use envmedic_config::AppConfig;
use envmedic_core::approval::ApprovalGate;
use envmedic_core::tool::ToolDescriptor;
use envmedic_tools::ConfiguredInterpreters;

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let catalog = Arc::new(ConfiguredInterpreters::from_config(&config.interpreters));
    let registry = envmedic_tools::default_registry(&config.tools, catalog, ApprovalGate::closed());

    println!("Available tools ({}):", registry.len());
    for descriptor in registry.descriptors() {
        println!();
        print!("{}", describe(descriptor));
    }
    println!();
    println!("Tools marked [approval] ask before they run (skip with `fix --yes`).");
    Ok(())
}

fn describe(descriptor: &ToolDescriptor) -> String {
    let mut out = format!("  {}", descriptor.name);
    if descriptor.requires_approval {
        out.push_str(" [approval]");
    }
    out.push('\n');
    out.push_str(&format!("    {}\n", descriptor.description));
    for p in &descriptor.parameters {
        match &p.default {
            Some(d) if d.is_empty() => out.push_str(&format!("    - {} (optional): {}\n", p.name, p.description)),
            Some(d) => out.push_str(&format!("    - {} (default: {d}): {}\n", p.name, p.description)),
            None => out.push_str(&format!("    - {}: {}\n", p.name, p.description)),
        }
    }
    out
}
