//! `envmedic config`: configuration management commands.

use envmedic_config::AppConfig;

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");
            if config.require_api_key().is_err() {
                println!("   Warning: no API token set (ENVMEDIC_API_KEY, OPENAI_API_KEY or OPENAI_TOKEN)");
            }
            println!();
            println!("   Endpoint:      {}", config.api_url);
            println!("   Model:         {}", config.model);
            println!(
                "   Turn limits:   {} per session, {} per stage",
                config.agent.max_agent_iterations, config.agent.max_subgraph_iterations
            );
            println!("   Cmd timeout:   {}s", config.tools.command_timeout_secs);
            println!("   Interpreters:  {}", config.interpreters.len());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    println!("{}", redacted_toml(config)?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn default() {
    println!("{}", AppConfig::default_toml());
}

fn redacted_toml(mut config: AppConfig) -> anyhow::Result<String> {
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    Ok(toml::to_string_pretty(&config)?)
}
