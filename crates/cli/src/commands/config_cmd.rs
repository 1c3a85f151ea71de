//! `agentflux config`: print the effective configuration.

use agentflux_config::AppConfig;

pub fn show(defaults: bool) -> Result<(), Box<dyn std::error::Error>> {
    if defaults {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", render(&config)?);
    Ok(())
}

/// TOML for `config` with the API key masked.
fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.adapter.api_key.is_some() {
        shown.adapter.api_key = Some("********".into());
    }
    toml::to_string_pretty(&shown)
}
