//! `agentflux serve`: start the HTTP/SSE gateway.

use agentflux_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        eprintln!("  warning: no API key configured; model calls will fail.");
        eprintln!("  Set AGENTFLUX_API_KEY or add api_key under [adapter] in");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    }

    println!("agentflux gateway");
    println!("   Listening: {}", config.gateway.bind_address());
    println!("   Backend:   {} ({})", config.adapter.provider, config.adapter.model);
    println!("   Max iterations per request: {}", config.agent.max_iterations);

    agentflux_gateway::start(config).await?;

    Ok(())
}
