//! `ralph-arena serve`: Start the HTTP API server.

use arena_config::AppConfig;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    println!("Ralph Arena");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:      {}", config.default_model);
    println!("   Storage:    {}", config.storage.backend);
    if config.rate_limit.enabled {
        println!(
            "   Rate limit: {} iterations / {}s per client",
            config.rate_limit.requests_per_hour, config.rate_limit.window_secs
        );
    } else {
        println!("   Rate limit: off");
    }

    arena_gateway::start(config).await?;

    Ok(())
}
