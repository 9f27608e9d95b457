use crate::commands::token::DemoUser;
use crate::utils::config_source::load_config;
use anyhow::{anyhow, Result};
use colored::*;
use gateway::{AppState, GatewayConfig};
use stack::blueprint;
use std::path::Path;

/// Run the gateway for the synthesized stack
pub async fn execute(path: Option<&Path>, port: Option<u16>, demo: DemoUser) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(port) = port {
        config = config.with_port(port);
    }
    let gateway_config = GatewayConfig::from(&config);

    let graph = blueprint::synthesize(config)?;
    let state = AppState::in_memory(graph)?;
    let directory = state
        .directory()
        .cloned()
        .ok_or_else(|| anyhow!("The stack declares no user pool"))?;
    demo.register(&directory).await?;

    println!("{}", "=== Stack Gateway ===".bold());
    println!("{}: {}", "Stack".bold(), state.graph.stack_name().cyan());
    println!("{}: {}", "Issuer".bold(), directory.provider_name());
    println!("{}: {}", "Demo user".bold(), demo.email.green());
    for binding in gateway::route_bindings(&state.graph)? {
        println!(
            "  {} -> {} (scopes: {})",
            binding.label().cyan(),
            binding.function,
            binding.scopes.join(", ")
        );
    }
    println!("Listening on http://{}", gateway_config.addr());

    gateway::start_server(state, gateway_config)
        .await
        .map_err(|e| anyhow!("Gateway server error: {}", e))
}
