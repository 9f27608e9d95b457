use crate::{create_router, AppState};
use stack::StackConfig;
use tokio::task::JoinHandle;
use tracing::info;

/// Gateway server configuration
pub struct GatewayConfig {
    /// Port to listen on
    pub port: u16,
    pub host: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl From<&StackConfig> for GatewayConfig {
    fn from(config: &StackConfig) -> Self {
        Self {
            port: config.port,
            ..Self::default()
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serve the stack's routes until the process stops
pub async fn start_server(
    state: AppState,
    config: GatewayConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let stack_name = state.graph.stack_name().to_string();
    let app = create_router(state)?;

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Gateway for {} listening on {}", stack_name, addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Start the gateway in a background task
pub fn spawn_server(state: AppState, config: GatewayConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = start_server(state, config).await {
            tracing::error!("Gateway server error: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_from_stack_config() {
        let stack = StackConfig::default().with_port(8088);
        let config = GatewayConfig::from(&stack);
        assert_eq!(config.port, 8088);
        assert_eq!(config.addr(), "0.0.0.0:8088");
    }
}
