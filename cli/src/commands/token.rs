use crate::utils::config_source::load_config;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::*;
use identity::{AuthorizeRequest, AuthorizeResponse, ResponseType, TokenSet, UserDirectory};
use stack::blueprint;
use std::path::Path;
use tracing::info;

/// Account created in the in-memory directory
#[derive(Args, Debug, Clone)]
pub struct DemoUser {
    #[arg(long, env = "STACK_DEMO_USERNAME", default_value = "demo")]
    pub username: String,

    #[arg(long, env = "STACK_DEMO_EMAIL", default_value = "demo@example.com")]
    pub email: String,

    #[arg(long, env = "STACK_DEMO_PASSWORD", default_value = "demo-password")]
    pub password: String,
}

impl DemoUser {
    /// Create the account, already confirmed
    pub async fn register(&self, directory: &UserDirectory) -> Result<String> {
        let sub = directory
            .admin_create_user(&self.username, &self.email, &self.password)
            .await
            .with_context(|| format!("Failed to create demo user {}", self.email))?;
        info!("Demo user {} ready", self.email);
        Ok(sub)
    }

    /// Sign in directly, or through the hosted implicit flow when scopes
    /// are requested.
    pub async fn sign_in(&self, directory: &UserDirectory, scopes: &[String]) -> Result<TokenSet> {
        let client_id = directory
            .client_ids()
            .next()
            .ok_or_else(|| anyhow!("The stack declares no user pool client"))?
            .to_string();

        if scopes.is_empty() {
            return Ok(directory
                .initiate_auth(&client_id, &self.email, &self.password)
                .await?);
        }

        let redirect_uri = directory
            .client(&client_id)
            .and_then(|client| client.oauth.callback_urls.first().cloned())
            .ok_or_else(|| anyhow!("Client {} has no callback URL", client_id))?;
        let response = directory
            .authorize(AuthorizeRequest {
                client_id,
                redirect_uri,
                response_type: ResponseType::Token,
                scopes: scopes.to_vec(),
                username: self.email.clone(),
                password: self.password.clone(),
            })
            .await?;
        match response {
            AuthorizeResponse::Tokens { tokens, .. } => Ok(tokens),
            AuthorizeResponse::Code { .. } => Err(anyhow!("Expected tokens from the implicit flow")),
        }
    }
}

/// Sign the demo user in against a fresh directory and print its tokens
pub async fn execute(
    path: Option<&Path>,
    scopes: &[String],
    demo: DemoUser,
    format: &str,
) -> Result<()> {
    let config = load_config(path)?;
    let graph = blueprint::synthesize(config)?;
    let directory = UserDirectory::from_graph(&graph)?;

    demo.register(&directory).await?;
    let tokens = demo.sign_in(&directory, scopes).await?;

    match format {
        "text" => {
            println!("{}", "=== Tokens ===".bold());
            println!("{}: {}", "Issuer".bold(), directory.provider_name().cyan());
            println!("{}: {}", "ID token".bold(), tokens.id_token);
            println!("{}: {}", "Access token".bold(), tokens.access_token);
            if let Some(refresh) = &tokens.refresh_token {
                println!("{}: {}", "Refresh token".bold(), refresh);
            }
            println!("{}: {}s", "Expires in".bold(), tokens.expires_in);
        }
        _ => println!("{}", serde_json::to_string_pretty(&tokens)?),
    }

    Ok(())
}
