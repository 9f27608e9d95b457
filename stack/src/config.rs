//! Stack configuration.
//!
//! Configuration is a single YAML document. Every field has a default that
//! reproduces the reference backend, so an empty file (or no file at all) is
//! a valid configuration. `STACK_*` environment variables override the file.

use crate::error::{Result, StackError};
use crate::resources::{RemovalPolicy, TokenValidity};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_PATH_VAR: &str = "STACK_CONFIG";

/// Configuration for one declared stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Stack name; prefixes every generated physical name.
    pub stack_name: String,
    /// Twelve-digit account id used in ARNs.
    pub account: String,
    pub region: String,
    /// Removal policy applied to every stateful resource.
    pub removal_policy: RemovalPolicy,
    pub user_pool_name: String,
    /// Prefix of the hosted sign-in domain.
    pub domain_prefix: String,
    pub callback_urls: Vec<String>,
    pub logout_urls: Vec<String>,
    pub token_validity: TokenValidity,
    pub allow_unauthenticated_identities: bool,
    /// Port the gateway listens on when served locally.
    pub port: u16,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "CdkStackDavidStack".to_string(),
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            removal_policy: RemovalPolicy::Destroy,
            user_pool_name: "CdkStack18DavidStack_cognito_userPool_fromCdk".to_string(),
            domain_prefix: "cdkstackdavidcogdom".to_string(),
            callback_urls: vec!["https://example.com/callback".to_string()],
            logout_urls: vec!["https://example.com/signout".to_string()],
            token_validity: TokenValidity::default(),
            allow_unauthenticated_identities: false,
            port: 3030,
        }
    }
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| StackError::Configuration(e.to_string()))
    }

    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StackError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Load `.env`, then the file named by `STACK_CONFIG` if set, then apply
    /// `STACK_*` overrides.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `STACK_NAME`, `STACK_ACCOUNT`, `STACK_REGION`,
    /// `STACK_DOMAIN_PREFIX` and `STACK_PORT`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("STACK_NAME") {
            debug!("Overriding stack name from environment");
            self.stack_name = name;
        }
        if let Ok(account) = std::env::var("STACK_ACCOUNT") {
            self.account = account;
        }
        if let Ok(region) = std::env::var("STACK_REGION") {
            self.region = region;
        }
        if let Ok(prefix) = std::env::var("STACK_DOMAIN_PREFIX") {
            self.domain_prefix = prefix;
        }
        if let Ok(port) = std::env::var("STACK_PORT") {
            self.port = port
                .parse()
                .map_err(|_| StackError::Configuration(format!("Invalid STACK_PORT: {}", port)))?;
        }
        Ok(())
    }

    /// Builder-style port override.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check every field that would otherwise only fail at deploy time.
    pub fn validate(&self) -> Result<()> {
        if self.stack_name.is_empty()
            || !self
                .stack_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(StackError::Configuration(format!(
                "Stack name must be non-empty and alphanumeric: {:?}",
                self.stack_name
            )));
        }

        if self.account.len() != 12 || !self.account.chars().all(|c| c.is_ascii_digit()) {
            return Err(StackError::Configuration(format!(
                "Account must be twelve digits: {:?}",
                self.account
            )));
        }

        if self.region.is_empty() {
            return Err(StackError::Configuration(
                "Region cannot be empty".to_string(),
            ));
        }

        validate_domain_prefix(&self.domain_prefix)?;

        for url in self.callback_urls.iter().chain(self.logout_urls.iter()) {
            validate_redirect_url(url)?;
        }

        self.token_validity.validate()
    }
}

pub(crate) fn validate_domain_prefix(prefix: &str) -> Result<()> {
    let well_formed = !prefix.is_empty()
        && prefix.len() <= 63
        && !prefix.starts_with('-')
        && !prefix.ends_with('-')
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !well_formed {
        return Err(StackError::Configuration(format!(
            "Domain prefix must be lowercase letters, digits and hyphens: {:?}",
            prefix
        )));
    }

    for reserved in ["aws", "amazon", "cognito"] {
        if prefix.contains(reserved) {
            return Err(StackError::Configuration(format!(
                "Domain prefix may not contain {:?}",
                reserved
            )));
        }
    }
    Ok(())
}

/// Redirect targets must be HTTPS, except loopback during development.
fn validate_redirect_url(url: &str) -> Result<()> {
    let allowed = url.starts_with("https://")
        || url.starts_with("http://localhost")
        || url.starts_with("http://127.0.0.1");
    if !allowed || url.contains('#') {
        return Err(StackError::Configuration(format!(
            "Invalid callback or logout URL: {}",
            url
        )));
    }
    Ok(())
}
