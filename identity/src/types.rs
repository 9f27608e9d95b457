//! Directory records and token types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A registered end user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable subject id
    pub sub: String,
    pub username: String,
    /// Email as entered at sign-up
    pub email: String,
    pub email_verified: bool,
    pub confirmed: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which of the three session tokens a value is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Id,
    Access,
    Refresh,
}

impl std::fmt::Display for TokenUse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenUse::Id => write!(f, "id"),
            TokenUse::Access => write!(f, "access"),
            TokenUse::Refresh => write!(f, "refresh"),
        }
    }
}

/// What the directory knows about an issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub token_use: TokenUse,
    pub sub: String,
    pub email: String,
    /// Provider name of the issuing directory
    pub iss: String,
    pub client_id: String,
    /// Granted scopes; only access tokens carry any
    pub scopes: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenClaims {
    pub fn has_any_scope<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> bool {
        required.into_iter().any(|scope| self.scopes.contains(scope))
    }
}

/// Tokens handed to a client after a successful sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    /// Absent for the implicit flow and for refreshes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// A message the directory would deliver to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub destination: String,
    pub subject: String,
    pub body: String,
    /// The code embedded in the body, exposed for local delivery
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpOutcome {
    pub sub: String,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveredMessage>,
}

/// `response_type` of a hosted sign-in request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Authorization code flow
    Code,
    /// Implicit flow
    Token,
}

/// A hosted sign-in request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: ResponseType,
    pub scopes: Vec<String>,
    pub username: String,
    pub password: String,
}

/// Result of a hosted sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizeResponse {
    Code { code: String, redirect_uri: String },
    Tokens { tokens: TokenSet, redirect_uri: String },
}
