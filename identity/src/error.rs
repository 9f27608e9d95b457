use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User is not confirmed: {0}")]
    UserNotConfirmed(String),

    #[error("Invalid or expired code")]
    CodeMismatch,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Flow not enabled for client: {0}")]
    UnsupportedFlow(String),

    #[error("Scope not allowed: {0}")]
    InvalidScope(String),

    #[error("Redirect URI not registered: {0}")]
    InvalidRedirect(String),

    #[error("Attribute cannot be changed: {0}")]
    ImmutableAttribute(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
