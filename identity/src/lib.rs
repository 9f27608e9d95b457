pub mod clock;
pub mod directory;
pub mod error;
pub mod federation;
pub mod secret;
pub mod types;

pub use directory::UserDirectory;
pub use error::{IdentityError, Result as IdentityResult};
pub use federation::{FederationBroker, Login, TemporaryCredentials};
pub use types::{
    AuthorizeRequest, AuthorizeResponse, DeliveredMessage, ResponseType, SignUpOutcome,
    TokenClaims, TokenSet, TokenUse, UserRecord,
};
