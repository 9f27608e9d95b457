//! In-memory user directory
//!
//! Realizes the user pool and its clients from a finalized stack graph:
//! sign-up with emailed confirmation codes, password sign-in, the hosted
//! authorization-code and implicit flows, refresh, account recovery and
//! attribute updates. Issued tokens are opaque random strings; the directory
//! is the only party that can resolve them back to claims.

use chrono::{DateTime, Duration, Utc};
use stack::resources::{
    AccountRecovery, OAuthScope, TokenValidity, UserPool, UserPoolClient,
    VERIFICATION_CODE_PLACEHOLDER,
};
use stack::StackGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::error::{IdentityError, Result};
use crate::secret;
use crate::types::*;

/// How long a sign-up confirmation code stays valid
pub const CONFIRMATION_CODE_HOURS: i64 = 24;

/// How long a password reset code stays valid
pub const RESET_CODE_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CodePurpose {
    SignUp,
    PasswordReset,
    EmailChange,
}

#[derive(Debug, Clone)]
struct PendingCode {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingAuthorization {
    client_id: String,
    redirect_uri: String,
    sub: String,
    scopes: BTreeSet<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<String, UserRecord>,
    /// Normalized sign-in alias to subject id
    aliases: HashMap<String, String>,
    codes: HashMap<(String, CodePurpose), PendingCode>,
    /// Unverified replacement emails, kept apart while the original stays active
    pending_emails: HashMap<String, String>,
    tokens: HashMap<String, TokenClaims>,
    authorizations: HashMap<String, PendingAuthorization>,
}

/// The user directory of one stack
pub struct UserDirectory {
    pool: UserPool,
    clients: BTreeMap<String, UserPoolClient>,
    clock: Arc<dyn Clock>,
    state: RwLock<DirectoryState>,
}

impl UserDirectory {
    /// Build the directory declared in `graph`
    pub fn from_graph(graph: &StackGraph) -> Result<Self> {
        let (pool_resource, pool) = graph.user_pool().ok_or_else(|| {
            IdentityError::Configuration("Stack declares no user pool".to_string())
        })?;

        let clients: BTreeMap<String, UserPoolClient> = graph
            .clients()
            .filter(|(_, c)| c.user_pool == pool_resource.logical_id)
            .map(|(_, c)| (c.client_id.clone(), c.clone()))
            .collect();

        info!(
            "Initializing user directory {} with {} clients",
            pool.user_pool_name,
            clients.len()
        );

        Ok(Self {
            pool: pool.clone(),
            clients,
            clock: Arc::new(SystemClock),
            state: RwLock::new(DirectoryState::default()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool_id(&self) -> &str {
        &self.pool.user_pool_id
    }

    /// Issuer name carried by every token this directory issues
    pub fn provider_name(&self) -> &str {
        &self.pool.provider_name
    }

    pub fn client(&self, client_id: &str) -> Option<&UserPoolClient> {
        self.clients.get(client_id)
    }

    pub fn client_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    fn normalize(&self, alias: &str) -> String {
        let alias = alias.trim();
        if self.pool.sign_in_case_sensitive {
            alias.to_string()
        } else {
            alias.to_lowercase()
        }
    }

    fn find_client(&self, client_id: &str) -> Result<&UserPoolClient> {
        self.clients
            .get(client_id)
            .ok_or_else(|| IdentityError::UnknownClient(client_id.to_string()))
    }

    /// Self-service registration
    ///
    /// When the pool auto-verifies email, the returned outcome carries the
    /// confirmation message that would be sent.
    pub async fn sign_up(&self, username: &str, email: &str, password: &str) -> Result<SignUpOutcome> {
        if !self.pool.self_sign_up_enabled {
            return Err(IdentityError::NotAuthorized(
                "Self sign-up is disabled".to_string(),
            ));
        }
        self.register(username, email, password, false).await
    }

    /// Create a confirmed user with a verified email
    pub async fn admin_create_user(&self, username: &str, email: &str, password: &str) -> Result<String> {
        let outcome = self.register(username, email, password, true).await?;
        Ok(outcome.sub)
    }

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirmed: bool,
    ) -> Result<SignUpOutcome> {
        let email_required = self
            .pool
            .standard_attributes
            .email
            .map(|attr| attr.required)
            .unwrap_or(false);
        if email.trim().is_empty() && (email_required || self.pool.sign_in_aliases.email) {
            return Err(IdentityError::InvalidParameter(
                "email is required".to_string(),
            ));
        }
        if !email.is_empty() && !email.contains('@') {
            return Err(IdentityError::InvalidParameter(format!(
                "Invalid email address: {}",
                email
            )));
        }
        if self.pool.sign_in_aliases.username && username.trim().is_empty() {
            return Err(IdentityError::InvalidParameter(
                "username is required".to_string(),
            ));
        }

        let password_hash = secret::hash_password(password)?;
        let now = self.clock.now();
        let sub = Ulid::new().to_string();

        let mut aliases = Vec::new();
        if self.pool.sign_in_aliases.email {
            aliases.push(self.normalize(email));
        }
        if self.pool.sign_in_aliases.username || aliases.is_empty() {
            aliases.push(self.normalize(username));
        }

        let mut state = self.state.write().await;
        for alias in &aliases {
            if state.aliases.contains_key(alias) {
                warn!("Sign-up rejected, alias already registered");
                return Err(IdentityError::UserExists(alias.clone()));
            }
        }

        let user = UserRecord {
            sub: sub.clone(),
            username: if username.is_empty() {
                sub.clone()
            } else {
                username.to_string()
            },
            email: email.trim().to_string(),
            email_verified: confirmed,
            confirmed,
            password_hash,
            created_at: now,
            updated_at: now,
        };

        for alias in aliases {
            state.aliases.insert(alias, sub.clone());
        }

        let delivery = if !confirmed && self.pool.auto_verify.email {
            Some(self.issue_code(
                &mut state,
                &user,
                CodePurpose::SignUp,
                Duration::hours(CONFIRMATION_CODE_HOURS),
            ))
        } else {
            None
        };
        state.users.insert(sub.clone(), user);

        info!("Registered user {}", sub);
        Ok(SignUpOutcome {
            sub,
            confirmed,
            delivery,
        })
    }

    fn issue_code(
        &self,
        state: &mut DirectoryState,
        user: &UserRecord,
        purpose: CodePurpose,
        validity: Duration,
    ) -> DeliveredMessage {
        self.issue_code_to(state, user, &user.email, purpose, validity)
    }

    fn issue_code_to(
        &self,
        state: &mut DirectoryState,
        user: &UserRecord,
        destination: &str,
        purpose: CodePurpose,
        validity: Duration,
    ) -> DeliveredMessage {
        let code = secret::generate_code();
        state.codes.insert(
            (user.sub.clone(), purpose),
            PendingCode {
                code: code.clone(),
                expires_at: self.clock.now() + validity,
            },
        );

        let verification = &self.pool.user_verification;
        let (subject, body) = match purpose {
            CodePurpose::SignUp | CodePurpose::EmailChange => (
                verification.email_subject.clone(),
                verification
                    .email_body
                    .replace(VERIFICATION_CODE_PLACEHOLDER, &code),
            ),
            CodePurpose::PasswordReset => (
                "Your password reset code".to_string(),
                format!("Your password reset code is {}", code),
            ),
        };
        debug!("Issued {:?} code for {}", purpose, user.sub);

        DeliveredMessage {
            destination: destination.to_string(),
            subject,
            body,
            code,
        }
    }

    fn take_code(
        &self,
        state: &mut DirectoryState,
        sub: &str,
        purpose: CodePurpose,
        code: &str,
    ) -> Result<()> {
        let key = (sub.to_string(), purpose);
        let pending = state.codes.get(&key).ok_or(IdentityError::CodeMismatch)?;
        if pending.code != code || pending.expires_at <= self.clock.now() {
            return Err(IdentityError::CodeMismatch);
        }
        state.codes.remove(&key);
        Ok(())
    }

    fn lookup_sub(&self, state: &DirectoryState, alias: &str) -> Result<String> {
        state
            .aliases
            .get(&self.normalize(alias))
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(alias.to_string()))
    }

    /// Confirm a self-registered user with the emailed code
    pub async fn confirm_sign_up(&self, alias: &str, code: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let sub = self.lookup_sub(&state, alias)?;
        self.take_code(&mut state, &sub, CodePurpose::SignUp, code)?;

        let now = self.clock.now();
        if let Some(user) = state.users.get_mut(&sub) {
            user.confirmed = true;
            user.email_verified = true;
            user.updated_at = now;
        }
        info!("Confirmed user {}", sub);
        Ok(())
    }

    /// Resend the sign-up confirmation code
    pub async fn resend_confirmation_code(&self, alias: &str) -> Result<DeliveredMessage> {
        let mut state = self.state.write().await;
        let sub = self.lookup_sub(&state, alias)?;
        let user = state
            .users
            .get(&sub)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(alias.to_string()))?;
        if user.confirmed {
            return Err(IdentityError::InvalidParameter(
                "User is already confirmed".to_string(),
            ));
        }
        Ok(self.issue_code(
            &mut state,
            &user,
            CodePurpose::SignUp,
            Duration::hours(CONFIRMATION_CODE_HOURS),
        ))
    }

    fn authenticate(&self, state: &DirectoryState, alias: &str, password: &str) -> Result<UserRecord> {
        let Some(sub) = state.aliases.get(&self.normalize(alias)) else {
            warn!("Sign-in failed for unknown alias");
            return Err(IdentityError::InvalidCredentials);
        };
        let user = state
            .users
            .get(sub)
            .ok_or(IdentityError::InvalidCredentials)?;
        if !secret::verify_password(password, &user.password_hash) {
            warn!("Sign-in failed for {}", user.sub);
            return Err(IdentityError::InvalidCredentials);
        }
        if !user.confirmed {
            return Err(IdentityError::UserNotConfirmed(user.sub.clone()));
        }
        Ok(user.clone())
    }

    /// Direct password sign-in
    ///
    /// Tokens from this flow carry only the profile-management scope; the
    /// OAuth scopes are granted through the hosted flows.
    pub async fn initiate_auth(&self, client_id: &str, alias: &str, password: &str) -> Result<TokenSet> {
        let client = self.find_client(client_id)?;
        let mut state = self.state.write().await;
        let user = self.authenticate(&state, alias, password)?;

        let scopes = BTreeSet::from([OAuthScope::CognitoAdmin.as_str().to_string()]);
        let tokens = self.issue_tokens(&mut state, &user, client, scopes, true);
        info!("User {} signed in to client {}", user.sub, client_id);
        Ok(tokens)
    }

    /// Hosted sign-in for the authorization-code and implicit flows
    pub async fn authorize(&self, request: AuthorizeRequest) -> Result<AuthorizeResponse> {
        let client = self.find_client(&request.client_id)?;
        let flows = client.oauth.flows;
        let enabled = match request.response_type {
            ResponseType::Code => flows.authorization_code_grant,
            ResponseType::Token => flows.implicit_code_grant,
        };
        if !enabled {
            return Err(IdentityError::UnsupportedFlow(format!(
                "{:?} for {}",
                request.response_type, request.client_id
            )));
        }
        if !client.oauth.callback_urls.contains(&request.redirect_uri) {
            return Err(IdentityError::InvalidRedirect(request.redirect_uri));
        }
        let scopes = self.grantable_scopes(client, &request.scopes)?;

        let mut state = self.state.write().await;
        let user = self.authenticate(&state, &request.username, &request.password)?;

        match request.response_type {
            ResponseType::Code => {
                let code = secret::generate_token();
                state.authorizations.insert(
                    code.clone(),
                    PendingAuthorization {
                        client_id: request.client_id,
                        redirect_uri: request.redirect_uri.clone(),
                        sub: user.sub.clone(),
                        scopes,
                        expires_at: self.clock.now() + as_chrono(client.token_validity.auth_session()),
                    },
                );
                debug!("Issued authorization code for {}", user.sub);
                Ok(AuthorizeResponse::Code {
                    code,
                    redirect_uri: request.redirect_uri,
                })
            }
            ResponseType::Token => {
                let tokens = self.issue_tokens(&mut state, &user, client, scopes, false);
                Ok(AuthorizeResponse::Tokens {
                    tokens,
                    redirect_uri: request.redirect_uri,
                })
            }
        }
    }

    /// Requested scopes must all be allowed for the client; none requested
    /// means all of them.
    fn grantable_scopes(&self, client: &UserPoolClient, requested: &[String]) -> Result<BTreeSet<String>> {
        if requested.is_empty() {
            return Ok(client
                .oauth
                .scopes
                .iter()
                .map(|s| s.as_str().to_string())
                .collect());
        }
        requested
            .iter()
            .map(|scope| match OAuthScope::parse(scope) {
                Some(parsed) if client.oauth.scopes.contains(&parsed) => Ok(scope.clone()),
                _ => Err(IdentityError::InvalidScope(scope.clone())),
            })
            .collect()
    }

    /// Redeem an authorization code. Codes are single-use and live for the
    /// client's auth-session lifetime.
    pub async fn exchange_code(&self, client_id: &str, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        let client = self.find_client(client_id)?;
        let mut state = self.state.write().await;
        let pending = state
            .authorizations
            .remove(code)
            .ok_or_else(|| IdentityError::InvalidToken("unknown authorization code".to_string()))?;

        if pending.client_id != client_id || pending.redirect_uri != redirect_uri {
            return Err(IdentityError::InvalidToken(
                "authorization code was issued for another client".to_string(),
            ));
        }
        if pending.expires_at <= self.clock.now() {
            return Err(IdentityError::TokenExpired);
        }

        let user = state
            .users
            .get(&pending.sub)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(pending.sub.clone()))?;
        Ok(self.issue_tokens(&mut state, &user, client, pending.scopes, true))
    }

    /// New id and access tokens from a refresh token
    pub async fn refresh(&self, client_id: &str, refresh_token: &str) -> Result<TokenSet> {
        let client = self.find_client(client_id)?;
        let mut state = self.state.write().await;
        let claims = self.claims_of(&state, refresh_token, TokenUse::Refresh)?;
        if claims.client_id != client_id {
            return Err(IdentityError::InvalidToken(
                "refresh token was issued for another client".to_string(),
            ));
        }
        let user = state
            .users
            .get(&claims.sub)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(claims.sub.clone()))?;
        Ok(self.issue_tokens(&mut state, &user, client, claims.scopes, false))
    }

    /// Resolve a token to its claims
    pub async fn validate(&self, token: &str) -> Result<TokenClaims> {
        let state = self.state.read().await;
        let claims = state
            .tokens
            .get(token)
            .ok_or_else(|| IdentityError::InvalidToken("token not issued here".to_string()))?;
        if claims.expires_at <= self.clock.now() {
            return Err(IdentityError::TokenExpired);
        }
        Ok(claims.clone())
    }

    fn claims_of(&self, state: &DirectoryState, token: &str, expected: TokenUse) -> Result<TokenClaims> {
        let claims = state
            .tokens
            .get(token)
            .ok_or_else(|| IdentityError::InvalidToken("token not issued here".to_string()))?;
        if claims.token_use != expected {
            return Err(IdentityError::InvalidToken(format!(
                "expected an {} token",
                expected
            )));
        }
        if claims.expires_at <= self.clock.now() {
            return Err(IdentityError::TokenExpired);
        }
        Ok(claims.clone())
    }

    /// Revoke every token of the access token's user
    pub async fn global_sign_out(&self, access_token: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let claims = self.claims_of(&state, access_token, TokenUse::Access)?;
        state.tokens.retain(|_, c| c.sub != claims.sub);
        info!("Signed out user {} everywhere", claims.sub);
        Ok(())
    }

    /// Start account recovery through the pool's recovery channel
    pub async fn forgot_password(&self, alias: &str) -> Result<DeliveredMessage> {
        let mut state = self.state.write().await;
        let sub = self.lookup_sub(&state, alias)?;
        let user = state
            .users
            .get(&sub)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(alias.to_string()))?;

        match self.pool.account_recovery {
            AccountRecovery::EmailOnly | AccountRecovery::EmailAndPhoneWithoutMfa
                if user.email_verified => {}
            _ => {
                return Err(IdentityError::NotAuthorized(
                    "No verified recovery channel".to_string(),
                ))
            }
        }

        Ok(self.issue_code(
            &mut state,
            &user,
            CodePurpose::PasswordReset,
            Duration::hours(RESET_CODE_HOURS),
        ))
    }

    pub async fn confirm_forgot_password(&self, alias: &str, code: &str, new_password: &str) -> Result<()> {
        let password_hash = secret::hash_password(new_password)?;
        let mut state = self.state.write().await;
        let sub = self.lookup_sub(&state, alias)?;
        self.take_code(&mut state, &sub, CodePurpose::PasswordReset, code)?;

        let now = self.clock.now();
        if let Some(user) = state.users.get_mut(&sub) {
            user.password_hash = password_hash;
            user.updated_at = now;
        }
        state.tokens.retain(|_, c| c.sub != sub);
        info!("Password reset for {}", sub);
        Ok(())
    }

    /// Change the signed-in user's email
    ///
    /// With `keep_original.email`, the old address stays active until the new
    /// one is verified and the returned message carries the code.
    pub async fn update_email(&self, access_token: &str, new_email: &str) -> Result<Option<DeliveredMessage>> {
        if !self.pool.email_mutable() {
            return Err(IdentityError::ImmutableAttribute("email".to_string()));
        }
        if !new_email.contains('@') {
            return Err(IdentityError::InvalidParameter(format!(
                "Invalid email address: {}",
                new_email
            )));
        }

        let mut state = self.state.write().await;
        let claims = self.claims_of(&state, access_token, TokenUse::Access)?;
        let normalized = self.normalize(new_email);
        if state
            .aliases
            .get(&normalized)
            .is_some_and(|owner| owner != &claims.sub)
        {
            return Err(IdentityError::UserExists(normalized));
        }
        let user = state
            .users
            .get(&claims.sub)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(claims.sub.clone()))?;

        if self.pool.keep_original.email {
            state
                .pending_emails
                .insert(user.sub.clone(), new_email.trim().to_string());
            let message = self.issue_code_to(
                &mut state,
                &user,
                new_email.trim(),
                CodePurpose::EmailChange,
                Duration::hours(CONFIRMATION_CODE_HOURS),
            );
            return Ok(Some(message));
        }

        self.replace_email(&mut state, &user.sub, new_email.trim(), false);
        Ok(None)
    }

    /// Verify a pending email change
    pub async fn verify_email(&self, access_token: &str, code: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let claims = self.claims_of(&state, access_token, TokenUse::Access)?;
        self.take_code(&mut state, &claims.sub, CodePurpose::EmailChange, code)?;
        let new_email = state
            .pending_emails
            .remove(&claims.sub)
            .ok_or(IdentityError::CodeMismatch)?;
        self.replace_email(&mut state, &claims.sub, &new_email, true);
        Ok(())
    }

    fn replace_email(&self, state: &mut DirectoryState, sub: &str, new_email: &str, verified: bool) {
        let now = self.clock.now();
        let Some(user) = state.users.get_mut(sub) else {
            return;
        };
        let old_alias = self.normalize(&user.email);
        user.email = new_email.to_string();
        user.email_verified = verified;
        user.updated_at = now;

        if self.pool.sign_in_aliases.email {
            state.aliases.remove(&old_alias);
            state.aliases.insert(self.normalize(new_email), sub.to_string());
        }
    }

    pub async fn get_user(&self, access_token: &str) -> Result<UserRecord> {
        let state = self.state.read().await;
        let claims = self.claims_of(&state, access_token, TokenUse::Access)?;
        state
            .users
            .get(&claims.sub)
            .cloned()
            .ok_or(IdentityError::UserNotFound(claims.sub))
    }

    fn issue_tokens(
        &self,
        state: &mut DirectoryState,
        user: &UserRecord,
        client: &UserPoolClient,
        scopes: BTreeSet<String>,
        with_refresh: bool,
    ) -> TokenSet {
        let now = self.clock.now();
        state.tokens.retain(|_, c| c.expires_at > now);
        state.authorizations.retain(|_, a| a.expires_at > now);

        let validity: TokenValidity = client.token_validity;
        let claims = |token_use: TokenUse, lifetime: std::time::Duration, scopes: BTreeSet<String>| {
            TokenClaims {
                token_use,
                sub: user.sub.clone(),
                email: user.email.clone(),
                iss: self.pool.provider_name.clone(),
                client_id: client.client_id.clone(),
                scopes,
                issued_at: now,
                expires_at: now + as_chrono(lifetime),
            }
        };

        let id_token = secret::generate_token();
        state.tokens.insert(
            id_token.clone(),
            claims(TokenUse::Id, validity.id_token(), BTreeSet::new()),
        );

        let access_token = secret::generate_token();
        state.tokens.insert(
            access_token.clone(),
            claims(TokenUse::Access, validity.access_token(), scopes.clone()),
        );

        let refresh_token = with_refresh.then(|| {
            let token = secret::generate_token();
            state.tokens.insert(
                token.clone(),
                claims(TokenUse::Refresh, validity.refresh_token(), scopes.clone()),
            );
            token
        });

        TokenSet {
            id_token,
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: validity.access_token().as_secs() as i64,
        }
    }
}

fn as_chrono(duration: std::time::Duration) -> Duration {
    Duration::seconds(duration.as_secs() as i64)
}
