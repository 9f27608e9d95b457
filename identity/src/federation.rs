//! Exchange of directory tokens for role credentials
//!
//! The broker realizes identity pools: a caller presents an id token from a
//! registered provider (or nothing, as a guest), receives a stable identity
//! id, and gets temporary credentials for the one role whose trust
//! condition its claims satisfy.

use authz::types::{AuthState, FederatedClaims, PolicyStatement};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stack::resources::{IdentityPool, Role};
use stack::StackGraph;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::directory::UserDirectory;
use crate::error::{IdentityError, Result};
use crate::secret;
use crate::types::TokenUse;

/// Lifetime of issued credentials
pub const CREDENTIALS_VALIDITY_MINUTES: i64 = 60;

/// Credentials for an assumed role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryCredentials {
    pub identity_id: String,
    pub role_arn: String,
    pub auth_state: AuthState,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    /// Statements the credentials carry
    pub statements: Vec<PolicyStatement>,
}

/// A login presented to the broker: provider name and id token
#[derive(Debug, Clone)]
pub struct Login {
    pub provider_name: String,
    pub id_token: String,
}

#[derive(Debug, Clone)]
struct PoolBinding {
    pool: IdentityPool,
    authenticated: (String, Role),
    unauthenticated: (String, Role),
}

/// Identity pools of one stack
pub struct FederationBroker {
    directory: Arc<UserDirectory>,
    pools: BTreeMap<String, PoolBinding>,
}

impl FederationBroker {
    pub fn from_graph(graph: &StackGraph, directory: Arc<UserDirectory>) -> Result<Self> {
        let mut pools = BTreeMap::new();
        for (resource, pool) in graph.identity_pools() {
            let role = |state: AuthState| {
                graph
                    .attached_role(&resource.logical_id, state)
                    .map(|(r, role)| (r.arn.clone(), role.clone()))
                    .ok_or_else(|| {
                        IdentityError::Configuration(format!(
                            "Identity pool {} has no {} role",
                            resource.logical_id, state
                        ))
                    })
            };
            pools.insert(
                pool.identity_pool_id.clone(),
                PoolBinding {
                    pool: pool.clone(),
                    authenticated: role(AuthState::Authenticated)?,
                    unauthenticated: role(AuthState::Unauthenticated)?,
                },
            );
        }
        info!("Federation broker serving {} identity pools", pools.len());
        Ok(Self { directory, pools })
    }

    pub fn pool_ids(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    fn binding(&self, pool_id: &str) -> Result<&PoolBinding> {
        self.pools
            .get(pool_id)
            .ok_or_else(|| IdentityError::NotAuthorized(format!("Unknown identity pool {}", pool_id)))
    }

    /// Resolve the caller to federated claims, checking the login against
    /// the pool's providers.
    async fn claims_for(&self, binding: &PoolBinding, login: Option<&Login>) -> Result<(FederatedClaims, String)> {
        let pool_id = &binding.pool.identity_pool_id;
        let Some(login) = login else {
            if !binding.pool.allow_unauthenticated_identities {
                warn!("Guest access refused by identity pool {}", pool_id);
                return Err(IdentityError::NotAuthorized(
                    "Unauthenticated access is not supported for this identity pool".to_string(),
                ));
            }
            return Ok((FederatedClaims::unauthenticated(pool_id.clone()), "guest".to_string()));
        };

        let claims = self.directory.validate(&login.id_token).await?;
        if claims.token_use != TokenUse::Id {
            return Err(IdentityError::InvalidToken("expected an id token".to_string()));
        }
        let registered = binding.pool.cognito_identity_providers.iter().any(|p| {
            p.provider_name == login.provider_name
                && p.provider_name == claims.iss
                && p.client_id == claims.client_id
        });
        if !registered {
            warn!("Login from unregistered provider {}", login.provider_name);
            return Err(IdentityError::NotAuthorized(format!(
                "Provider {} is not registered with identity pool {}",
                login.provider_name, pool_id
            )));
        }

        let provider_amr = format!("{}:CognitoSignIn:{}", claims.iss, claims.sub);
        Ok((
            FederatedClaims::authenticated(pool_id.clone(), [claims.iss.clone(), provider_amr]),
            claims.sub,
        ))
    }

    /// Stable identity id of the caller within the pool
    pub async fn get_id(&self, pool_id: &str, login: Option<&Login>) -> Result<String> {
        let binding = self.binding(pool_id)?;
        let (_, subject) = self.claims_for(binding, login).await?;
        Ok(identity_id(pool_id, &subject))
    }

    /// Credentials for the role the caller's claims satisfy
    pub async fn get_credentials(&self, pool_id: &str, login: Option<&Login>) -> Result<TemporaryCredentials> {
        let binding = self.binding(pool_id)?;
        let (claims, subject) = self.claims_for(binding, login).await?;

        let (role_arn, role) = match claims.auth_state() {
            AuthState::Authenticated => &binding.authenticated,
            AuthState::Unauthenticated => &binding.unauthenticated,
        };
        let trusted = role
            .assumed_by
            .trust_condition()
            .is_some_and(|condition| condition.is_satisfied_by(&claims));
        if !trusted {
            warn!("Role {} does not trust the presented claims", role_arn);
            return Err(IdentityError::NotAuthorized(format!(
                "Role {} cannot be assumed with these claims",
                role_arn
            )));
        }

        info!(
            "Issued {} credentials for role {}",
            claims.auth_state(),
            role.role_name
        );
        Ok(TemporaryCredentials {
            identity_id: identity_id(pool_id, &subject),
            role_arn: role_arn.clone(),
            auth_state: claims.auth_state(),
            access_key_id: format!("ASIA{}", &secret::generate_token()[..16].to_uppercase()),
            secret_access_key: secret::generate_token(),
            session_token: secret::generate_token(),
            expiration: Utc::now() + Duration::minutes(CREDENTIALS_VALIDITY_MINUTES),
            statements: role.statements.clone(),
        })
    }
}

/// `<region>:<uuid-shaped digest>` of pool and subject
fn identity_id(pool_id: &str, subject: &str) -> String {
    let region = pool_id.split(':').next().unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(pool_id.as_bytes());
    hasher.update(b"/");
    hasher.update(subject.as_bytes());
    let h = hex::encode(hasher.finalize());
    format!(
        "{}:{}-{}-{}-{}-{}",
        region,
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}
