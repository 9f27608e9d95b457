//! Identity and federation binder.
//!
//! Connects a user pool client to an identity pool and the identity pool to
//! its two trusted roles. The shape is always the same: one pool, one role
//! trusted for `authenticated`, one role trusted for `unauthenticated`, and
//! one attachment naming both.

use authz::types::{AuthState, PolicyStatement, RolePrincipal, TrustCondition};
use std::collections::BTreeSet;
use tracing::info;

use crate::builder::StackBuilder;
use crate::error::{Result, StackError};
use crate::handle::*;
use crate::naming;
use crate::resources::*;

/// Statements a trusted role receives for its auth state.
///
/// Both states may use the sync store; only authenticated callers may manage
/// their federated identity.
pub fn trusted_role_statements(auth_state: AuthState) -> Vec<PolicyStatement> {
    match auth_state {
        AuthState::Authenticated => vec![PolicyStatement::allow(
            ["cognito-sync:*", "cognito-identity:*"],
            ["*"],
        )],
        AuthState::Unauthenticated => vec![PolicyStatement::allow(["cognito-sync:*"], ["*"])],
    }
}

impl StackBuilder {
    /// Declares an identity pool federating `client` of `provider`.
    ///
    /// When `allow_unauthenticated` is set, finalization fails unless an
    /// unauthenticated role is attached.
    pub fn bind_identity_pool(
        &mut self,
        logical_id: &str,
        provider: &UserPoolRef,
        client: &ClientRef,
        allow_unauthenticated: bool,
    ) -> Result<IdentityPoolRef> {
        let provider_resource = self.resolve(provider)?;
        let provider_logical = provider_resource.logical_id.clone();
        let ResourceKind::UserPool(pool) = &provider_resource.kind else {
            return Err(StackError::DanglingReference(provider.to_string()));
        };
        let provider_name = pool.provider_name.clone();

        let client_resource = self.resolve(client)?;
        let client_logical = client_resource.logical_id.clone();
        let ResourceKind::UserPoolClient(c) = &client_resource.kind else {
            return Err(StackError::DanglingReference(client.to_string()));
        };
        if c.user_pool != provider_logical {
            return Err(StackError::InvariantViolation(format!(
                "Client {} belongs to {}, not {}",
                client_logical, c.user_pool, provider_logical
            )));
        }
        let client_id = c.client_id.clone();

        let pool_id =
            naming::identity_pool_id(&self.config().region, self.stack_name(), logical_id);
        let arn = naming::identity_pool_arn(&self.config().region, &self.config().account, &pool_id);

        info!(
            "Binding identity pool {} to {} via client {}",
            logical_id, provider_logical, client_logical
        );
        self.insert(
            logical_id,
            pool_id.clone(),
            arn,
            BTreeSet::from([provider_logical.clone(), client_logical]),
            ResourceKind::IdentityPool(IdentityPool {
                identity_pool_id: pool_id,
                allow_unauthenticated_identities: allow_unauthenticated,
                cognito_identity_providers: vec![CognitoIdentityProvider {
                    client_id,
                    provider_name,
                }],
                user_pools: vec![provider_logical],
            }),
        )
    }

    /// Declares a role that callers federated through `pool` in
    /// `auth_state` may assume.
    ///
    /// Each pool gets exactly one role per state; a second one is a
    /// duplicate binding.
    pub fn create_trusted_role(
        &mut self,
        logical_id: &str,
        pool: &IdentityPoolRef,
        auth_state: AuthState,
    ) -> Result<RoleRef> {
        let pool_resource = self.resolve(pool)?;
        let pool_logical = pool_resource.logical_id.clone();
        let pool_id = pool_resource.physical_id.clone();

        let existing = self.trusted_roles(&pool_id, auth_state);
        if let Some(existing) = existing.first() {
            return Err(StackError::DuplicateBinding(format!(
                "Identity pool {} already trusts {} for {}",
                pool_logical, existing, auth_state
            )));
        }

        let role_name = naming::role_name(self.stack_name(), logical_id);
        let arn = naming::role_arn(&self.config().account, &role_name);
        self.insert(
            logical_id,
            role_name.clone(),
            arn,
            BTreeSet::from([pool_logical]),
            ResourceKind::Role(Role {
                role_name,
                assumed_by: RolePrincipal::cognito_identity(TrustCondition::new(
                    pool_id, auth_state,
                )),
                statements: trusted_role_statements(auth_state),
                managed_policies: Vec::new(),
            }),
        )
    }

    /// Attaches both trusted roles to `pool`.
    ///
    /// Each role must be trusted by this pool for the state it is attached
    /// under. A pool takes exactly one attachment.
    pub fn attach_roles(
        &mut self,
        logical_id: &str,
        pool: &IdentityPoolRef,
        authenticated: &RoleRef,
        unauthenticated: &RoleRef,
    ) -> Result<AttachmentRef> {
        let pool_resource = self.resolve(pool)?;
        let pool_logical = pool_resource.logical_id.clone();
        let pool_id = pool_resource.physical_id.clone();
        let pool_arn = pool_resource.arn.clone();

        if let Some(existing) = self.resources.values().find(|r| {
            matches!(&r.kind, ResourceKind::RoleAttachment(a) if a.identity_pool == pool_logical)
        }) {
            return Err(StackError::DuplicateBinding(format!(
                "Identity pool {} already has attachment {}",
                pool_logical, existing.logical_id
            )));
        }

        let auth_arn = self.check_trusted_role(authenticated, &pool_id, AuthState::Authenticated)?;
        let unauth_arn =
            self.check_trusted_role(unauthenticated, &pool_id, AuthState::Unauthenticated)?;

        info!(
            "Attaching roles {} and {} to identity pool {}",
            authenticated.logical_id(),
            unauthenticated.logical_id(),
            pool_logical
        );
        self.insert(
            logical_id,
            format!("{}-attachment", pool_id),
            format!("{}/roles", pool_arn),
            BTreeSet::from([
                pool_logical.clone(),
                authenticated.logical_id().to_string(),
                unauthenticated.logical_id().to_string(),
            ]),
            ResourceKind::RoleAttachment(RoleAttachment {
                identity_pool: pool_logical,
                identity_pool_id: pool_id,
                authenticated_role: authenticated.logical_id().to_string(),
                authenticated_role_arn: auth_arn,
                unauthenticated_role: unauthenticated.logical_id().to_string(),
                unauthenticated_role_arn: unauth_arn,
            }),
        )
    }

    fn check_trusted_role(&self, role: &RoleRef, pool_id: &str, state: AuthState) -> Result<String> {
        let resource = self.resolve(role)?;
        let ResourceKind::Role(r) = &resource.kind else {
            return Err(StackError::DanglingReference(role.to_string()));
        };
        match r.assumed_by.trust_condition() {
            Some(condition) if condition.pool_id == pool_id && condition.auth_state == state => {
                Ok(resource.arn.clone())
            }
            Some(condition) => Err(StackError::InvariantViolation(format!(
                "Role {} trusts {} for {}, cannot attach it as {}",
                resource.logical_id, condition.pool_id, condition.auth_state, state
            ))),
            None => Err(StackError::InvariantViolation(format!(
                "Role {} is not federated and cannot be attached as {}",
                resource.logical_id, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ClientProps, UserPoolProps};
    use crate::config::StackConfig;

    struct Fixture {
        builder: StackBuilder,
        pool: UserPoolRef,
        client: ClientRef,
    }

    fn fixture() -> Fixture {
        let mut builder = StackBuilder::new(StackConfig::default()).unwrap();
        let pool = builder.user_pool("pool", UserPoolProps::default()).unwrap();
        let client = builder
            .add_client(
                &pool,
                "client",
                ClientProps {
                    client_name: None,
                    oauth: OAuthSettings {
                        flows: OAuthFlows {
                            authorization_code_grant: true,
                            ..OAuthFlows::default()
                        },
                        scopes: vec![OAuthScope::OpenId, OAuthScope::Email],
                        callback_urls: vec!["https://example.com/callback".to_string()],
                        logout_urls: vec![],
                    },
                    token_validity: TokenValidity::default(),
                },
            )
            .unwrap();
        Fixture {
            builder,
            pool,
            client,
        }
    }

    #[test]
    fn test_pool_references_client_and_provider() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, false)
            .unwrap();

        let resource = builder.resolve(&identity_pool).unwrap();
        let ResourceKind::IdentityPool(p) = &resource.kind else {
            panic!("expected an identity pool");
        };
        assert_eq!(p.cognito_identity_providers.len(), 1);
        assert_eq!(p.cognito_identity_providers[0].client_id, client.physical_id());
        assert!(p.cognito_identity_providers[0]
            .provider_name
            .ends_with(pool.physical_id()));
        assert!(!p.allow_unauthenticated_identities);
    }

    #[test]
    fn test_trust_condition_targets_pool_ref() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, false)
            .unwrap();
        let role = builder
            .create_trusted_role("auth", &identity_pool, AuthState::Authenticated)
            .unwrap();

        let ResourceKind::Role(r) = &builder.resolve(&role).unwrap().kind else {
            panic!("expected a role");
        };
        let condition = r.assumed_by.trust_condition().unwrap();
        assert_eq!(condition.pool_id, identity_pool.physical_id());
        assert_eq!(condition.auth_state, AuthState::Authenticated);
    }

    #[test]
    fn test_statement_asymmetry() {
        let auth = trusted_role_statements(AuthState::Authenticated);
        let unauth = trusted_role_statements(AuthState::Unauthenticated);
        let services = |statements: &[PolicyStatement]| -> Vec<String> {
            statements
                .iter()
                .flat_map(|s| s.actions.iter().map(|a| a.as_str().to_string()))
                .collect()
        };
        assert_eq!(services(&auth), vec!["cognito-sync:*", "cognito-identity:*"]);
        assert_eq!(services(&unauth), vec!["cognito-sync:*"]);
    }

    #[test]
    fn test_duplicate_role_for_state_rejected() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, false)
            .unwrap();
        builder
            .create_trusted_role("auth", &identity_pool, AuthState::Authenticated)
            .unwrap();
        let err = builder
            .create_trusted_role("auth2", &identity_pool, AuthState::Authenticated)
            .unwrap_err();
        assert!(matches!(err, StackError::DuplicateBinding(_)));
    }

    #[test]
    fn test_swapped_roles_rejected() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, false)
            .unwrap();
        let auth = builder
            .create_trusted_role("auth", &identity_pool, AuthState::Authenticated)
            .unwrap();
        let unauth = builder
            .create_trusted_role("unauth", &identity_pool, AuthState::Unauthenticated)
            .unwrap();

        let err = builder
            .attach_roles("attachment", &identity_pool, &unauth, &auth)
            .unwrap_err();
        assert!(matches!(err, StackError::InvariantViolation(_)));
    }

    #[test]
    fn test_second_attachment_rejected() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, false)
            .unwrap();
        let auth = builder
            .create_trusted_role("auth", &identity_pool, AuthState::Authenticated)
            .unwrap();
        let unauth = builder
            .create_trusted_role("unauth", &identity_pool, AuthState::Unauthenticated)
            .unwrap();
        builder
            .attach_roles("attachment", &identity_pool, &auth, &unauth)
            .unwrap();
        let err = builder
            .attach_roles("attachment2", &identity_pool, &auth, &unauth)
            .unwrap_err();
        assert!(matches!(err, StackError::DuplicateBinding(_)));
    }

    #[test]
    fn test_pool_without_attachment_fails_finalize() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, true)
            .unwrap();
        builder
            .create_trusted_role("auth", &identity_pool, AuthState::Authenticated)
            .unwrap();
        builder
            .create_trusted_role("unauth", &identity_pool, AuthState::Unauthenticated)
            .unwrap();
        let err = builder.finalize().unwrap_err();
        assert!(matches!(err, StackError::InvariantViolation(_)));
    }

    #[test]
    fn test_unauthenticated_pool_without_unauth_role_fails_finalize() {
        let Fixture {
            mut builder,
            pool,
            client,
        } = fixture();
        let identity_pool = builder
            .bind_identity_pool("identity", &pool, &client, true)
            .unwrap();
        builder
            .create_trusted_role("auth", &identity_pool, AuthState::Authenticated)
            .unwrap();
        let err = builder.finalize().unwrap_err();
        assert!(err.to_string().contains("unauthenticated"));
    }

    #[test]
    fn test_client_of_other_pool_rejected() {
        let Fixture {
            mut builder,
            pool: _,
            client,
        } = fixture();
        let mut other = StackBuilder::new(StackConfig::default()).unwrap();
        let other_pool = other.user_pool("pool", UserPoolProps::default()).unwrap();

        let err = builder
            .bind_identity_pool("identity", &other_pool, &client, false)
            .unwrap_err();
        assert!(matches!(err, StackError::DanglingReference(_)));
    }
}
