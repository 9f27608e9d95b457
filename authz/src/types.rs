//! Policy model shared by the declaration graph and the runtime.
//!
//! Two kinds of authorization live in this module and they are deliberately
//! kept apart:
//!
//! - **Permission statements** ([`PolicyStatement`]) are attached to roles and
//!   say which actions a role may perform on which resources.
//! - **Trust conditions** ([`TrustCondition`]) are attached to federated roles
//!   and say which callers may assume the role in the first place.
//!
//! A caller that can assume a role only ever gains that role's statements.
//! Nothing in this module lets a caller identity borrow the statements of a
//! compute unit's execution role.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Federation service that brokers identity pool credentials.
pub const COGNITO_IDENTITY_PRINCIPAL: &str = "cognito-identity.amazonaws.com";

/// Whether a statement grants or removes access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Effect {
    Allow,
    Deny,
}

/// An IAM-style action pattern such as `dynamodb:*` or `cognito-sync:ListRecords`.
///
/// `*` inside the pattern matches any run of characters, so `dynamodb:*`
/// covers every DynamoDB action and a bare `*` covers everything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPattern(String);

impl ActionPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Wildcard over every action of one service prefix.
    pub fn service_wildcard(service: &str) -> Self {
        Self(format!("{}:*", service))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Service prefix of the pattern, if it has one.
    pub fn service(&self) -> Option<&str> {
        self.0.split_once(':').map(|(service, _)| service)
    }

    /// Case-insensitive wildcard match of a concrete action. Only used to
    /// cross-check the Cedar rendering; access decisions go through
    /// [`crate::PolicyEngine`].
    #[cfg(test)]
    pub fn matches(&self, action: &str) -> bool {
        wildcard_match(&self.0.to_ascii_lowercase(), &action.to_ascii_lowercase())
    }
}

impl fmt::Display for ActionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single permission statement attached to a role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<ActionPattern>,
    /// Resource ARNs or ARN patterns; `*` means every resource.
    pub resources: Vec<String>,
}

impl PolicyStatement {
    /// Creates an `Allow` statement.
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(ActionPattern::new).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a `Deny` statement.
    pub fn deny<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Deny,
            ..Self::allow(actions, resources)
        }
    }

    /// True when the statement names `arn` literally in its resource list.
    ///
    /// A `*` resource does not count as a mention. Whether `*` actually grants
    /// access depends on the actions and is answered by the policy engine.
    pub fn mentions_resource(&self, arn: &str) -> bool {
        self.resources.iter().any(|r| r == arn)
    }

    /// Local evaluation of one statement against one request, used to
    /// cross-check [`crate::PolicyEngine`] in tests.
    #[cfg(test)]
    pub fn applies_to(&self, action: &str, resource_arn: &str) -> bool {
        self.actions.iter().any(|a| a.matches(action))
            && self
                .resources
                .iter()
                .any(|r| wildcard_match(r, resource_arn))
    }
}

/// Authentication state a federated caller presents to an identity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
}

impl AuthState {
    pub const ALL: [AuthState; 2] = [AuthState::Authenticated, AuthState::Unauthenticated];

    /// The `amr` claim value for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Authenticated => "authenticated",
            AuthState::Unauthenticated => "unauthenticated",
        }
    }

    pub fn opposite(&self) -> AuthState {
        match self {
            AuthState::Authenticated => AuthState::Unauthenticated,
            AuthState::Unauthenticated => AuthState::Authenticated,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims presented by the federation broker when a caller asks to assume a role.
///
/// `amr` is set-valued. It always carries exactly one of the two auth-state
/// markers, plus the provider names that vouched for the caller when the
/// caller is authenticated. The fields are private so that invariant cannot
/// be broken from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FederatedClaims {
    aud: String,
    amr: BTreeSet<String>,
}

impl FederatedClaims {
    /// Claims for a caller that signed in through one of `providers`.
    pub fn authenticated<I, S>(pool_id: impl Into<String>, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut amr: BTreeSet<String> = providers
            .into_iter()
            .map(Into::into)
            .filter(|p| AuthState::ALL.iter().all(|s| s.as_str() != p.as_str()))
            .collect();
        amr.insert(AuthState::Authenticated.as_str().to_string());
        Self {
            aud: pool_id.into(),
            amr,
        }
    }

    /// Claims for a guest caller.
    pub fn unauthenticated(pool_id: impl Into<String>) -> Self {
        Self {
            aud: pool_id.into(),
            amr: BTreeSet::from([AuthState::Unauthenticated.as_str().to_string()]),
        }
    }

    pub fn aud(&self) -> &str {
        &self.aud
    }

    pub fn amr(&self) -> &BTreeSet<String> {
        &self.amr
    }

    /// The single auth state carried in `amr`.
    pub fn auth_state(&self) -> AuthState {
        if self.amr.contains(AuthState::Authenticated.as_str()) {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        }
    }
}

/// Trust condition of a federated role.
///
/// Equivalent to the pair
/// `StringEquals { aud: pool_id }` and
/// `ForAnyValue:StringLike { amr: auth_state }`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrustCondition {
    pub pool_id: String,
    pub auth_state: AuthState,
}

impl TrustCondition {
    pub fn new(pool_id: impl Into<String>, auth_state: AuthState) -> Self {
        Self {
            pool_id: pool_id.into(),
            auth_state,
        }
    }

    /// `aud` must equal the pool id exactly.
    pub fn audience_matches(&self, claims: &FederatedClaims) -> bool {
        claims.aud == self.pool_id
    }

    /// ForAnyValue semantics: satisfied when any member of the set-valued
    /// `amr` claim matches the expected auth state.
    pub fn amr_matches(&self, claims: &FederatedClaims) -> bool {
        claims
            .amr
            .iter()
            .any(|value| wildcard_match(self.auth_state.as_str(), value))
    }

    pub fn is_satisfied_by(&self, claims: &FederatedClaims) -> bool {
        self.audience_matches(claims) && self.amr_matches(claims)
    }
}

/// Who may assume a role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolePrincipal {
    /// A platform service, e.g. `lambda.amazonaws.com` for execution roles.
    Service { service: String },
    /// Callers federated through an identity pool.
    Federated {
        federated: String,
        condition: TrustCondition,
    },
}

impl RolePrincipal {
    pub fn service(service: impl Into<String>) -> Self {
        RolePrincipal::Service {
            service: service.into(),
        }
    }

    pub fn cognito_identity(condition: TrustCondition) -> Self {
        RolePrincipal::Federated {
            federated: COGNITO_IDENTITY_PRINCIPAL.to_string(),
            condition,
        }
    }

    pub fn trust_condition(&self) -> Option<&TrustCondition> {
        match self {
            RolePrincipal::Federated { condition, .. } => Some(condition),
            RolePrincipal::Service { .. } => None,
        }
    }
}

/// Represents a principal making an authorization request.
///
/// For this workspace the principal is always a role: either a compute
/// unit's execution role or a federated role assumed through an identity pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Role ARN or another stable identifier.
    pub id: String,

    /// The Cedar entity type, `Role` for everything this workspace builds.
    pub entity_type: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
        }
    }

    pub fn role(arn: impl Into<String>) -> Self {
        Self::new(arn, "Role")
    }
}

/// Glob match where `*` matches any run of characters and `?` one character.
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = vi;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            vi = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
