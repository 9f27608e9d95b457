//! Resource property types.
//!
//! These are the realized, serializable shapes stored in the graph. Every
//! cross-resource reference is held as the target's logical id together
//! with the attribute that was read from it (name, ARN or id), so the graph
//! is self-contained once finalized.

use authz::types::{PolicyStatement, RolePrincipal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, StackError};

/// What happens to a stateful resource when its stack is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Number,
    Binary,
}

/// One attribute of a table's key schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_type: AttributeType::String,
        }
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_type: AttributeType::Number,
        }
    }
}

/// Keyed data store. The key schema is fixed once declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub table_name: String,
    pub partition_key: KeyAttribute,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub bucket_name: String,
}

/// Runtime a compute unit executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "python3.12")]
    Python312,
    #[serde(rename = "nodejs20.x")]
    Nodejs20,
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
}

impl Runtime {
    pub fn id(&self) -> &'static str {
        match self {
            Runtime::Python312 => "python3.12",
            Runtime::Nodejs20 => "nodejs20.x",
            Runtime::ProvidedAl2023 => "provided.al2023",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A resolved environment variable of a compute unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EnvBinding {
    Literal { value: String },
    /// Physical name of a table declared in the same stack.
    TableName { table: String, value: String },
}

impl EnvBinding {
    pub fn value(&self) -> &str {
        match self {
            EnvBinding::Literal { value } | EnvBinding::TableName { value, .. } => value,
        }
    }
}

/// Stateless invocable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub function_name: String,
    /// Entry point, e.g. `index.handler`.
    pub handler: String,
    pub runtime: Runtime,
    /// Location of the code asset, relative to the project.
    pub code: String,
    pub environment: BTreeMap<String, EnvBinding>,
    /// Logical id of the execution role.
    pub role: String,
    pub role_arn: String,
}

impl Function {
    /// Logical ids of the tables named in the environment.
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        self.environment
            .values()
            .filter_map(|binding| match binding {
                EnvBinding::TableName { table, .. } => Some(table.as_str()),
                EnvBinding::Literal { .. } => None,
            })
            .collect()
    }
}

/// An assumable identity with inline statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_name: String,
    pub assumed_by: RolePrincipal,
    pub statements: Vec<PolicyStatement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_policies: Vec<String>,
}

/// Static permission grant appended to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Logical id of the role receiving the statement.
    pub role: String,
    /// Logical id of the compute unit whose execution role this is.
    pub grantee: String,
    /// Logical id of the resource the statement targets.
    pub target: String,
    pub statement: PolicyStatement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignInAliases {
    pub username: bool,
    pub email: bool,
    pub phone: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoVerify {
    pub email: bool,
    pub phone: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardAttribute {
    pub required: bool,
    pub mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<StandardAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<StandardAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationEmailStyle {
    Code,
    Link,
}

/// Placeholder the verification body must contain in `Code` style.
pub const VERIFICATION_CODE_PLACEHOLDER: &str = "{####}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVerification {
    pub email_subject: String,
    pub email_body: String,
    pub email_style: VerificationEmailStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepOriginal {
    pub email: bool,
    pub phone: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRecovery {
    EmailOnly,
    PhoneOnlyWithoutMfa,
    EmailAndPhoneWithoutMfa,
    None,
}

/// Directory of end users. Exactly one per stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPool {
    pub user_pool_name: String,
    pub user_pool_id: String,
    /// Issuer name other resources use to refer to this pool.
    pub provider_name: String,
    pub sign_in_aliases: SignInAliases,
    pub sign_in_case_sensitive: bool,
    pub self_sign_up_enabled: bool,
    pub auto_verify: AutoVerify,
    pub standard_attributes: StandardAttributes,
    pub user_verification: UserVerification,
    pub keep_original: KeepOriginal,
    pub account_recovery: AccountRecovery,
}

impl UserPool {
    /// Whether the email attribute may change after sign-up.
    pub fn email_mutable(&self) -> bool {
        self.standard_attributes
            .email
            .map(|attr| attr.mutable)
            .unwrap_or(true)
    }
}

/// OAuth scopes a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OAuthScope {
    #[serde(rename = "openid")]
    OpenId,
    #[serde(rename = "phone")]
    Phone,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "profile")]
    Profile,
    #[serde(rename = "aws.cognito.signin.user.admin")]
    CognitoAdmin,
}

impl OAuthScope {
    pub const ALL: [OAuthScope; 5] = [
        OAuthScope::OpenId,
        OAuthScope::Phone,
        OAuthScope::Email,
        OAuthScope::Profile,
        OAuthScope::CognitoAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthScope::OpenId => "openid",
            OAuthScope::Phone => "phone",
            OAuthScope::Email => "email",
            OAuthScope::Profile => "profile",
            OAuthScope::CognitoAdmin => "aws.cognito.signin.user.admin",
        }
    }

    pub fn parse(value: &str) -> Option<OAuthScope> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for OAuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthFlows {
    pub authorization_code_grant: bool,
    pub implicit_code_grant: bool,
    pub client_credentials: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSettings {
    pub flows: OAuthFlows,
    pub scopes: Vec<OAuthScope>,
    pub callback_urls: Vec<String>,
    pub logout_urls: Vec<String>,
}

/// Token lifetimes of a client session.
///
/// Ordering rule: auth-session ≤ id, auth-session ≤ access,
/// id ≤ refresh, access ≤ refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenValidity {
    pub auth_session_minutes: u64,
    pub id_token_minutes: u64,
    pub access_token_minutes: u64,
    pub refresh_token_days: u64,
}

impl Default for TokenValidity {
    fn default() -> Self {
        Self {
            auth_session_minutes: 15,
            id_token_minutes: 60,
            access_token_minutes: 30,
            refresh_token_days: 30,
        }
    }
}

impl TokenValidity {
    pub fn auth_session(&self) -> Duration {
        Duration::from_secs(self.auth_session_minutes * 60)
    }

    pub fn id_token(&self) -> Duration {
        Duration::from_secs(self.id_token_minutes * 60)
    }

    pub fn access_token(&self) -> Duration {
        Duration::from_secs(self.access_token_minutes * 60)
    }

    pub fn refresh_token(&self) -> Duration {
        Duration::from_secs(self.refresh_token_days * 24 * 60 * 60)
    }

    /// Range and ordering checks.
    pub fn validate(&self) -> Result<()> {
        if !(3..=15).contains(&self.auth_session_minutes) {
            return Err(StackError::InvariantViolation(format!(
                "Auth session validity must be between 3 and 15 minutes, got {}",
                self.auth_session_minutes
            )));
        }
        for (label, minutes) in [
            ("ID token", self.id_token_minutes),
            ("Access token", self.access_token_minutes),
        ] {
            if !(5..=24 * 60).contains(&minutes) {
                return Err(StackError::InvariantViolation(format!(
                    "{} validity must be between 5 minutes and 1 day, got {} minutes",
                    label, minutes
                )));
            }
        }
        if !(1..=3650).contains(&self.refresh_token_days) {
            return Err(StackError::InvariantViolation(format!(
                "Refresh token validity must be between 1 day and 10 years, got {} days",
                self.refresh_token_days
            )));
        }

        let auth = self.auth_session();
        let refresh = self.refresh_token();
        for (label, lifetime) in [("ID", self.id_token()), ("access", self.access_token())] {
            if auth > lifetime {
                return Err(StackError::InvariantViolation(format!(
                    "Auth session validity exceeds {} token validity",
                    label
                )));
            }
            if lifetime > refresh {
                return Err(StackError::InvariantViolation(format!(
                    "{} token validity exceeds refresh token validity",
                    label
                )));
            }
        }
        Ok(())
    }
}

/// OAuth-style client of a user pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoolClient {
    /// Logical id of the owning user pool.
    pub user_pool: String,
    pub client_id: String,
    pub client_name: String,
    pub oauth: OAuthSettings,
    pub token_validity: TokenValidity,
}

/// Hosted sign-in domain of a user pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedDomain {
    pub user_pool: String,
    pub domain_prefix: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CognitoIdentityProvider {
    pub client_id: String,
    pub provider_name: String,
}

/// Federation broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPool {
    /// The pool's `ref`, the value trust conditions compare `aud` against.
    pub identity_pool_id: String,
    pub allow_unauthenticated_identities: bool,
    pub cognito_identity_providers: Vec<CognitoIdentityProvider>,
    /// Logical ids of the user pools behind the providers.
    pub user_pools: Vec<String>,
}

/// Attachment of the two trusted roles to an identity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAttachment {
    pub identity_pool: String,
    pub identity_pool_id: String,
    pub authenticated_role: String,
    pub authenticated_role_arn: String,
    pub unauthenticated_role: String,
    pub unauthenticated_role_arn: String,
}

/// Where an authorizer reads the token from.
pub const AUTHORIZATION_HEADER_SOURCE: &str = "method.request.header.Authorization";

/// Request-time validator of user pool tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorizer {
    pub authorizer_id: String,
    /// Logical ids of the bound user pools.
    pub user_pools: Vec<String>,
    /// Issuer names of the bound user pools.
    pub provider_names: Vec<String>,
    pub provider_arns: Vec<String>,
    pub identity_source: String,
}

impl Authorizer {
    pub fn accepts_issuer(&self, issuer: &str) -> bool {
        self.provider_names.iter().any(|name| name == issuer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApi {
    pub rest_api_name: String,
    pub rest_api_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(StackError::InvariantViolation(format!(
                "Unsupported HTTP method: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationType {
    CognitoUserPools,
}

/// A route of a REST API bound to a compute unit through an authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub rest_api: String,
    pub http_method: HttpMethod,
    /// Normalized path, always starting with `/`.
    pub path: String,
    pub function: String,
    pub function_arn: String,
    pub authorizer: String,
    pub authorization_type: AuthorizationType,
    pub authorization_scopes: Vec<String>,
}

/// Type-specific properties of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum ResourceKind {
    Table(Table),
    Bucket(Bucket),
    Function(Function),
    Role(Role),
    PermissionGrant(PermissionGrant),
    UserPool(UserPool),
    UserPoolClient(UserPoolClient),
    UserPoolDomain(HostedDomain),
    IdentityPool(IdentityPool),
    RoleAttachment(RoleAttachment),
    Authorizer(Authorizer),
    RestApi(RestApi),
    Method(Method),
}

impl ResourceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Table(_) => "Table",
            ResourceKind::Bucket(_) => "Bucket",
            ResourceKind::Function(_) => "Function",
            ResourceKind::Role(_) => "Role",
            ResourceKind::PermissionGrant(_) => "PermissionGrant",
            ResourceKind::UserPool(_) => "UserPool",
            ResourceKind::UserPoolClient(_) => "UserPoolClient",
            ResourceKind::UserPoolDomain(_) => "UserPoolDomain",
            ResourceKind::IdentityPool(_) => "IdentityPool",
            ResourceKind::RoleAttachment(_) => "RoleAttachment",
            ResourceKind::Authorizer(_) => "Authorizer",
            ResourceKind::RestApi(_) => "RestApi",
            ResourceKind::Method(_) => "Method",
        }
    }
}

/// A declared resource and its place in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,
    /// Name or id assigned at realization.
    pub physical_id: String,
    pub arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_policy: Option<RemovalPolicy>,
    /// Logical ids this resource reads attributes from.
    pub depends_on: BTreeSet<String>,
    pub kind: ResourceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_token_validity_preserved() {
        let validity = TokenValidity::default();
        assert_eq!(validity.auth_session(), Duration::from_secs(15 * 60));
        assert_eq!(validity.id_token(), Duration::from_secs(60 * 60));
        assert_eq!(validity.access_token(), Duration::from_secs(30 * 60));
        assert_eq!(validity.refresh_token(), Duration::from_secs(30 * 24 * 60 * 60));
        assert!(validity.validate().is_ok());
    }

    #[test]
    fn test_refresh_range_enforced() {
        let validity = TokenValidity {
            access_token_minutes: 24 * 60,
            refresh_token_days: 1,
            ..TokenValidity::default()
        };
        assert!(validity.validate().is_ok());

        let validity = TokenValidity {
            id_token_minutes: 24 * 60,
            refresh_token_days: 0,
            ..TokenValidity::default()
        };
        assert!(matches!(
            validity.validate(),
            Err(StackError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_auth_session_longer_than_access_rejected() {
        let validity = TokenValidity {
            auth_session_minutes: 15,
            access_token_minutes: 10,
            ..TokenValidity::default()
        };
        let err = validity.validate().unwrap_err();
        assert!(err.to_string().contains("access"));
    }

    #[test]
    fn test_auth_session_out_of_range_rejected() {
        let validity = TokenValidity {
            auth_session_minutes: 60,
            ..TokenValidity::default()
        };
        assert!(validity.validate().is_err());
    }

    #[test]
    fn test_scope_strings() {
        assert_eq!(OAuthScope::Email.as_str(), "email");
        assert_eq!(
            OAuthScope::parse("aws.cognito.signin.user.admin"),
            Some(OAuthScope::CognitoAdmin)
        );
        assert_eq!(OAuthScope::parse("admin"), None);
        let json = serde_json::to_string(&OAuthScope::OpenId).unwrap();
        assert_eq!(json, "\"openid\"");
    }

    #[test]
    fn test_http_method_parse() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_runtime_serializes_as_identifier() {
        let json = serde_json::to_string(&Runtime::Python312).unwrap();
        assert_eq!(json, "\"python3.12\"");
    }

    #[test]
    fn test_function_referenced_tables() {
        let function = Function {
            function_name: "fn".to_string(),
            handler: "index.handler".to_string(),
            runtime: Runtime::Python312,
            code: "src".to_string(),
            environment: BTreeMap::from([
                (
                    "DYNAMODB".to_string(),
                    EnvBinding::TableName {
                        table: "myDynamoDb_table".to_string(),
                        value: "items".to_string(),
                    },
                ),
                (
                    "STAGE".to_string(),
                    EnvBinding::Literal {
                        value: "prod".to_string(),
                    },
                ),
            ]),
            role: "fnServiceRole".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/fn".to_string(),
        };
        assert_eq!(
            function.referenced_tables(),
            BTreeSet::from(["myDynamoDb_table"])
        );
    }
}
