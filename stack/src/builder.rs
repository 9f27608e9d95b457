//! The explicit declaration context.
//!
//! Every resource is declared through a [`StackBuilder`]. Declaring returns a
//! typed handle; later declarations take those handles to read the
//! identifiers they depend on. Nothing is global: two builders never share
//! state, and a handle from one is rejected by the other.
//!
//! The binders for federation, endpoints and grants live in their own
//! modules as further `impl StackBuilder` blocks.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use ulid::Ulid;

use crate::config::{validate_domain_prefix, StackConfig};
use crate::error::{Result, StackError};
use crate::graph::StackGraph;
use crate::handle::*;
use crate::naming;
use crate::resources::*;

/// Service that assumes compute execution roles.
pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Managed policy every execution role carries for log delivery.
pub const BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Key schema of a table.
#[derive(Debug, Clone)]
pub struct TableProps {
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
}

/// Environment variable value of a compute unit before realization.
#[derive(Debug, Clone)]
pub enum EnvValue {
    Literal(String),
    TableName(TableRef),
}

#[derive(Debug, Clone)]
pub struct FunctionProps {
    pub handler: String,
    pub runtime: Runtime,
    pub code: String,
    pub environment: BTreeMap<String, EnvValue>,
}

impl FunctionProps {
    pub fn new(handler: impl Into<String>, runtime: Runtime, code: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            runtime,
            code: code.into(),
            environment: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .insert(key.into(), EnvValue::Literal(value.into()));
        self
    }

    /// Expose a table's physical name under `key`.
    pub fn env_table_name(mut self, key: impl Into<String>, table: &TableRef) -> Self {
        self.environment
            .insert(key.into(), EnvValue::TableName(table.clone()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct UserPoolProps {
    pub user_pool_name: Option<String>,
    pub sign_in_aliases: SignInAliases,
    pub sign_in_case_sensitive: bool,
    pub self_sign_up_enabled: bool,
    pub auto_verify: AutoVerify,
    pub standard_attributes: StandardAttributes,
    pub user_verification: UserVerification,
    pub keep_original: KeepOriginal,
    pub account_recovery: AccountRecovery,
}

impl Default for UserPoolProps {
    fn default() -> Self {
        Self {
            user_pool_name: None,
            sign_in_aliases: SignInAliases {
                username: true,
                ..SignInAliases::default()
            },
            sign_in_case_sensitive: true,
            self_sign_up_enabled: false,
            auto_verify: AutoVerify::default(),
            standard_attributes: StandardAttributes::default(),
            user_verification: UserVerification {
                email_subject: "Verify your new account".to_string(),
                email_body: format!(
                    "The verification code to your new account is {}",
                    VERIFICATION_CODE_PLACEHOLDER
                ),
                email_style: VerificationEmailStyle::Code,
            },
            keep_original: KeepOriginal::default(),
            account_recovery: AccountRecovery::EmailOnly,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientProps {
    pub client_name: Option<String>,
    pub oauth: OAuthSettings,
    pub token_validity: TokenValidity,
}

/// Explicit builder context for one stack.
pub struct StackBuilder {
    config: StackConfig,
    id: Ulid,
    pub(crate) resources: BTreeMap<String, Resource>,
}

impl StackBuilder {
    /// Validates `config` and opens an empty declaration pass.
    pub fn new(config: StackConfig) -> Result<Self> {
        config.validate()?;
        info!("Opening declaration pass for stack {}", config.stack_name);
        Ok(Self {
            config,
            id: Ulid::new(),
            resources: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub(crate) fn stack_name(&self) -> &str {
        &self.config.stack_name
    }

    /// Looks up the resource behind a handle, failing on foreign or
    /// mismatched handles.
    pub(crate) fn resolve<K: Kind>(&self, handle: &ResourceRef<K>) -> Result<&Resource> {
        if handle.owner() != self.id {
            return Err(StackError::DanglingReference(format!(
                "{} was declared by another stack",
                handle
            )));
        }
        let resource = self.resources.get(handle.logical_id()).ok_or_else(|| {
            StackError::DanglingReference(format!("{} is not declared", handle))
        })?;
        if !K::matches(&resource.kind) {
            return Err(StackError::DanglingReference(format!(
                "{} resolves to a {}",
                handle,
                resource.kind.type_name()
            )));
        }
        Ok(resource)
    }

    pub(crate) fn resolve_mut<K: Kind>(&mut self, handle: &ResourceRef<K>) -> Result<&mut Resource> {
        self.resolve(handle)?;
        self.resources.get_mut(handle.logical_id()).ok_or_else(|| {
            StackError::DanglingReference(format!("{} is not declared", handle))
        })
    }

    /// Registers a realized resource and returns its handle.
    pub(crate) fn insert<K: Kind>(
        &mut self,
        logical_id: &str,
        physical_id: String,
        arn: String,
        depends_on: BTreeSet<String>,
        kind: ResourceKind,
    ) -> Result<ResourceRef<K>> {
        validate_logical_id(logical_id)?;
        if self.resources.contains_key(logical_id) {
            return Err(StackError::DuplicateId(logical_id.to_string()));
        }
        for dependency in &depends_on {
            if !self.resources.contains_key(dependency) {
                return Err(StackError::DanglingReference(format!(
                    "{} depends on undeclared {}",
                    logical_id, dependency
                )));
            }
        }

        debug!(
            "Declared {} {} ({})",
            kind.type_name(),
            logical_id,
            physical_id
        );
        let handle = ResourceRef::new(self.id, logical_id, &physical_id, &arn);
        self.resources.insert(
            logical_id.to_string(),
            Resource {
                logical_id: logical_id.to_string(),
                physical_id,
                arn,
                removal_policy: Some(self.config.removal_policy),
                depends_on,
                kind,
            },
        );
        Ok(handle)
    }

    /// Declares a keyed table.
    pub fn table(&mut self, logical_id: &str, props: TableProps) -> Result<TableRef> {
        if props.partition_key.name.is_empty() {
            return Err(StackError::InvariantViolation(
                "Partition key name cannot be empty".to_string(),
            ));
        }
        if let Some(sort_key) = &props.sort_key {
            if sort_key.name.is_empty() || sort_key.name == props.partition_key.name {
                return Err(StackError::InvariantViolation(format!(
                    "Sort key of {} must be named and differ from the partition key",
                    logical_id
                )));
            }
        }

        let name = naming::physical_name(self.stack_name(), logical_id);
        let arn = naming::table_arn(&self.config.region, &self.config.account, &name);
        self.insert(
            logical_id,
            name.clone(),
            arn,
            BTreeSet::new(),
            ResourceKind::Table(Table {
                table_name: name,
                partition_key: props.partition_key,
                sort_key: props.sort_key,
            }),
        )
    }

    /// Declares an object bucket.
    pub fn bucket(&mut self, logical_id: &str) -> Result<BucketRef> {
        let name = naming::lowercase_name(self.stack_name(), logical_id);
        let arn = naming::bucket_arn(&name);
        self.insert(
            logical_id,
            name.clone(),
            arn,
            BTreeSet::new(),
            ResourceKind::Bucket(Bucket { bucket_name: name }),
        )
    }

    /// Declares a compute unit together with its execution role.
    ///
    /// The execution role starts without statements; data access comes only
    /// from [`StackBuilder::grant`].
    pub fn function(&mut self, logical_id: &str, props: FunctionProps) -> Result<FunctionRef> {
        if props.handler.is_empty() {
            return Err(StackError::InvariantViolation(format!(
                "Function {} needs an entry point",
                logical_id
            )));
        }

        let mut depends_on = BTreeSet::new();
        let mut environment = BTreeMap::new();
        for (key, value) in props.environment {
            let binding = match value {
                EnvValue::Literal(value) => EnvBinding::Literal { value },
                EnvValue::TableName(table) => {
                    let resource = self.resolve(&table)?;
                    depends_on.insert(resource.logical_id.clone());
                    EnvBinding::TableName {
                        table: resource.logical_id.clone(),
                        value: resource.physical_id.clone(),
                    }
                }
            };
            environment.insert(key, binding);
        }

        let role_id = format!("{}ServiceRole", logical_id);
        let role_name = naming::role_name(self.stack_name(), &role_id);
        let role_arn = naming::role_arn(&self.config.account, &role_name);
        self.insert::<RoleKind>(
            &role_id,
            role_name.clone(),
            role_arn.clone(),
            BTreeSet::new(),
            ResourceKind::Role(Role {
                role_name,
                assumed_by: authz::types::RolePrincipal::service(LAMBDA_SERVICE_PRINCIPAL),
                statements: Vec::new(),
                managed_policies: vec![BASIC_EXECUTION_POLICY.to_string()],
            }),
        )?;
        depends_on.insert(role_id.clone());

        let name = naming::physical_name(self.stack_name(), logical_id);
        let arn = naming::function_arn(&self.config.region, &self.config.account, &name);
        self.insert(
            logical_id,
            name.clone(),
            arn,
            depends_on,
            ResourceKind::Function(Function {
                function_name: name,
                handler: props.handler,
                runtime: props.runtime,
                code: props.code,
                environment,
                role: role_id,
                role_arn,
            }),
        )
    }

    /// Handle to a function's execution role.
    pub fn execution_role(&self, function: &FunctionRef) -> Result<RoleRef> {
        let resource = self.resolve(function)?;
        let ResourceKind::Function(f) = &resource.kind else {
            return Err(StackError::DanglingReference(function.to_string()));
        };
        let role = self.resources.get(&f.role).ok_or_else(|| {
            StackError::DanglingReference(format!("execution role {} is not declared", f.role))
        })?;
        Ok(ResourceRef::new(
            self.id,
            &role.logical_id,
            &role.physical_id,
            &role.arn,
        ))
    }

    /// Declares the stack's user directory. Only one may exist.
    pub fn user_pool(&mut self, logical_id: &str, props: UserPoolProps) -> Result<UserPoolRef> {
        if let Some(existing) = self
            .resources
            .values()
            .find(|r| matches!(r.kind, ResourceKind::UserPool(_)))
        {
            return Err(StackError::InvariantViolation(format!(
                "Stack already declares user pool {}",
                existing.logical_id
            )));
        }

        if props.user_verification.email_style == VerificationEmailStyle::Code
            && !props
                .user_verification
                .email_body
                .contains(VERIFICATION_CODE_PLACEHOLDER)
        {
            return Err(StackError::InvariantViolation(format!(
                "Verification email body must contain {}",
                VERIFICATION_CODE_PLACEHOLDER
            )));
        }
        if props.keep_original.email && !props.auto_verify.email {
            return Err(StackError::InvariantViolation(
                "keep_original.email requires auto_verify.email".to_string(),
            ));
        }
        if props.keep_original.phone && !props.auto_verify.phone {
            return Err(StackError::InvariantViolation(
                "keep_original.phone requires auto_verify.phone".to_string(),
            ));
        }

        let pool_id = naming::user_pool_id(&self.config.region, self.stack_name(), logical_id);
        let arn = naming::user_pool_arn(&self.config.region, &self.config.account, &pool_id);
        let provider_name = naming::user_pool_provider_name(&self.config.region, &pool_id);
        let user_pool_name = props
            .user_pool_name
            .unwrap_or_else(|| naming::physical_name(self.stack_name(), logical_id));

        self.insert(
            logical_id,
            pool_id.clone(),
            arn,
            BTreeSet::new(),
            ResourceKind::UserPool(UserPool {
                user_pool_name,
                user_pool_id: pool_id,
                provider_name,
                sign_in_aliases: props.sign_in_aliases,
                sign_in_case_sensitive: props.sign_in_case_sensitive,
                self_sign_up_enabled: props.self_sign_up_enabled,
                auto_verify: props.auto_verify,
                standard_attributes: props.standard_attributes,
                user_verification: props.user_verification,
                keep_original: props.keep_original,
                account_recovery: props.account_recovery,
            }),
        )
    }

    /// Declares an OAuth client of `pool`.
    pub fn add_client(
        &mut self,
        pool: &UserPoolRef,
        logical_id: &str,
        props: ClientProps,
    ) -> Result<ClientRef> {
        let pool_resource = self.resolve(pool)?;
        let pool_logical = pool_resource.logical_id.clone();
        let pool_arn = pool_resource.arn.clone();

        props.token_validity.validate()?;

        let flows = props.oauth.flows;
        if flows.authorization_code_grant || flows.implicit_code_grant {
            if props.oauth.callback_urls.is_empty() {
                return Err(StackError::InvariantViolation(format!(
                    "Client {} enables browser flows without a callback URL",
                    logical_id
                )));
            }
            if props.oauth.scopes.is_empty() {
                return Err(StackError::InvariantViolation(format!(
                    "Client {} enables browser flows without scopes",
                    logical_id
                )));
            }
        }

        let client_id = naming::client_id(self.stack_name(), logical_id);
        let client_name = props
            .client_name
            .unwrap_or_else(|| logical_id.to_string());
        let mut scopes = props.oauth.scopes;
        scopes.sort();
        scopes.dedup();

        self.insert(
            logical_id,
            client_id.clone(),
            format!("{}/client/{}", pool_arn, client_id),
            BTreeSet::from([pool_logical.clone()]),
            ResourceKind::UserPoolClient(UserPoolClient {
                user_pool: pool_logical,
                client_id,
                client_name,
                oauth: OAuthSettings {
                    scopes,
                    ..props.oauth
                },
                token_validity: props.token_validity,
            }),
        )
    }

    /// Declares the hosted sign-in domain of `pool`.
    pub fn add_domain(
        &mut self,
        pool: &UserPoolRef,
        logical_id: &str,
        domain_prefix: &str,
    ) -> Result<DomainRef> {
        validate_domain_prefix(domain_prefix)?;
        let pool_logical = self.resolve(pool)?.logical_id.clone();

        if self.resources.values().any(|r| {
            matches!(&r.kind, ResourceKind::UserPoolDomain(d) if d.user_pool == pool_logical)
        }) {
            return Err(StackError::DuplicateBinding(format!(
                "User pool {} already has a hosted domain",
                pool_logical
            )));
        }

        let base_url = naming::hosted_domain_url(domain_prefix, &self.config.region);
        self.insert(
            logical_id,
            domain_prefix.to_string(),
            base_url.clone(),
            BTreeSet::from([pool_logical.clone()]),
            ResourceKind::UserPoolDomain(HostedDomain {
                user_pool: pool_logical,
                domain_prefix: domain_prefix.to_string(),
                base_url,
            }),
        )
    }

    /// Declares a REST API that methods are bound to.
    pub fn rest_api(&mut self, logical_id: &str) -> Result<RestApiRef> {
        let api_id = naming::short_id(self.stack_name(), logical_id);
        let arn = naming::rest_api_arn(&self.config.region, &api_id);
        self.insert(
            logical_id,
            api_id.clone(),
            arn,
            BTreeSet::new(),
            ResourceKind::RestApi(RestApi {
                rest_api_name: logical_id.to_string(),
                rest_api_id: api_id,
            }),
        )
    }

    /// Closes the declaration pass.
    ///
    /// Checks the invariants that can only be judged on the complete graph
    /// and returns the immutable result.
    pub fn finalize(mut self) -> Result<StackGraph> {
        self.check_grants()?;
        self.check_identity_pools()?;
        self.check_method_scopes()?;

        for resource in self.resources.values_mut() {
            if let ResourceKind::Role(role) = &mut resource.kind {
                role.statements.sort();
                role.statements.dedup();
            }
        }

        let graph = StackGraph::new(
            self.config.stack_name.clone(),
            self.config.region.clone(),
            self.config.account.clone(),
            self.resources,
        );
        graph.topological_order()?;

        info!(
            "Finalized stack {} with {} resources",
            graph.stack_name(),
            graph.len()
        );
        Ok(graph)
    }

    /// Every table a function reads from its environment must be bound by
    /// exactly one grant.
    fn check_grants(&self) -> Result<()> {
        for resource in self.resources.values() {
            let ResourceKind::Function(function) = &resource.kind else {
                continue;
            };
            for table in function.referenced_tables() {
                let grants = self
                    .resources
                    .values()
                    .filter(|r| {
                        matches!(&r.kind, ResourceKind::PermissionGrant(g)
                            if g.grantee == resource.logical_id && g.target == table)
                    })
                    .count();
                if grants != 1 {
                    return Err(StackError::InvariantViolation(format!(
                        "Function {} references table {} but has {} grants on it",
                        resource.logical_id, table, grants
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_identity_pools(&self) -> Result<()> {
        for resource in self.resources.values() {
            let ResourceKind::IdentityPool(pool) = &resource.kind else {
                continue;
            };

            for state in authz::types::AuthState::ALL {
                let trusted = self.trusted_roles(&pool.identity_pool_id, state).len();
                if trusted != 1 {
                    return Err(StackError::InvariantViolation(format!(
                        "Identity pool {} needs exactly one {} role, found {}",
                        resource.logical_id, state, trusted
                    )));
                }
            }

            // Attachments hold one role per auth state.
            let attached = self.resources.values().any(|r| {
                matches!(&r.kind, ResourceKind::RoleAttachment(a)
                    if a.identity_pool == resource.logical_id)
            });
            if !attached {
                return Err(StackError::InvariantViolation(format!(
                    "Identity pool {} has no role attachment",
                    resource.logical_id
                )));
            }
        }
        Ok(())
    }

    /// Logical ids of roles whose trust condition targets `pool_id` in `state`.
    pub(crate) fn trusted_roles(
        &self,
        pool_id: &str,
        state: authz::types::AuthState,
    ) -> Vec<String> {
        self.resources
            .values()
            .filter_map(|r| match &r.kind {
                ResourceKind::Role(role) => role
                    .assumed_by
                    .trust_condition()
                    .filter(|c| c.pool_id == pool_id && c.auth_state == state)
                    .map(|_| r.logical_id.clone()),
                _ => None,
            })
            .collect()
    }
}

fn validate_logical_id(logical_id: &str) -> Result<()> {
    let valid = !logical_id.is_empty()
        && logical_id.len() <= 255
        && logical_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(StackError::InvariantViolation(format!(
            "Invalid logical id: {:?}",
            logical_id
        )));
    }
    Ok(())
}
