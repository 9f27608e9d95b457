//! The reference backend: a table read by a scan function, a user directory
//! with one OAuth client, an identity pool with two trusted roles, and a
//! `GET /scan` route guarded by the directory's tokens.
//!
//! Declaration is split into three planes so callers can interleave them in
//! any dependency-consistent order. [`synthesize`] runs all three.

use authz::types::AuthState;

use crate::builder::{
    ClientProps, FunctionProps, StackBuilder, TableProps, UserPoolProps,
};
use crate::config::StackConfig;
use crate::error::Result;
use crate::graph::StackGraph;
use crate::handle::*;
use crate::resources::*;

/// Logical ids of the reference backend.
pub mod ids {
    pub const TABLE: &str = "myDynamoDb_table";
    pub const BUCKET: &str = "MyBucketTest";
    pub const FUNCTION: &str = "myLambda_function";
    pub const USER_POOL: &str = "myCognito_userPool";
    pub const CLIENT: &str = "myAppClient_cdkStack18David";
    pub const DOMAIN: &str = "myDomain";
    pub const IDENTITY_POOL: &str = "MyCognito_IdentityPool";
    pub const UNAUTHENTICATED_ROLE: &str = "myUnauthenticatedRole_RestApi";
    pub const AUTHENTICATED_ROLE: &str = "myAuthenticatedRole_RestApi";
    pub const ATTACHMENT: &str = "myDefaultPolicy";
    pub const AUTHORIZER: &str = "myAuthenticator";
    pub const REST_API: &str = "myRestApi";
}

/// Environment variable carrying the table name into the scan function.
pub const TABLE_ENV: &str = "DYNAMODB";
pub const SCAN_PATH: &str = "/scan";
pub const SCAN_SCOPE: &str = "email";
pub const SCAN_HANDLER: &str = "index.handler";

pub struct DataPlane {
    pub table: TableRef,
    pub bucket: BucketRef,
    pub function: FunctionRef,
    pub grant: GrantRef,
}

pub struct IdentityPlane {
    pub user_pool: UserPoolRef,
    pub client: ClientRef,
    pub domain: DomainRef,
    pub identity_pool: IdentityPoolRef,
    pub authenticated_role: RoleRef,
    pub unauthenticated_role: RoleRef,
    pub attachment: AttachmentRef,
}

pub struct ApiPlane {
    pub authorizer: AuthorizerRef,
    pub rest_api: RestApiRef,
    pub scan: MethodRef,
}

/// Table, artifact bucket, scan function and its grant.
pub fn declare_data_plane(b: &mut StackBuilder) -> Result<DataPlane> {
    let table = b.table(
        ids::TABLE,
        TableProps {
            partition_key: KeyAttribute::string("pk"),
            sort_key: Some(KeyAttribute::string("sk")),
        },
    )?;
    let bucket = b.bucket(ids::BUCKET)?;
    let function = b.function(
        ids::FUNCTION,
        FunctionProps::new(SCAN_HANDLER, Runtime::Python312, "src")
            .env_table_name(TABLE_ENV, &table),
    )?;
    // Full table access, as the original grant had it.
    let grant = b.grant(&function, &table, &["dynamodb:*"])?;
    Ok(DataPlane {
        table,
        bucket,
        function,
        grant,
    })
}

pub fn user_pool_props(config: &StackConfig) -> UserPoolProps {
    UserPoolProps {
        user_pool_name: Some(config.user_pool_name.clone()),
        sign_in_aliases: SignInAliases {
            email: true,
            ..SignInAliases::default()
        },
        sign_in_case_sensitive: false,
        self_sign_up_enabled: true,
        auto_verify: AutoVerify {
            email: true,
            phone: false,
        },
        standard_attributes: StandardAttributes {
            email: Some(StandardAttribute {
                required: true,
                mutable: false,
            }),
            phone_number: None,
        },
        user_verification: UserVerification {
            email_subject: "You need to verify your email".to_string(),
            email_body: format!(
                "Thanks for signing up Your verification code is {}",
                VERIFICATION_CODE_PLACEHOLDER
            ),
            email_style: VerificationEmailStyle::Code,
        },
        keep_original: KeepOriginal {
            email: true,
            phone: false,
        },
        account_recovery: AccountRecovery::EmailOnly,
    }
}

pub fn client_props(config: &StackConfig) -> ClientProps {
    ClientProps {
        client_name: None,
        oauth: OAuthSettings {
            flows: OAuthFlows {
                authorization_code_grant: true,
                implicit_code_grant: true,
                client_credentials: false,
            },
            scopes: OAuthScope::ALL.to_vec(),
            callback_urls: config.callback_urls.clone(),
            logout_urls: config.logout_urls.clone(),
        },
        token_validity: config.token_validity,
    }
}

/// User directory, client, hosted domain and federation.
pub fn declare_identity_plane(b: &mut StackBuilder) -> Result<IdentityPlane> {
    let config = b.config().clone();
    let user_pool = b.user_pool(ids::USER_POOL, user_pool_props(&config))?;
    let client = b.add_client(&user_pool, ids::CLIENT, client_props(&config))?;
    let domain = b.add_domain(&user_pool, ids::DOMAIN, &config.domain_prefix)?;
    let identity_pool = b.bind_identity_pool(
        ids::IDENTITY_POOL,
        &user_pool,
        &client,
        config.allow_unauthenticated_identities,
    )?;
    let unauthenticated_role = b.create_trusted_role(
        ids::UNAUTHENTICATED_ROLE,
        &identity_pool,
        AuthState::Unauthenticated,
    )?;
    let authenticated_role = b.create_trusted_role(
        ids::AUTHENTICATED_ROLE,
        &identity_pool,
        AuthState::Authenticated,
    )?;
    let attachment = b.attach_roles(
        ids::ATTACHMENT,
        &identity_pool,
        &authenticated_role,
        &unauthenticated_role,
    )?;
    Ok(IdentityPlane {
        user_pool,
        client,
        domain,
        identity_pool,
        authenticated_role,
        unauthenticated_role,
        attachment,
    })
}

/// Authorizer, REST API and the `GET /scan` route.
pub fn declare_api_plane(
    b: &mut StackBuilder,
    data: &DataPlane,
    identity: &IdentityPlane,
) -> Result<ApiPlane> {
    let authorizer = b.create_authorizer(ids::AUTHORIZER, &[identity.user_pool.clone()])?;
    let rest_api = b.rest_api(ids::REST_API)?;
    let scan = b.bind_method(
        &rest_api,
        SCAN_PATH,
        HttpMethod::Get,
        &data.function,
        &authorizer,
        &[SCAN_SCOPE],
    )?;
    Ok(ApiPlane {
        authorizer,
        rest_api,
        scan,
    })
}

/// Declares and finalizes the reference backend.
pub fn synthesize(config: StackConfig) -> Result<StackGraph> {
    let mut b = StackBuilder::new(config)?;
    let data = declare_data_plane(&mut b)?;
    let identity = declare_identity_plane(&mut b)?;
    declare_api_plane(&mut b, &data, &identity)?;
    b.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_backend_shape() {
        let graph = synthesize(StackConfig::default()).unwrap();

        assert_eq!(graph.tables().count(), 1);
        assert_eq!(graph.functions().count(), 1);
        assert_eq!(graph.methods().count(), 1);
        assert_eq!(graph.identity_pools().count(), 1);
        assert_eq!(graph.attachments().count(), 1);
        assert!(graph.get(ids::BUCKET).is_some());

        let (_, pool) = graph.user_pool().unwrap();
        assert_eq!(pool.user_pool_name, "CdkStack18DavidStack_cognito_userPool_fromCdk");
        assert!(!pool.sign_in_case_sensitive);
        assert!(!pool.email_mutable());

        let (_, domain) = graph.domain().unwrap();
        assert_eq!(
            domain.base_url,
            "https://cdkstackdavidcogdom.auth.us-east-1.amazoncognito.com"
        );
    }

    #[test]
    fn test_function_env_names_table() {
        let graph = synthesize(StackConfig::default()).unwrap();
        let (_, function) = graph.functions().next().unwrap();
        let (table, _) = graph.tables().next().unwrap();
        assert_eq!(function.environment[TABLE_ENV].value(), table.physical_id);
        assert_eq!(function.runtime, Runtime::Python312);
    }

    #[test]
    fn test_scan_route() {
        let graph = synthesize(StackConfig::default()).unwrap();
        let (resource, method) = graph.methods().next().unwrap();
        assert_eq!(resource.logical_id, "myRestApiscanGET");
        assert_eq!(method.path, SCAN_PATH);
        assert_eq!(method.http_method, HttpMethod::Get);
        assert_eq!(method.function, ids::FUNCTION);
        assert_eq!(method.authorization_scopes, vec![SCAN_SCOPE.to_string()]);
    }

    #[test]
    fn test_removal_policy_everywhere() {
        let graph = synthesize(StackConfig::default()).unwrap();
        assert!(graph
            .resources()
            .all(|r| r.removal_policy == Some(RemovalPolicy::Destroy)));
    }
}
