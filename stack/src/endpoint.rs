//! Authorizers and the methods they guard.

use std::collections::BTreeSet;
use tracing::info;

use crate::builder::StackBuilder;
use crate::error::{Result, StackError};
use crate::handle::*;
use crate::naming;
use crate::resources::*;

/// Normalizes a route path to `/a/b` form.
///
/// Segments are plain names or a single `{param}`.
pub fn normalize_path(path: &str) -> Result<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in &segments {
        let name = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(*segment);
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StackError::InvariantViolation(format!(
                "Invalid path segment {:?} in {:?}",
                segment, path
            )));
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Logical id of the method bound at `path`, e.g. `myRestApiscanGET`.
fn method_logical_id(api: &str, path: &str, method: HttpMethod) -> String {
    let route: String = path
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("{}{}{}", api, route, method.as_str())
}

impl StackBuilder {
    /// Declares a token authorizer trusting `providers`.
    pub fn create_authorizer(
        &mut self,
        logical_id: &str,
        providers: &[UserPoolRef],
    ) -> Result<AuthorizerRef> {
        if providers.is_empty() {
            return Err(StackError::InvariantViolation(format!(
                "Authorizer {} needs at least one user pool",
                logical_id
            )));
        }

        let mut user_pools = Vec::new();
        let mut provider_names = Vec::new();
        let mut provider_arns = Vec::new();
        for provider in providers {
            let resource = self.resolve(provider)?;
            let ResourceKind::UserPool(pool) = &resource.kind else {
                return Err(StackError::DanglingReference(provider.to_string()));
            };
            if user_pools.contains(&resource.logical_id) {
                continue;
            }
            user_pools.push(resource.logical_id.clone());
            provider_names.push(pool.provider_name.clone());
            provider_arns.push(resource.arn.clone());
        }

        let authorizer_id = naming::short_id(self.stack_name(), logical_id);
        let arn = naming::authorizer_arn(&self.config().region, &authorizer_id);
        let depends_on: BTreeSet<String> = user_pools.iter().cloned().collect();
        self.insert(
            logical_id,
            authorizer_id.clone(),
            arn,
            depends_on,
            ResourceKind::Authorizer(Authorizer {
                authorizer_id,
                user_pools,
                provider_names,
                provider_arns,
                identity_source: AUTHORIZATION_HEADER_SOURCE.to_string(),
            }),
        )
    }

    /// Routes `method path` of `api` to `function` behind `authorizer`.
    ///
    /// With a non-empty `scopes` list, a caller must present an access token
    /// carrying at least one of them.
    pub fn bind_method(
        &mut self,
        api: &RestApiRef,
        path: &str,
        method: HttpMethod,
        function: &FunctionRef,
        authorizer: &AuthorizerRef,
        scopes: &[&str],
    ) -> Result<MethodRef> {
        let path = normalize_path(path)?;
        let api_resource = self.resolve(api)?;
        let api_logical = api_resource.logical_id.clone();
        let api_id = api_resource.physical_id.clone();
        let function_resource = self.resolve(function)?;
        let function_logical = function_resource.logical_id.clone();
        let function_arn = function_resource.arn.clone();
        let authorizer_logical = self.resolve(authorizer)?.logical_id.clone();

        if let Some(existing) = self.resources.values().find(|r| {
            matches!(&r.kind, ResourceKind::Method(m)
                if m.rest_api == api_logical && m.path == path && m.http_method == method)
        }) {
            return Err(StackError::DuplicateBinding(format!(
                "{} {} of {} is already bound as {}",
                method, path, api_logical, existing.logical_id
            )));
        }

        let mut authorization_scopes = Vec::new();
        for scope in scopes {
            let scope = scope.trim();
            if scope.is_empty() || scope.contains(char::is_whitespace) {
                return Err(StackError::InvariantViolation(format!(
                    "Invalid authorization scope {:?}",
                    scope
                )));
            }
            authorization_scopes.push(scope.to_string());
        }
        authorization_scopes.sort();
        authorization_scopes.dedup();

        let logical_id = method_logical_id(&api_logical, &path, method);
        let arn = naming::method_arn(
            &self.config().region,
            &self.config().account,
            &api_id,
            method.as_str(),
            &path,
        );
        info!(
            "Binding {} {} to {} behind {}",
            method, path, function_logical, authorizer_logical
        );
        self.insert(
            &logical_id,
            format!("{}/{}{}", api_id, method, path),
            arn,
            BTreeSet::from([
                api_logical.clone(),
                function_logical.clone(),
                authorizer_logical.clone(),
            ]),
            ResourceKind::Method(Method {
                rest_api: api_logical,
                http_method: method,
                path,
                function: function_logical,
                function_arn,
                authorizer: authorizer_logical,
                authorization_type: AuthorizationType::CognitoUserPools,
                authorization_scopes,
            }),
        )
    }

    /// Every scope a method requires must be issuable by some client of the
    /// pools its authorizer trusts.
    pub(crate) fn check_method_scopes(&self) -> Result<()> {
        for resource in self.resources.values() {
            let ResourceKind::Method(method) = &resource.kind else {
                continue;
            };
            let Some(ResourceKind::Authorizer(authorizer)) =
                self.resources.get(&method.authorizer).map(|r| &r.kind)
            else {
                return Err(StackError::DanglingReference(method.authorizer.clone()));
            };

            let issuable: BTreeSet<&str> = self
                .resources
                .values()
                .filter_map(|r| match &r.kind {
                    ResourceKind::UserPoolClient(c) if authorizer.user_pools.contains(&c.user_pool) => {
                        Some(c)
                    }
                    _ => None,
                })
                .flat_map(|c| c.oauth.scopes.iter().map(|s| s.as_str()))
                .collect();

            for scope in &method.authorization_scopes {
                if !issuable.contains(scope.as_str()) {
                    return Err(StackError::InvariantViolation(format!(
                        "Method {} requires scope {} that no client can issue",
                        resource.logical_id, scope
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ClientProps, FunctionProps, UserPoolProps};
    use crate::config::StackConfig;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("scan").unwrap(), "/scan");
        assert_eq!(normalize_path("/scan/").unwrap(), "/scan");
        assert_eq!(normalize_path("//items//{id}").unwrap(), "/items/{id}");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert!(normalize_path("/sc an").is_err());
        assert!(normalize_path("/{}").is_err());
    }

    fn declared() -> (StackBuilder, RestApiRef, FunctionRef, AuthorizerRef) {
        let mut b = StackBuilder::new(StackConfig::default()).unwrap();
        let pool = b.user_pool("pool", UserPoolProps::default()).unwrap();
        b.add_client(
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
        let function = b
            .function(
                "f",
                FunctionProps::new("index.handler", Runtime::Python312, "src"),
            )
            .unwrap();
        let authorizer = b.create_authorizer("auth", &[pool]).unwrap();
        let api = b.rest_api("api").unwrap();
        (b, api, function, authorizer)
    }

    #[test]
    fn test_authorizer_needs_pool() {
        let mut b = StackBuilder::new(StackConfig::default()).unwrap();
        assert!(b.create_authorizer("auth", &[]).is_err());
    }

    #[test]
    fn test_authorizer_reads_authorization_header() {
        let (b, _, _, authorizer) = declared();
        let ResourceKind::Authorizer(a) = &b.resolve(&authorizer).unwrap().kind else {
            panic!("expected an authorizer");
        };
        assert_eq!(a.identity_source, AUTHORIZATION_HEADER_SOURCE);
        assert_eq!(a.user_pools, vec!["pool".to_string()]);
        assert!(a.provider_names[0].starts_with("cognito-idp.us-east-1.amazonaws.com/"));
    }

    #[test]
    fn test_bind_method() {
        let (mut b, api, function, authorizer) = declared();
        let method = b
            .bind_method(&api, "scan", HttpMethod::Get, &function, &authorizer, &["email"])
            .unwrap();
        assert_eq!(method.logical_id(), "apiscanGET");

        let resource = b.resolve(&method).unwrap();
        let ResourceKind::Method(m) = &resource.kind else {
            panic!("expected a method");
        };
        assert_eq!(m.path, "/scan");
        assert_eq!(m.authorization_scopes, vec!["email".to_string()]);
        assert_eq!(m.authorization_type, AuthorizationType::CognitoUserPools);
        assert!(resource.depends_on.contains("auth"));
        assert!(resource.arn.ends_with("/*/GET/scan"));
    }

    #[test]
    fn test_same_route_twice_rejected() {
        let (mut b, api, function, authorizer) = declared();
        b.bind_method(&api, "/scan", HttpMethod::Get, &function, &authorizer, &[])
            .unwrap();
        let err = b
            .bind_method(&api, "scan/", HttpMethod::Get, &function, &authorizer, &[])
            .unwrap_err();
        assert!(matches!(err, StackError::DuplicateBinding(_)));

        b.bind_method(&api, "/scan", HttpMethod::Post, &function, &authorizer, &[])
            .unwrap();
    }

    #[test]
    fn test_unissuable_scope_fails_finalize() {
        let (mut b, api, function, authorizer) = declared();
        b.bind_method(&api, "/scan", HttpMethod::Get, &function, &authorizer, &["phone"])
            .unwrap();
        let err = b.finalize().unwrap_err();
        assert!(err.to_string().contains("phone"));
    }
}
