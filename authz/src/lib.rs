//! Cedar-backed evaluation of role permission statements.
//!
//! The declaration graph attaches IAM-style [`PolicyStatement`]s to roles.
//! This crate answers one question about them: may a given role perform a
//! given action on a given resource ARN? The statements are compiled into
//! [Cedar](https://www.cedarpolicy.com/) policies and evaluated with the
//! Cedar authorizer, so wildcard actions and resources, `Deny` overrides and
//! deny-by-default all come from Cedar's semantics rather than hand-written
//! rules.
//!
//! # Mapping
//!
//! | IAM concept        | Cedar encoding                                  |
//! |--------------------|-------------------------------------------------|
//! | role               | `Role::"<role arn>"` principal                  |
//! | resource ARN       | `Resource::"<arn>"` entity with an `arn` attr   |
//! | action             | `context.action`, lowercased                    |
//! | `Allow` / `Deny`   | `permit` / `forbid`                             |
//! | `*` in a pattern   | Cedar `like` wildcard                           |
//!
//! Trust conditions are not compiled. They are evaluated directly by
//! [`types::TrustCondition::is_satisfied_by`] because they gate role
//! assumption, not resource access.

pub mod error;
pub mod types;

use cedar_policy::{
    Authorizer, Context, Decision, Entities, EntityId, EntityTypeName, EntityUid, PolicySet,
    Request,
};
use error::{AuthzError, Result};
use std::str::FromStr;
use tracing::debug;
use types::{Effect, PolicyStatement, Principal};

/// Cedar action every compiled request uses; the concrete IAM action travels
/// in the context.
const INVOKE_ACTION: &str = "invoke";

/// Evaluates role statements with Cedar.
///
/// # Example
///
/// ```rust
/// use authz::{PolicyEngine, types::{PolicyStatement, Principal}};
///
/// let engine = PolicyEngine::new();
/// let role = Principal::role("arn:aws:iam::123456789012:role/fn-role");
/// let table = "arn:aws:dynamodb:us-east-1:123456789012:table/items";
/// let statements = vec![PolicyStatement::allow(["dynamodb:*"], [table])];
///
/// assert!(engine.is_allowed(&role, "dynamodb:Scan", table, &statements).unwrap());
/// ```
pub struct PolicyEngine {
    authorizer: Authorizer,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            authorizer: Authorizer::new(),
        }
    }

    /// Decides whether `principal`, holding `statements`, may perform
    /// `action` on `resource_arn`.
    ///
    /// Returns `Ok(false)` when no statement allows the request or when a
    /// `Deny` statement matches.
    pub fn is_allowed(
        &self,
        principal: &Principal,
        action: &str,
        resource_arn: &str,
        statements: &[PolicyStatement],
    ) -> Result<bool> {
        let policy_text = render_policies(principal, statements);
        if policy_text.is_empty() {
            debug!(principal = %principal.id, action, resource_arn, "no statements, deny");
            return Ok(false);
        }

        let policy_set = PolicySet::from_str(&policy_text)
            .map_err(|e| AuthzError::PolicyParse(e.to_string()))?;
        let entities = self.build_entities(principal, resource_arn)?;
        let request = self.build_cedar_request(principal, action, resource_arn)?;

        let response = self
            .authorizer
            .is_authorized(&request, &policy_set, &entities);
        let allowed = response.decision() == Decision::Allow;

        debug!(
            principal = %principal.id,
            action,
            resource_arn,
            allowed,
            "evaluated role statements"
        );
        Ok(allowed)
    }

    fn build_entities(&self, principal: &Principal, resource_arn: &str) -> Result<Entities> {
        let entities_json = serde_json::json!([
            {
                "uid": { "type": principal.entity_type, "id": principal.id },
                "attrs": {},
                "parents": []
            },
            {
                "uid": { "type": "Resource", "id": resource_arn },
                "attrs": { "arn": resource_arn },
                "parents": []
            },
            {
                "uid": { "type": "Action", "id": INVOKE_ACTION },
                "attrs": {},
                "parents": []
            }
        ]);

        Entities::from_json_value(entities_json, None)
            .map_err(|e| AuthzError::EntityCreation(e.to_string()))
    }

    fn build_cedar_request(
        &self,
        principal: &Principal,
        action: &str,
        resource_arn: &str,
    ) -> Result<Request> {
        let principal_uid = entity_uid(&principal.entity_type, &principal.id)?;
        let action_uid = entity_uid("Action", INVOKE_ACTION)?;
        let resource_uid = entity_uid("Resource", resource_arn)?;

        let context = Context::from_json_value(
            serde_json::json!({ "action": action.to_ascii_lowercase() }),
            None,
        )
        .map_err(|e| AuthzError::ContextCreation(e.to_string()))?;

        Request::new(
            Some(principal_uid),
            Some(action_uid),
            Some(resource_uid),
            context,
            None,
        )
        .map_err(|e| AuthzError::EvaluationError(e.to_string()))
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn entity_uid(entity_type: &str, id: &str) -> Result<EntityUid> {
    let type_name = EntityTypeName::from_str(entity_type)
        .map_err(|e| AuthzError::EntityCreation(format!("Invalid entity type: {}", e)))?;
    Ok(EntityUid::from_type_name_and_id(type_name, EntityId::new(id)))
}

/// Renders `statements` as Cedar policy text scoped to `principal`.
///
/// Statements with no actions or no resources grant nothing and are skipped.
pub fn render_policies(principal: &Principal, statements: &[PolicyStatement]) -> String {
    statements
        .iter()
        .filter_map(|statement| render_statement(principal, statement))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_statement(principal: &Principal, statement: &PolicyStatement) -> Option<String> {
    if statement.actions.is_empty() || statement.resources.is_empty() {
        return None;
    }

    let keyword = match statement.effect {
        Effect::Allow => "permit",
        Effect::Deny => "forbid",
    };
    let actions = statement
        .actions
        .iter()
        .map(|a| {
            format!(
                "context.action like \"{}\"",
                escape(&a.as_str().to_ascii_lowercase())
            )
        })
        .collect::<Vec<_>>()
        .join(" || ");
    let resources = statement
        .resources
        .iter()
        .map(|r| format!("resource.arn like \"{}\"", escape(r)))
        .collect::<Vec<_>>()
        .join(" || ");

    Some(format!(
        "{keyword}(principal == {ptype}::\"{pid}\", action == Action::\"{INVOKE_ACTION}\", resource)\nwhen {{ ({actions}) && ({resources}) }};",
        ptype = principal.entity_type,
        pid = escape(&principal.id),
    ))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
