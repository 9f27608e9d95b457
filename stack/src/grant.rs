//! Static permission grants from compute units to data resources.

use authz::types::{ActionPattern, PolicyStatement};
use std::collections::BTreeSet;
use tracing::info;

use crate::builder::StackBuilder;
use crate::error::{Result, StackError};
use crate::handle::*;
use crate::resources::*;

impl StackBuilder {
    /// Appends an allow statement for `actions` on `target` to the
    /// function's execution role.
    ///
    /// An empty `actions` list grants every action of the target's service.
    /// Each function may be granted on a given resource once.
    pub fn grant<K: Grantable>(
        &mut self,
        function: &FunctionRef,
        target: &ResourceRef<K>,
        actions: &[&str],
    ) -> Result<GrantRef> {
        let function_resource = self.resolve(function)?;
        let ResourceKind::Function(f) = &function_resource.kind else {
            return Err(StackError::DanglingReference(function.to_string()));
        };
        let grantee = function_resource.logical_id.clone();
        let role = f.role.clone();
        let target_resource = self.resolve(target)?;
        let target_logical = target_resource.logical_id.clone();
        let target_arn = target_resource.arn.clone();

        if let Some(existing) = self.resources.values().find(|r| {
            matches!(&r.kind, ResourceKind::PermissionGrant(g)
                if g.grantee == grantee && g.target == target_logical)
        }) {
            return Err(StackError::DuplicateBinding(format!(
                "{} already holds grant {} on {}",
                grantee, existing.logical_id, target_logical
            )));
        }

        let patterns = if actions.is_empty() {
            vec![ActionPattern::service_wildcard(K::SERVICE)]
        } else {
            actions
                .iter()
                .map(|action| {
                    let pattern = ActionPattern::new(*action);
                    let in_service = pattern
                        .service()
                        .is_some_and(|service| service.eq_ignore_ascii_case(K::SERVICE));
                    if !in_service {
                        return Err(StackError::InvariantViolation(format!(
                            "{} is not a {} action",
                            action,
                            K::SERVICE
                        )));
                    }
                    Ok(pattern)
                })
                .collect::<Result<Vec<_>>>()?
        };
        let statement = PolicyStatement {
            effect: authz::types::Effect::Allow,
            actions: patterns,
            resources: vec![target_arn.clone()],
        };

        let role_handle = self.execution_role(function)?;
        let ResourceKind::Role(r) = &mut self.resolve_mut(&role_handle)?.kind else {
            return Err(StackError::DanglingReference(role_handle.to_string()));
        };
        r.statements.push(statement.clone());

        let logical_id = format!("{}Grant{}", grantee, target_logical);
        info!("Granting {} access to {}", grantee, target_logical);
        self.insert(
            &logical_id,
            format!("{}/{}", role_handle.physical_id(), target_logical),
            target_arn,
            BTreeSet::from([role.clone(), grantee.clone(), target_logical.clone()]),
            ResourceKind::PermissionGrant(PermissionGrant {
                role,
                grantee,
                target: target_logical,
                statement,
            }),
        )
    }
}
