//! The finalized, immutable resource graph.

use authz::types::{AuthState, PolicyStatement};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, StackError};
use crate::resources::*;

/// Output of a completed declaration pass.
///
/// Resources are keyed by logical id; every `depends_on` edge points at a
/// resource in the same graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackGraph {
    stack_name: String,
    region: String,
    account: String,
    resources: BTreeMap<String, Resource>,
}

impl StackGraph {
    pub(crate) fn new(
        stack_name: String,
        region: String,
        account: String,
        resources: BTreeMap<String, Resource>,
    ) -> Self {
        Self {
            stack_name,
            region,
            account,
            resources,
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Resources in an order where every dependency precedes its dependents.
    ///
    /// Ties are broken by logical id, so the order is a function of the graph
    /// alone.
    pub fn topological_order(&self) -> Result<Vec<&Resource>> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for resource in self.resources.values() {
            let mut deps = BTreeSet::new();
            for dependency in &resource.depends_on {
                if !self.resources.contains_key(dependency) {
                    return Err(StackError::DanglingReference(format!(
                        "{} depends on undeclared {}",
                        resource.logical_id, dependency
                    )));
                }
                deps.insert(dependency.as_str());
            }
            remaining.insert(resource.logical_id.as_str(), deps);
        }

        let mut order = Vec::with_capacity(self.resources.len());
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.keys().copied().collect();
                return Err(StackError::InvariantViolation(format!(
                    "Dependency cycle among {}",
                    stuck.join(", ")
                )));
            }
            for id in ready {
                remaining.remove(id);
                for deps in remaining.values_mut() {
                    deps.remove(id);
                }
                if let Some(resource) = self.resources.get(id) {
                    order.push(resource);
                }
            }
        }
        Ok(order)
    }

    fn of_kind<'a, T: 'a>(
        &'a self,
        select: impl Fn(&'a ResourceKind) -> Option<&'a T> + 'a,
    ) -> impl Iterator<Item = (&'a Resource, &'a T)> + 'a {
        self.resources
            .values()
            .filter_map(move |r| select(&r.kind).map(|t| (r, t)))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&Resource, &Table)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::Table(t) => Some(t),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = (&Resource, &Function)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn roles(&self) -> impl Iterator<Item = (&Resource, &Role)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::Role(r) => Some(r),
            _ => None,
        })
    }

    pub fn grants(&self) -> impl Iterator<Item = (&Resource, &PermissionGrant)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::PermissionGrant(g) => Some(g),
            _ => None,
        })
    }

    pub fn clients(&self) -> impl Iterator<Item = (&Resource, &UserPoolClient)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::UserPoolClient(c) => Some(c),
            _ => None,
        })
    }

    pub fn identity_pools(&self) -> impl Iterator<Item = (&Resource, &IdentityPool)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::IdentityPool(p) => Some(p),
            _ => None,
        })
    }

    pub fn attachments(&self) -> impl Iterator<Item = (&Resource, &RoleAttachment)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::RoleAttachment(a) => Some(a),
            _ => None,
        })
    }

    pub fn authorizers(&self) -> impl Iterator<Item = (&Resource, &Authorizer)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::Authorizer(a) => Some(a),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = (&Resource, &Method)> + '_ {
        self.of_kind(|k| match k {
            ResourceKind::Method(m) => Some(m),
            _ => None,
        })
    }

    /// The stack's user directory, if one was declared.
    pub fn user_pool(&self) -> Option<(&Resource, &UserPool)> {
        self.of_kind(|k| match k {
            ResourceKind::UserPool(p) => Some(p),
            _ => None,
        })
        .next()
    }

    pub fn domain(&self) -> Option<(&Resource, &HostedDomain)> {
        self.of_kind(|k| match k {
            ResourceKind::UserPoolDomain(d) => Some(d),
            _ => None,
        })
        .next()
    }

    pub fn table_by_name(&self, table_name: &str) -> Option<(&Resource, &Table)> {
        self.tables().find(|(_, t)| t.table_name == table_name)
    }

    pub fn role(&self, logical_id: &str) -> Option<(&Resource, &Role)> {
        self.roles().find(|(r, _)| r.logical_id == logical_id)
    }

    /// Inline statements of a role; empty for unknown roles.
    pub fn role_statements(&self, logical_id: &str) -> &[PolicyStatement] {
        self.role(logical_id)
            .map(|(_, role)| role.statements.as_slice())
            .unwrap_or(&[])
    }

    /// Execution role of a compute unit.
    pub fn execution_role(&self, function: &str) -> Option<(&Resource, &Role)> {
        let (_, f) = self.functions().find(|(r, _)| r.logical_id == function)?;
        self.role(&f.role)
    }

    /// The role an identity pool hands out for `state`.
    pub fn attached_role(&self, identity_pool: &str, state: AuthState) -> Option<(&Resource, &Role)> {
        let (_, attachment) = self
            .attachments()
            .find(|(_, a)| a.identity_pool == identity_pool)?;
        let logical_id = match state {
            AuthState::Authenticated => &attachment.authenticated_role,
            AuthState::Unauthenticated => &attachment.unauthenticated_role,
        };
        self.role(logical_id)
    }

    /// Every statement a federated caller can obtain through any identity
    /// pool, in either auth state.
    pub fn federated_statements(&self) -> Vec<&PolicyStatement> {
        let mut statements = Vec::new();
        for (pool, _) in self.identity_pools() {
            for state in AuthState::ALL {
                if let Some((_, role)) = self.attached_role(&pool.logical_id, state) {
                    statements.extend(role.statements.iter());
                }
            }
        }
        statements
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| StackError::Serialization(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| StackError::Serialization(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let graph: StackGraph =
            serde_json::from_str(content).map_err(|e| StackError::Serialization(e.to_string()))?;
        graph.topological_order()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, deps: &[&str]) -> Resource {
        Resource {
            logical_id: id.to_string(),
            physical_id: id.to_lowercase(),
            arn: format!("arn:aws:s3:::{}", id.to_lowercase()),
            removal_policy: None,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            kind: ResourceKind::Bucket(Bucket {
                bucket_name: id.to_lowercase(),
            }),
        }
    }

    fn graph(resources: Vec<Resource>) -> StackGraph {
        StackGraph::new(
            "Stack".to_string(),
            "us-east-1".to_string(),
            "123456789012".to_string(),
            resources
                .into_iter()
                .map(|r| (r.logical_id.clone(), r))
                .collect(),
        )
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let g = graph(vec![
            resource("c", &["b"]),
            resource("a", &[]),
            resource("b", &["a"]),
            resource("d", &[]),
        ]);
        let order: Vec<&str> = g
            .topological_order()
            .unwrap()
            .iter()
            .map(|r| r.logical_id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(vec![resource("a", &["b"]), resource("b", &["a"])]);
        let err = g.topological_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_missing_dependency_is_dangling() {
        let g = graph(vec![resource("a", &["ghost"])]);
        assert!(matches!(
            g.topological_order().unwrap_err(),
            StackError::DanglingReference(_)
        ));
    }

    #[test]
    fn test_json_reload_checks_edges() {
        let g = graph(vec![resource("a", &[]), resource("b", &["a"])]);
        let json = g.to_json().unwrap();
        assert_eq!(StackGraph::from_json(&json).unwrap(), g);

        let broken = graph(vec![resource("b", &["a"])]).to_json().unwrap();
        assert!(StackGraph::from_json(&broken).is_err());
    }
}
