//! Compute units and the table access they are granted
//!
//! A function runs with its execution role, never the caller's identity.
//! Every table operation a handler performs is checked against the role's
//! statements with the policy engine before it reaches the store.

use async_trait::async_trait;
use authz::types::{PolicyStatement, Principal};
use authz::PolicyEngine;
use serde_json::{json, Value};
use stack::blueprint::{SCAN_HANDLER, TABLE_ENV};
use stack::resources::Function;
use stack::StackGraph;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::store::{Item, ItemKey, TableStore};

/// Table client handed to a handler, bound to the function's execution role
#[derive(Clone)]
pub struct TableClient {
    store: Arc<dyn TableStore>,
    engine: Arc<PolicyEngine>,
    principal: Principal,
    statements: Vec<PolicyStatement>,
    /// Table name to ARN
    arns: Arc<BTreeMap<String, String>>,
}

impl TableClient {
    fn authorize(&self, action: &str, table: &str) -> GatewayResult<()> {
        let arn = self
            .arns
            .get(table)
            .ok_or_else(|| GatewayError::Table(format!("Table {} does not exist", table)))?;
        if self
            .engine
            .is_allowed(&self.principal, action, arn, &self.statements)?
        {
            debug!("{} allowed {} on {}", self.principal.id, action, table);
            Ok(())
        } else {
            warn!("{} denied {} on {}", self.principal.id, action, table);
            Err(GatewayError::AccessDenied(format!(
                "{} may not perform {} on {}",
                self.principal.id, action, arn
            )))
        }
    }

    pub async fn scan(&self, table: &str) -> GatewayResult<Vec<Item>> {
        self.authorize("dynamodb:Scan", table)?;
        self.store.scan(table).await
    }

    pub async fn get(&self, table: &str, key: &ItemKey) -> GatewayResult<Option<Item>> {
        self.authorize("dynamodb:GetItem", table)?;
        self.store.get(table, key).await
    }

    pub async fn put(&self, table: &str, item: Item) -> GatewayResult<()> {
        self.authorize("dynamodb:PutItem", table)?;
        self.store.put(table, item).await
    }

    pub async fn delete(&self, table: &str, key: &ItemKey) -> GatewayResult<Option<Item>> {
        self.authorize("dynamodb:DeleteItem", table)?;
        self.store.delete(table, key).await
    }
}

/// What a handler sees of its own deployment
pub struct InvocationContext {
    pub function_name: String,
    pub environment: BTreeMap<String, String>,
    tables: TableClient,
}

impl InvocationContext {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }

    pub fn tables(&self) -> &TableClient {
        &self.tables
    }
}

/// Code behind an entry point
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, ctx: &InvocationContext, event: Value) -> GatewayResult<Value>;
}

/// Returns every item of the table named by `DYNAMODB` as a JSON body
pub struct ScanHandler;

#[async_trait]
impl Handler for ScanHandler {
    async fn invoke(&self, ctx: &InvocationContext, _event: Value) -> GatewayResult<Value> {
        let table = ctx.env(TABLE_ENV).ok_or_else(|| {
            GatewayError::ComputeFailed(format!("{} is not set", TABLE_ENV))
        })?;
        let items = ctx.tables().scan(table).await?;
        let body = serde_json::to_string(&items)
            .map_err(|e| GatewayError::ComputeFailed(e.to_string()))?;
        Ok(json!({ "body": body }))
    }
}

struct Deployment {
    function: Function,
    role_arn: String,
    statements: Vec<PolicyStatement>,
    invocations: AtomicU64,
}

/// Deployed compute units of one stack
pub struct FunctionRuntime {
    store: Arc<dyn TableStore>,
    engine: Arc<PolicyEngine>,
    table_arns: Arc<BTreeMap<String, String>>,
    /// Entry point to handler
    handlers: BTreeMap<String, Arc<dyn Handler>>,
    /// Logical id to deployment
    deployments: BTreeMap<String, Deployment>,
}

impl FunctionRuntime {
    /// Deploy every function of the graph with the reference scan handler
    /// registered for its entry point.
    pub fn from_graph(graph: &StackGraph, store: Arc<dyn TableStore>) -> GatewayResult<Self> {
        let table_arns = graph
            .tables()
            .map(|(resource, table)| (table.table_name.clone(), resource.arn.clone()))
            .collect();

        let mut deployments = BTreeMap::new();
        for (resource, function) in graph.functions() {
            let (role, role_props) = graph.execution_role(&resource.logical_id).ok_or_else(|| {
                GatewayError::Configuration(format!(
                    "Function {} has no execution role",
                    resource.logical_id
                ))
            })?;
            deployments.insert(
                resource.logical_id.clone(),
                Deployment {
                    function: function.clone(),
                    role_arn: role.arn.clone(),
                    statements: role_props.statements.clone(),
                    invocations: AtomicU64::new(0),
                },
            );
        }
        info!("Deployed {} functions", deployments.len());

        let mut handlers: BTreeMap<String, Arc<dyn Handler>> = BTreeMap::new();
        handlers.insert(SCAN_HANDLER.to_string(), Arc::new(ScanHandler));

        Ok(Self {
            store,
            engine: Arc::new(PolicyEngine::new()),
            table_arns: Arc::new(table_arns),
            handlers,
            deployments,
        })
    }

    /// Register the code for an entry point, replacing any previous one
    pub fn with_handler(mut self, entry_point: &str, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(entry_point.to_string(), handler);
        self
    }

    pub fn store(&self) -> Arc<dyn TableStore> {
        self.store.clone()
    }

    /// Times the function has been invoked, failed invocations included
    pub fn invocations(&self, function: &str) -> u64 {
        self.deployments
            .get(function)
            .map(|d| d.invocations.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    pub fn total_invocations(&self) -> u64 {
        self.deployments
            .values()
            .map(|d| d.invocations.load(Ordering::SeqCst))
            .sum()
    }

    pub async fn invoke(&self, function: &str, event: Value) -> GatewayResult<Value> {
        let deployment = self
            .deployments
            .get(function)
            .ok_or_else(|| GatewayError::NotFound(format!("function {}", function)))?;
        let handler = self
            .handlers
            .get(&deployment.function.handler)
            .cloned()
            .ok_or_else(|| {
                GatewayError::ComputeFailed(format!(
                    "No code registered for entry point {}",
                    deployment.function.handler
                ))
            })?;

        deployment.invocations.fetch_add(1, Ordering::SeqCst);
        let ctx = InvocationContext {
            function_name: deployment.function.function_name.clone(),
            environment: deployment
                .function
                .environment
                .iter()
                .map(|(key, binding)| (key.clone(), binding.value().to_string()))
                .collect(),
            tables: TableClient {
                store: self.store.clone(),
                engine: self.engine.clone(),
                principal: Principal::role(deployment.role_arn.clone()),
                statements: deployment.statements.clone(),
                arns: self.table_arns.clone(),
            },
        };
        debug!(
            "Invoking {} ({} on {})",
            ctx.function_name, deployment.function.handler, deployment.function.runtime
        );
        handler.invoke(&ctx, event).await
    }
}
