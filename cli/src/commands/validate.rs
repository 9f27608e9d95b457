use crate::utils::config_source::load_config;
use anyhow::{bail, Result};
use authz::types::{AuthState, FederatedClaims, Principal};
use authz::PolicyEngine;
use colored::*;
use serde_json::{json, Value};
use stack::{blueprint, StackGraph};
use std::path::Path;

/// Execute the validate command
pub fn execute(path: Option<&Path>, format: &str) -> Result<()> {
    let report = check_stack(path);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report_text(&report),
    }

    if report["status"] != "valid" {
        bail!("Stack validation failed");
    }
    Ok(())
}

/// Run every check, stopping at the first one later checks depend on
fn check_stack(path: Option<&Path>) -> Value {
    let mut report = json!({
        "status": "valid",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "checks": {}
    });

    let config = match load_config(path) {
        Ok(config) => {
            report["checks"]["configuration"] = passed(format!(
                "Stack {} in {}",
                config.stack_name, config.region
            ));
            config
        }
        Err(e) => {
            report["checks"]["configuration"] = failed(format!("{:#}", e));
            report["status"] = json!("invalid");
            return report;
        }
    };

    let graph = match blueprint::synthesize(config) {
        Ok(graph) => {
            report["checks"]["graph"] = passed(format!("{} resources finalized", graph.len()));
            graph
        }
        Err(e) => {
            report["checks"]["graph"] = failed(e.to_string());
            report["status"] = json!("invalid");
            return report;
        }
    };

    report["checks"]["trusted_roles"] = check_trusted_roles(&graph);
    report["checks"]["access_separation"] = check_access_separation(&graph);
    report["checks"]["routes"] = check_routes(&graph);

    let all_passed = report["checks"]
        .as_object()
        .map(|checks| checks.values().all(|c| c["status"] != "failed"))
        .unwrap_or(false);
    if !all_passed {
        report["status"] = json!("invalid");
    }
    report
}

fn passed(message: impl Into<String>) -> Value {
    json!({ "status": "passed", "message": message.into() })
}

fn failed(message: impl Into<String>) -> Value {
    json!({ "status": "failed", "message": message.into() })
}

fn warning(message: impl Into<String>) -> Value {
    json!({ "status": "warning", "message": message.into() })
}

/// Each pool's roles admit exactly the claims of their own auth state
fn check_trusted_roles(graph: &StackGraph) -> Value {
    for (resource, pool) in graph.identity_pools() {
        let claims = [
            FederatedClaims::authenticated(
                pool.identity_pool_id.clone(),
                pool.cognito_identity_providers
                    .iter()
                    .map(|p| p.provider_name.clone()),
            ),
            FederatedClaims::unauthenticated(pool.identity_pool_id.clone()),
        ];
        for state in AuthState::ALL {
            let Some((_, role)) = graph.attached_role(&resource.logical_id, state) else {
                return failed(format!(
                    "{} has no {} role attached",
                    resource.logical_id, state
                ));
            };
            let Some(condition) = role.assumed_by.trust_condition() else {
                return failed(format!("{} is not assumable through a pool", role.role_name));
            };
            for claim in &claims {
                let expected = claim.auth_state() == state;
                if condition.is_satisfied_by(claim) != expected {
                    return failed(format!(
                        "{} trust does not match {} claims",
                        role.role_name,
                        claim.auth_state()
                    ));
                }
            }
        }
    }
    passed(format!(
        "{} identity pools with mutually exclusive roles",
        graph.identity_pools().count()
    ))
}

/// Trusted roles never reach a table; execution roles reach theirs
fn check_access_separation(graph: &StackGraph) -> Value {
    let engine = PolicyEngine::new();

    for (table, _) in graph.tables() {
        if graph
            .federated_statements()
            .iter()
            .any(|s| s.mentions_resource(&table.arn))
        {
            return failed(format!("A trusted role names table {}", table.logical_id));
        }

        for (pool, _) in graph.identity_pools() {
            for state in AuthState::ALL {
                let Some((role, props)) = graph.attached_role(&pool.logical_id, state) else {
                    continue;
                };
                let principal = Principal::role(role.arn.clone());
                match engine.is_allowed(&principal, "dynamodb:Scan", &table.arn, &props.statements) {
                    Ok(false) => {}
                    Ok(true) => {
                        return failed(format!(
                            "{} role can scan {}",
                            state, table.logical_id
                        ))
                    }
                    Err(e) => return failed(e.to_string()),
                }
            }
        }
    }

    for (resource, function) in graph.functions() {
        let Some((role, props)) = graph.execution_role(&resource.logical_id) else {
            return failed(format!("{} has no execution role", resource.logical_id));
        };
        for table_id in function.referenced_tables() {
            let Some(table) = graph.get(table_id) else {
                return failed(format!("{} references unknown table {}", resource.logical_id, table_id));
            };
            let principal = Principal::role(role.arn.clone());
            match engine.is_allowed(&principal, "dynamodb:Scan", &table.arn, &props.statements) {
                Ok(true) => {}
                Ok(false) => {
                    return failed(format!(
                        "{} cannot read {}",
                        resource.logical_id, table_id
                    ))
                }
                Err(e) => return failed(e.to_string()),
            }
        }
    }

    passed("Tables reachable only through execution roles")
}

fn check_routes(graph: &StackGraph) -> Value {
    let unscoped: Vec<String> = graph
        .methods()
        .filter(|(_, m)| m.authorization_scopes.is_empty())
        .map(|(_, m)| format!("{} {}", m.http_method, m.path))
        .collect();
    if unscoped.is_empty() {
        passed(format!("{} routes require scopes", graph.methods().count()))
    } else {
        warning(format!("Routes without scopes: {}", unscoped.join(", ")))
    }
}

fn print_report_text(report: &Value) {
    println!("{}", "=== Stack Validation ===".bold());
    println!();

    let status = match report["status"].as_str().unwrap_or("unknown") {
        "valid" => "VALID".green().bold(),
        "invalid" => "INVALID".red().bold(),
        _ => "UNKNOWN".white().bold(),
    };
    println!("Overall Status: {}", status);
    println!("Timestamp: {}", report["timestamp"].as_str().unwrap_or(""));
    println!();

    println!("{}", "Checks:".bold());
    println!("{}", "─".repeat(50));

    if let Some(checks) = report["checks"].as_object() {
        for (name, check) in checks {
            let check_status = check["status"].as_str().unwrap_or("unknown");
            let icon = match check_status {
                "passed" => "✓".green(),
                "failed" => "✗".red(),
                "warning" => "⚠".yellow(),
                _ => "?".white(),
            };
            println!("{} {}", icon, name.to_uppercase().bold());
            if let Some(message) = check["message"].as_str() {
                println!("  {}", message);
            }
        }
    }
}
