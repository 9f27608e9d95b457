use anyhow::Result;
use colored::*;
use serde_json::{json, Value};

/// Execute the health check command against a running gateway
pub async fn execute(url: &str, format: &str) -> Result<()> {
    let status = check_gateway_health(url).await;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => print_health_status_text(&status),
    }

    Ok(())
}

async fn check_gateway_health(url: &str) -> Value {
    let endpoint = format!("{}{}", url.trim_end_matches('/'), gateway::HEALTH_PATH);

    match reqwest::get(&endpoint).await {
        Ok(response) if response.status().is_success() => match response.json::<Value>().await {
            Ok(body) => json!({
                "status": "healthy",
                "endpoint": url,
                "stack": body["stack"],
                "routes": body["routes"],
            }),
            Err(e) => json!({
                "status": "unhealthy",
                "endpoint": url,
                "message": format!("Unreadable health response: {}", e),
            }),
        },
        Ok(response) => json!({
            "status": "unhealthy",
            "endpoint": url,
            "message": format!("Gateway returned status: {}", response.status()),
        }),
        Err(_) => json!({
            "status": "offline",
            "endpoint": url,
            "message": "Gateway is not running or not reachable",
        }),
    }
}

/// Print health status in a formatted text output
fn print_health_status_text(status: &Value) {
    println!("{}", "=== Gateway Health Check ===".bold());
    println!();

    let status_display = match status["status"].as_str().unwrap_or("unknown") {
        "healthy" => "HEALTHY".green().bold(),
        "unhealthy" => "UNHEALTHY".red().bold(),
        "offline" => "OFFLINE".white().bold(),
        _ => "UNKNOWN".white().bold(),
    };
    println!("Status: {}", status_display);
    println!("Endpoint: {}", status["endpoint"].as_str().unwrap_or(""));

    if let Some(message) = status["message"].as_str() {
        println!("  {}", message);
    }
    if let Some(stack) = status["stack"].as_str() {
        println!("Stack: {}", stack.cyan());
    }
    if let Some(routes) = status["routes"].as_array() {
        println!();
        println!("{}", "Routes:".bold());
        println!("{}", "─".repeat(50));
        for route in routes {
            let scopes: Vec<&str> = route["scopes"]
                .as_array()
                .map(|s| s.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            println!(
                "{} {} -> {} (scopes: {})",
                route["method"].as_str().unwrap_or("?").bold(),
                route["path"].as_str().unwrap_or("?"),
                route["function"].as_str().unwrap_or("?"),
                scopes.join(", ")
            );
        }
    }
}
