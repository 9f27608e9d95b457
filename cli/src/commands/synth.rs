use crate::utils::config_source::load_config;
use anyhow::Result;
use colored::*;
use stack::{blueprint, StackGraph};
use std::path::Path;
use tracing::info;

/// Synthesize the reference stack and print the finalized graph
pub fn execute(path: Option<&Path>, format: &str) -> Result<()> {
    let config = load_config(path)?;
    let graph = blueprint::synthesize(config)?;
    info!(
        "Synthesized {} with {} resources",
        graph.stack_name(),
        graph.len()
    );

    match format {
        "yaml" => print!("{}", graph.to_yaml()?),
        "text" => print_graph_text(&graph)?,
        _ => println!("{}", graph.to_json()?),
    }

    Ok(())
}

/// Resources in dependency order, one per line
fn print_graph_text(graph: &StackGraph) -> Result<()> {
    println!("{}", format!("=== Stack {} ===", graph.stack_name()).bold());
    println!("{} / {}", graph.account(), graph.region());
    println!();

    for resource in graph.topological_order()? {
        println!(
            "{:<18} {} {}",
            resource.kind.type_name().cyan(),
            resource.logical_id.bold(),
            format!("({})", resource.physical_id).white()
        );
        if !resource.depends_on.is_empty() {
            let deps: Vec<&str> = resource.depends_on.iter().map(String::as_str).collect();
            println!("{:<18} depends on {}", "", deps.join(", "));
        }
    }

    println!();
    println!("{}", format!("Total resources: {}", graph.len()).green());
    Ok(())
}
