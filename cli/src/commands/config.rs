use crate::utils::config_source::load_config;
use anyhow::Result;
use colored::*;
use std::path::Path;

/// Show the resolved stack configuration
pub fn show(path: Option<&Path>, format: &str) -> Result<()> {
    let config = load_config(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        "yaml" => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        _ => {
            let value = serde_yaml::to_value(&config)?;
            println!("{}", "=== Stack Configuration ===".bold());
            println!();
            let source = path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults and environment".to_string());
            println!("{}: {}", "Source".bold(), source.cyan());
            println!();
            print_yaml_value(&value, 0);
        }
    }

    Ok(())
}

/// Recursively print a YAML value with indentation
fn print_yaml_value(value: &serde_yaml::Value, indent_level: usize) {
    let indent = "  ".repeat(indent_level);

    match value {
        serde_yaml::Value::Null => {
            println!("{}null", indent);
        }
        serde_yaml::Value::Bool(b) => {
            println!("{}{}", indent, b.to_string().blue());
        }
        serde_yaml::Value::Number(n) => {
            println!("{}{}", indent, n.to_string().magenta());
        }
        serde_yaml::Value::String(s) => {
            // URLs stand out from plain names
            if s.contains("://") {
                println!("{}{}", indent, s.green());
            } else {
                println!("{}{}", indent, s.yellow());
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                print!("{}- ", indent);
                print_yaml_value(item, 0);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (key, val) in map {
                let key = key.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", key));
                print!("{}{}: ", indent, key.cyan());
                match val {
                    serde_yaml::Value::Mapping(_) | serde_yaml::Value::Sequence(_) => {
                        println!();
                        print_yaml_value(val, indent_level + 1);
                    }
                    _ => print_yaml_value(val, 0),
                }
            }
        }
        serde_yaml::Value::Tagged(tagged) => {
            println!("{}!{} ", indent, tagged.tag);
            print_yaml_value(&tagged.value, indent_level + 1);
        }
    }
}
