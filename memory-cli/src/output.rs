//! Human/JSON rendering of tool results, selected by the global `--format`
//! flag.

use clap::ValueEnum;
use colored::Colorize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Colorized, loosely-formatted text for a terminal.
    Human,
    /// Pretty-printed JSON for scripting.
    Json,
}

/// Print a successful tool result in the selected format.
pub fn print_result(format: OutputFormat, tool: &str, value: &Value) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
        }
        OutputFormat::Human => print_human(tool, value),
    }
}

fn print_human(tool: &str, value: &Value) {
    println!("{} {}", "✓".green().bold(), tool.bold());
    print_value(value, 1);
}

fn print_value(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{pad}{}:", key.cyan());
                        print_value(v, indent + 1);
                    }
                    _ => println!("{pad}{}: {}", key.cyan(), format_scalar(v)),
                }
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                println!("{pad}{}", "(none)".dimmed());
            }
            for (i, item) in items.iter().enumerate() {
                println!("{pad}[{i}]");
                print_value(item, indent + 1);
            }
        }
        other => println!("{pad}{}", format_scalar(other)),
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".dimmed().to_string(),
        other => other.to_string(),
    }
}

/// Print a tool error and return the process exit code it warrants.
pub fn print_error(format: OutputFormat, err: &anyhow::Error) -> i32 {
    match format {
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": err.to_string() }));
        }
        OutputFormat::Human => {
            eprintln!("{} {}", "✗".red().bold(), err.to_string().red());
        }
    }
    1
}
