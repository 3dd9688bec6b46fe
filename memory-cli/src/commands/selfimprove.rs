//! `self <subcommand>`: the self-improvement ledger (errors, insights,
//! rules, pattern-analysis views).

use anyhow::Result;
use clap::Subcommand;
use memory_core::tools::ToolDispatcher;
use serde_json::{json, Value};

#[derive(Subcommand)]
pub enum SelfCommands {
    /// Log an error against the ledger.
    ErrorLog {
        #[arg(short, long)]
        session_id: String,
        #[arg(short, long)]
        category: String,
        #[arg(long, default_value = "medium")]
        severity: String,
        #[arg(short, long)]
        description: String,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        fix: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
    },
    /// Manage insights: `add`, `upvote`, `downvote`, `edit`, `list`,
    /// `promote`, `resolve`.
    Insight {
        #[arg(default_value = "add")]
        action: String,
        #[arg(long)]
        id: Option<i64>,
        #[arg(short, long)]
        session_id: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(long)]
        context: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        importance: Option<i64>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
        #[arg(long)]
        source_error_ids: Vec<i64>,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        #[arg(long)]
        error_id: Option<i64>,
        #[arg(long)]
        insight_id: Option<i64>,
    },
    /// Manage rules: `list`, `fire`, `rate`, `suspend`, `activate`,
    /// `retire`, `add_manual`, `promote`.
    Rules {
        #[arg(default_value = "list")]
        action: String,
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        insight_id: Option<i64>,
        #[arg(long)]
        success: bool,
        #[arg(short, long)]
        session_id: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(long)]
        context: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
    },
    /// Read-only pattern-analysis views: `detect`, `error_patterns`,
    /// `insight_candidates`, `rule_effectiveness`, `improvement_trend`,
    /// `full_report`.
    Patterns {
        #[arg(default_value = "full_report")]
        view: String,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        days: Option<i64>,
    },
    /// Sweep every error category for a project, surfacing patterns.
    Reflect {
        #[arg(short, long)]
        project: Option<String>,
    },
    /// `get_rules_for_context`: fetch and bump the rules applicable to a
    /// project/category set.
    RulesContext {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        category: Vec<String>,
    },
}

pub async fn run(dispatcher: &ToolDispatcher, cmd: SelfCommands) -> Result<(&'static str, Value)> {
    Ok(match cmd {
        SelfCommands::ErrorLog { session_id, category, severity, description, context, fix, project, tags } => {
            let mut args = json!({
                "session_id": session_id,
                "category": category,
                "severity": severity,
                "description": description,
                "tags": tags,
            });
            set_opt(&mut args, "context", context);
            set_opt(&mut args, "fix", fix);
            set_opt(&mut args, "project", project);
            ("self_error_log", dispatcher.self_error_log(args).await?)
        }
        SelfCommands::Insight {
            action,
            id,
            session_id,
            content,
            context,
            category,
            importance,
            confidence,
            project,
            tags,
            source_error_ids,
            scope,
            priority,
            error_id,
            insight_id,
        } => {
            let mut args = json!({ "action": action, "tags": tags, "source_error_ids": source_error_ids });
            if let Some(id) = id {
                args["id"] = json!(id);
            }
            set_opt(&mut args, "session_id", session_id);
            set_opt(&mut args, "content", content);
            set_opt(&mut args, "context", context);
            set_opt(&mut args, "category", category);
            if let Some(v) = importance {
                args["importance"] = json!(v);
            }
            if let Some(v) = confidence {
                args["confidence"] = json!(v);
            }
            set_opt(&mut args, "project", project);
            set_opt(&mut args, "scope", scope);
            if let Some(v) = priority {
                args["priority"] = json!(v);
            }
            if let Some(v) = error_id {
                args["error_id"] = json!(v);
            }
            if let Some(v) = insight_id {
                args["insight_id"] = json!(v);
            }
            ("self_insight", dispatcher.self_insight(args).await?)
        }
        SelfCommands::Rules { action, id, insight_id, success, session_id, content, context, category, scope, priority, project, tags } => {
            let mut args = json!({ "action": action, "success": success, "tags": tags });
            if let Some(id) = id {
                args["id"] = json!(id);
            }
            if let Some(v) = insight_id {
                args["insight_id"] = json!(v);
            }
            set_opt(&mut args, "session_id", session_id);
            set_opt(&mut args, "content", content);
            set_opt(&mut args, "context", context);
            set_opt(&mut args, "category", category);
            set_opt(&mut args, "scope", scope);
            if let Some(v) = priority {
                args["priority"] = json!(v);
            }
            set_opt(&mut args, "project", project);
            ("self_rules", dispatcher.self_rules(args).await?)
        }
        SelfCommands::Patterns { view, project, category, days } => {
            let mut args = json!({ "view": view });
            set_opt(&mut args, "project", project);
            set_opt(&mut args, "category", category);
            if let Some(v) = days {
                args["days"] = json!(v);
            }
            ("self_patterns", dispatcher.self_patterns(args).await?)
        }
        SelfCommands::Reflect { project } => {
            let mut args = json!({});
            set_opt(&mut args, "project", project);
            ("self_reflect", dispatcher.self_reflect(args).await?)
        }
        SelfCommands::RulesContext { project, category } => {
            let mut args = json!({ "categories": category });
            set_opt(&mut args, "project", project);
            ("self_rules_context", dispatcher.self_rules_context(args).await?)
        }
    })
}

fn set_opt(args: &mut Value, key: &str, value: Option<String>) {
    if let Some(v) = value {
        args[key] = json!(v);
    }
}
