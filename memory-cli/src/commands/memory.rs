//! `memory <subcommand>`: the core save/recall/lifecycle tool surface.

use anyhow::Result;
use clap::Subcommand;
use memory_core::tools::ToolDispatcher;
use serde_json::{json, Value};

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Save a new knowledge item.
    Save {
        #[arg(short, long)]
        session_id: String,
        #[arg(short = 't', long = "type")]
        ktype: String,
        #[arg(short, long)]
        content: String,
        #[arg(long)]
        context: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long)]
        skip_dedup: bool,
    },
    /// Recall items relevant to a query.
    Recall {
        query: String,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short = 't', long = "type")]
        ktype: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, default_value = "summary")]
        detail: String,
    },
    /// Replace an item's content, superseding the original.
    Update {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        query: Option<String>,
        #[arg(short, long)]
        content: String,
        #[arg(short, long)]
        session_id: String,
    },
    /// Soft-delete a single item.
    Delete { id: i64 },
    /// Bulk soft-delete every active item in a project.
    Forget {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
    },
    /// Preview or apply a near-duplicate consolidation sweep.
    Consolidate {
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short = 't', long = "type")]
        ktype: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Dump every non-deleted item for a project.
    Export {
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Walk an item's version chain.
    History { id: i64 },
    /// Link two items with a typed relation.
    Relate {
        from_id: i64,
        to_id: i64,
        #[arg(short = 't', long = "type")]
        rtype: String,
    },
    /// List active items carrying any of the given tags.
    SearchByTag {
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Record a lightweight, non-retrievable tool observation.
    Observe {
        #[arg(short, long)]
        session_id: String,
        #[arg(long)]
        tool_name: String,
        #[arg(long)]
        observation_type: String,
        #[arg(short, long)]
        summary: String,
        #[arg(long)]
        files_affected: Vec<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Query the session timeline.
    Timeline {
        #[arg(long)]
        sessions_ago: Option<u64>,
        #[arg(long)]
        session_number: Option<i64>,
        #[arg(long)]
        date_from: Option<String>,
        #[arg(long)]
        date_to: Option<String>,
        #[arg(long)]
        text_query: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the knowledge-base health snapshot.
    Stats,
    /// Manage the session-extraction queue.
    ExtractSession {
        #[command(subcommand)]
        command: ExtractSessionCommands,
    },
}

#[derive(Subcommand)]
pub enum ExtractSessionCommands {
    /// List every pending queue entry.
    List,
    /// Enqueue a session's raw transcript for extraction.
    Enqueue {
        session_id: String,
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        content: String,
    },
    /// Read a session's queued content, paginated in ~100 KiB windows.
    Get {
        session_id: String,
        #[arg(long, default_value_t = 0)]
        chunk: usize,
    },
    /// Mark a session's queue entry done.
    Complete { session_id: String },
}

pub async fn run(dispatcher: &ToolDispatcher, cmd: MemoryCommands) -> Result<(&'static str, Value)> {
    Ok(match cmd {
        MemoryCommands::Save { session_id, ktype, content, context, project, tags, branch, confidence, skip_dedup } => {
            let mut args = json!({
                "session_id": session_id,
                "type": ktype,
                "content": content,
                "tags": tags,
                "skip_dedup": skip_dedup,
            });
            set_opt(&mut args, "context", context);
            set_opt(&mut args, "project", project);
            set_opt(&mut args, "branch", branch);
            if let Some(c) = confidence {
                args["confidence"] = json!(c);
            }
            ("memory_save", dispatcher.memory_save(args).await?)
        }
        MemoryCommands::Recall { query, project, ktype, tags, branch, limit, detail } => {
            let mut args = json!({ "query": query, "tags": tags, "detail": detail });
            set_opt(&mut args, "project", project);
            set_opt(&mut args, "type", ktype);
            set_opt(&mut args, "branch", branch);
            if let Some(l) = limit {
                args["limit"] = json!(l);
            }
            ("memory_recall", dispatcher.memory_recall(args).await?)
        }
        MemoryCommands::Update { id, query, content, session_id } => {
            let mut args = json!({ "content": content, "session_id": session_id });
            if let Some(id) = id {
                args["id"] = json!(id);
            }
            set_opt(&mut args, "query", query);
            ("memory_update", dispatcher.memory_update(args).await?)
        }
        MemoryCommands::Delete { id } => ("memory_delete", dispatcher.memory_delete(json!({ "id": id })).await?),
        MemoryCommands::Forget { project, tags } => {
            let mut args = json!({ "tags": tags });
            set_opt(&mut args, "project", project);
            ("memory_forget", dispatcher.memory_forget(args).await?)
        }
        MemoryCommands::Consolidate { project, ktype, threshold, dry_run } => {
            let mut args = json!({ "dry_run": dry_run });
            set_opt(&mut args, "project", project);
            set_opt(&mut args, "type", ktype);
            if let Some(t) = threshold {
                args["threshold"] = json!(t);
            }
            ("memory_consolidate", dispatcher.memory_consolidate(args).await?)
        }
        MemoryCommands::Export { project } => {
            let mut args = json!({});
            set_opt(&mut args, "project", project);
            ("memory_export", dispatcher.memory_export(args).await?)
        }
        MemoryCommands::History { id } => ("memory_history", dispatcher.memory_history(json!({ "id": id })).await?),
        MemoryCommands::Relate { from_id, to_id, rtype } => (
            "memory_relate",
            dispatcher.memory_relate(json!({ "from_id": from_id, "to_id": to_id, "type": rtype })).await?,
        ),
        MemoryCommands::SearchByTag { tags, project, limit } => {
            let mut args = json!({ "tags": tags });
            set_opt(&mut args, "project", project);
            if let Some(l) = limit {
                args["limit"] = json!(l);
            }
            ("memory_search_by_tag", dispatcher.memory_search_by_tag(args).await?)
        }
        MemoryCommands::Observe { session_id, tool_name, observation_type, summary, files_affected, project, branch } => {
            let mut args = json!({
                "session_id": session_id,
                "tool_name": tool_name,
                "observation_type": observation_type,
                "summary": summary,
                "files_affected": files_affected,
            });
            set_opt(&mut args, "project", project);
            set_opt(&mut args, "branch", branch);
            ("memory_observe", dispatcher.memory_observe(args).await?)
        }
        MemoryCommands::Timeline { sessions_ago, session_number, date_from, date_to, text_query, project, limit } => {
            let mut args = json!({});
            if let Some(v) = sessions_ago {
                args["sessions_ago"] = json!(v);
            }
            if let Some(v) = session_number {
                args["session_number"] = json!(v);
            }
            set_opt(&mut args, "date_from", date_from);
            set_opt(&mut args, "date_to", date_to);
            set_opt(&mut args, "text_query", text_query);
            set_opt(&mut args, "project", project);
            if let Some(l) = limit {
                args["limit"] = json!(l);
            }
            ("memory_timeline", dispatcher.memory_timeline(args).await?)
        }
        MemoryCommands::Stats => ("memory_stats", dispatcher.memory_stats(json!({})).await?),
        MemoryCommands::ExtractSession { command } => match command {
            ExtractSessionCommands::List => ("memory_extract_session", dispatcher.memory_extract_session_list().await?),
            ExtractSessionCommands::Enqueue { session_id, project, content } => (
                "memory_extract_session",
                dispatcher.memory_extract_session_enqueue(&session_id, &project, &content).await?,
            ),
            ExtractSessionCommands::Get { session_id, chunk } => {
                ("memory_extract_session", dispatcher.memory_extract_session_get(&session_id, chunk).await?)
            }
            ExtractSessionCommands::Complete { session_id } => {
                ("memory_extract_session", dispatcher.memory_extract_session_complete(&session_id).await?)
            }
        },
    })
}

fn set_opt(args: &mut Value, key: &str, value: Option<String>) {
    if let Some(v) = value {
        args[key] = json!(v);
    }
}
