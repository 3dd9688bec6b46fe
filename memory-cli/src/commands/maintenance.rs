//! `maintenance`: the retention sweep (archive/purge aging knowledge,
//! purge stale observations). Not itself a named tool — run on a schedule
//! by the host process in production, exposed here for operators.

use anyhow::Result;
use memory_core::tools::ToolDispatcher;
use serde_json::Value;

pub async fn run(dispatcher: &ToolDispatcher, dry_run: bool) -> Result<(&'static str, Value)> {
    Ok(("maintenance", dispatcher.run_maintenance(dry_run).await?))
}
