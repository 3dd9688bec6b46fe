//! Error logging: the ledger's entry point.

use tracing::instrument;

use crate::constants::logging::LOG_PREFIX_LEDGER;
use crate::sanitizer::sanitize;
use crate::storage_backend::StorageBackend;
use crate::types::{default_project, ErrorCategory, ErrorRecord, ErrorStatus};
use crate::Result;

/// Log a new error against the ledger. `description` and `context` are
/// sanitized before storage, matching every other durable text field.
#[instrument(skip(storage, description, context, fix), fields(category = %category))]
pub async fn log_error(
    storage: &dyn StorageBackend,
    session_id: &str,
    category: ErrorCategory,
    severity: &str,
    description: &str,
    context: &str,
    fix: &str,
    project: Option<&str>,
    tags: Vec<String>,
) -> Result<i64> {
    let (description, _) = sanitize(description);
    let (context, _) = sanitize(context);
    let (fix, _) = sanitize(fix);
    let now = chrono::Utc::now().to_rfc3339();
    let resolved = !fix.is_empty();
    let record = ErrorRecord {
        id: 0,
        session_id: session_id.to_string(),
        category,
        severity: severity.to_string(),
        description,
        context,
        fix,
        project: project.map(str::to_string).unwrap_or_else(default_project),
        tags,
        status: if resolved { ErrorStatus::Resolved } else { ErrorStatus::Open },
        resolved_at: if resolved { Some(now.clone()) } else { None },
        insight_id: None,
        created_at: now,
    };
    let id = storage.insert_error(&record).await?;
    tracing::debug!("{} logged error #{id} ({category})", LOG_PREFIX_LEDGER);
    Ok(id)
}

/// Mark an error resolved, optionally linking the insight extracted from it.
#[instrument(skip(storage))]
pub async fn resolve_error(
    storage: &dyn StorageBackend,
    error_id: i64,
    insight_id: Option<i64>,
) -> Result<()> {
    let mut record = storage
        .get_error(error_id)
        .await?
        .ok_or(crate::Error::NotFound(error_id))?;
    record.status = if insight_id.is_some() {
        crate::types::ErrorStatus::InsightExtracted
    } else {
        crate::types::ErrorStatus::Resolved
    };
    record.resolved_at = Some(chrono::Utc::now().to_rfc3339());
    record.insight_id = insight_id;
    storage.update_error(&record).await
}
