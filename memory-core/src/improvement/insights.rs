//! Insight lifecycle: creation, fuzzy-match auto-upvoting, and the
//! direct upvote/downvote/edit/list actions (spec.md §4.J).

use tracing::instrument;

use crate::constants::{defaults, logging::LOG_PREFIX_LEDGER};
use crate::sanitizer::sanitize;
use crate::similarity::ratio;
use crate::storage_backend::StorageBackend;
use crate::types::{default_project, ErrorCategory, ErrorStatus, Insight, InsightStatus};
use crate::{Error, Result};

/// Create a new insight, sanitizing its content first, and mark every
/// source error as `insight_extracted` carrying the new insight id.
#[instrument(skip(storage, content, context), fields(category = %category))]
pub async fn record_insight(
    storage: &dyn StorageBackend,
    session_id: &str,
    content: &str,
    context: &str,
    category: ErrorCategory,
    importance: i32,
    confidence: f64,
    source_error_ids: Vec<i64>,
    project: Option<&str>,
    tags: Vec<String>,
) -> Result<i64> {
    let (content, _) = sanitize(content);
    let (context, _) = sanitize(context);
    let now = chrono::Utc::now().to_rfc3339();
    let insight = Insight {
        id: 0,
        session_id: session_id.to_string(),
        content,
        context,
        category,
        importance,
        confidence: confidence.clamp(0.0, 1.0),
        source_error_ids: source_error_ids.clone(),
        project: project.map(str::to_string).unwrap_or_else(default_project),
        tags,
        status: InsightStatus::Active,
        promoted_to_rule_id: None,
        fire_count: 0,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    let id = storage.insert_insight(&insight).await?;
    for error_id in source_error_ids {
        if let Some(mut error) = storage.get_error(error_id).await? {
            error.status = ErrorStatus::InsightExtracted;
            error.insight_id = Some(id);
            error.resolved_at = Some(now.clone());
            storage.update_error(&error).await?;
        }
    }
    tracing::debug!("{} recorded insight #{id}", LOG_PREFIX_LEDGER);
    Ok(id)
}

/// Bump `candidate`'s importance by one and confidence by
/// [`defaults::INSIGHT_UPVOTE_CONFIDENCE_STEP`] (capped at `1.0`), matching
/// both the `upvote(id)` action and the `add()` auto-upvote path.
async fn bump_upvote(storage: &dyn StorageBackend, mut candidate: Insight) -> Result<i64> {
    candidate.importance += 1;
    candidate.confidence = (candidate.confidence + defaults::INSIGHT_UPVOTE_CONFIDENCE_STEP).min(1.0);
    candidate.updated_at = chrono::Utc::now().to_rfc3339();
    let id = candidate.id;
    storage.update_insight(&candidate).await?;
    tracing::debug!("{} upvoted insight #{id}", LOG_PREFIX_LEDGER);
    Ok(id)
}

/// Compare `content` against every active insight in the same
/// `(category, project)` (spec.md §4.J: "a fuzzy-similar active insight
/// under the same (category, project)"); if the sequence ratio exceeds
/// [`defaults::INSIGHT_SIMILAR_RATIO_THRESHOLD`], upvote that insight
/// instead of creating a duplicate. Returns the upvoted insight id, if any.
#[instrument(skip(storage, content))]
pub async fn upvote_insight(
    storage: &dyn StorageBackend,
    content: &str,
    category: ErrorCategory,
    project: &str,
) -> Result<Option<i64>> {
    let candidates = storage
        .list_insights(Some(project), Some(InsightStatus::Active), usize::MAX)
        .await?;
    for candidate in candidates {
        if candidate.category == category && ratio(content, &candidate.content) > defaults::INSIGHT_SIMILAR_RATIO_THRESHOLD {
            return Ok(Some(bump_upvote(storage, candidate).await?));
        }
    }
    Ok(None)
}

/// `upvote(id)`: direct upvote of an insight by id.
#[instrument(skip(storage))]
pub async fn upvote_insight_by_id(storage: &dyn StorageBackend, id: i64) -> Result<i64> {
    let insight = storage.get_insight(id).await?.ok_or(Error::NotFound(id))?;
    bump_upvote(storage, insight).await
}

/// `downvote(id)`: importance -1; archives the insight once importance
/// drops to zero or below.
#[instrument(skip(storage))]
pub async fn downvote_insight(storage: &dyn StorageBackend, id: i64) -> Result<Insight> {
    let mut insight = storage.get_insight(id).await?.ok_or(Error::NotFound(id))?;
    insight.importance -= 1;
    if insight.importance <= 0 {
        insight.status = InsightStatus::Archived;
    }
    insight.updated_at = chrono::Utc::now().to_rfc3339();
    storage.update_insight(&insight).await?;
    tracing::debug!("{} downvoted insight #{id} (importance={})", LOG_PREFIX_LEDGER, insight.importance);
    Ok(insight)
}

/// `edit(id, content)`: rewrite the content of an active insight.
#[instrument(skip(storage, content))]
pub async fn edit_insight(storage: &dyn StorageBackend, id: i64, content: &str) -> Result<()> {
    let mut insight = storage.get_insight(id).await?.ok_or(Error::NotFound(id))?;
    let (content, _) = sanitize(content);
    insight.content = content;
    insight.updated_at = chrono::Utc::now().to_rfc3339();
    storage.update_insight(&insight).await
}

/// `list(project?, category?)`: top 50 active insights, ordered by
/// importance desc then confidence desc.
#[instrument(skip(storage))]
pub async fn list_insights(
    storage: &dyn StorageBackend,
    project: Option<&str>,
    category: Option<ErrorCategory>,
) -> Result<Vec<Insight>> {
    let mut insights = storage
        .list_insights(project, Some(InsightStatus::Active), usize::MAX)
        .await?;
    if let Some(category) = category {
        insights.retain(|i| i.category == category);
    }
    insights.sort_by(|a, b| {
        b.importance
            .cmp(&a.importance)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });
    insights.truncate(defaults::INSIGHT_LIST_LIMIT);
    Ok(insights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_eligible_respects_both_thresholds() {
        let base = Insight {
            id: 1,
            session_id: "s".to_string(),
            content: "c".to_string(),
            context: String::new(),
            category: ErrorCategory::Timeout,
            importance: 5,
            confidence: 0.8,
            source_error_ids: vec![],
            project: "p".to_string(),
            tags: vec![],
            status: InsightStatus::Active,
            promoted_to_rule_id: None,
            fire_count: 0,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        assert!(base.promotion_eligible());

        let mut low_importance = base.clone();
        low_importance.importance = 4;
        assert!(!low_importance.promotion_eligible());

        let mut low_confidence = base.clone();
        low_confidence.confidence = 0.5;
        assert!(!low_confidence.promotion_eligible());
    }
}
