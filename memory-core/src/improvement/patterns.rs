//! Recurring-error pattern detection and the ledger's read-only analysis
//! views (spec.md §4.J "Pattern analysis").

use std::collections::HashMap;

use crate::constants::defaults;
use crate::storage_backend::StorageBackend;
use crate::types::{ErrorCategory, ErrorRecord, ErrorStatus, Insight, InsightStatus, Rule};
use crate::Result;

/// A detected cluster of at least [`defaults::PATTERN_MIN_OCCURRENCES`]
/// same-category errors within [`defaults::PATTERN_LOOKBACK_DAYS`] for one
/// project, counting every error whose status isn't `insight_extracted`.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub category: ErrorCategory,
    pub project: String,
    pub errors: Vec<ErrorRecord>,
}

/// Scan errors in `category`/`project` over the lookback window (excluding
/// ones already folded into an insight) and report a pattern if the
/// occurrence count meets the threshold.
pub async fn detect_patterns(
    storage: &dyn StorageBackend,
    category: ErrorCategory,
    project: &str,
) -> Result<Option<PatternMatch>> {
    let since = (chrono::Utc::now() - chrono::Duration::days(defaults::PATTERN_LOOKBACK_DAYS))
        .to_rfc3339();
    let errors: Vec<ErrorRecord> = storage
        .errors_since(category, project, &since, None)
        .await?
        .into_iter()
        .filter(|e| e.status != ErrorStatus::InsightExtracted)
        .collect();
    if (errors.len() as i64) >= defaults::PATTERN_MIN_OCCURRENCES {
        Ok(Some(PatternMatch {
            category,
            project: project.to_string(),
            errors,
        }))
    } else {
        Ok(None)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if out.len() < s.len() {
        out.push('\u{2026}');
    }
    out
}

/// A suggestion raised after logging an error that completes a pattern:
/// either upvote the matching active insight, or create a new one.
#[derive(Debug, Clone)]
pub struct PatternSuggestion {
    pub category: ErrorCategory,
    pub project: String,
    pub count: i64,
    pub action: &'static str,
    pub insight_id: Option<i64>,
    pub source_error_ids: Vec<i64>,
    pub descriptions: Vec<String>,
}

/// Called right after `self_error_log` inserts a new error. Runs
/// [`detect_patterns`] and, if a pattern is found, looks up any active
/// insight already covering the same (category, project) to decide whether
/// the caller should upvote it or create a new one.
pub async fn suggest_after_error(
    storage: &dyn StorageBackend,
    category: ErrorCategory,
    project: &str,
) -> Result<Option<PatternSuggestion>> {
    let Some(pattern) = detect_patterns(storage, category, project).await? else {
        return Ok(None);
    };
    let existing = storage
        .list_insights(Some(project), Some(InsightStatus::Active), usize::MAX)
        .await?
        .into_iter()
        .find(|i| i.category == category);
    let sample: Vec<&ErrorRecord> = pattern.errors.iter().take(defaults::PATTERN_SUGGESTION_SAMPLE).collect();
    Ok(Some(PatternSuggestion {
        category,
        project: project.to_string(),
        count: pattern.errors.len() as i64,
        action: if existing.is_some() { "upvote" } else { "add" },
        insight_id: existing.map(|i| i.id),
        source_error_ids: sample.iter().map(|e| e.id).collect(),
        descriptions: sample.iter().map(|e| truncate(&e.description, 120)).collect(),
    }))
}

/// `error_patterns` view: category x severity frequency over `days`, plus
/// the subset that repeats at least [`defaults::PATTERN_MIN_OCCURRENCES`]
/// times.
pub async fn error_patterns(
    storage: &dyn StorageBackend,
    project: &str,
    days: i64,
) -> Result<serde_json::Value> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339();
    let errors: Vec<ErrorRecord> = storage
        .list_errors(Some(project), None, usize::MAX)
        .await?
        .into_iter()
        .filter(|e| e.created_at.as_str() >= cutoff.as_str())
        .collect();
    let mut buckets: HashMap<(ErrorCategory, String), i64> = HashMap::new();
    for e in &errors {
        *buckets.entry((e.category, e.severity.clone())).or_insert(0) += 1;
    }
    let frequencies: Vec<serde_json::Value> = buckets
        .iter()
        .map(|((category, severity), count)| {
            serde_json::json!({ "category": category.as_str(), "severity": severity, "count": count })
        })
        .collect();
    let repeating: Vec<serde_json::Value> = buckets
        .iter()
        .filter(|(_, count)| **count >= defaults::PATTERN_MIN_OCCURRENCES)
        .map(|((category, severity), count)| {
            serde_json::json!({ "category": category.as_str(), "severity": severity, "count": count })
        })
        .collect();
    Ok(serde_json::json!({ "frequencies": frequencies, "repeating": repeating }))
}

/// `insight_candidates` view: active insights already eligible for
/// promotion but not yet promoted.
pub async fn insight_candidates(storage: &dyn StorageBackend, project: &str) -> Result<Vec<Insight>> {
    let insights = storage
        .list_insights(Some(project), Some(InsightStatus::Active), usize::MAX)
        .await?
        .into_iter()
        .filter(Insight::promotion_eligible)
        .collect();
    Ok(insights)
}

/// `rule_effectiveness` view: per-rule fire/success stats plus the stale
/// flag (`last_fired` more than [`defaults::RULE_STALE_DAYS`] ago, or never
/// fired).
pub async fn rule_effectiveness(storage: &dyn StorageBackend, project: &str) -> Result<Vec<serde_json::Value>> {
    let now = chrono::Utc::now();
    let rules: Vec<Rule> = storage
        .list_rules(None, usize::MAX)
        .await?
        .into_iter()
        .filter(|r| r.project == project)
        .collect();
    Ok(rules
        .iter()
        .map(|r| {
            let stale = match &r.last_fired {
                Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
                    .map(|t| (now - t.with_timezone(&chrono::Utc)).num_days() > defaults::RULE_STALE_DAYS)
                    .unwrap_or(true),
                None => true,
            };
            serde_json::json!({
                "id": r.id,
                "content": r.content,
                "status": r.status,
                "fire_count": r.fire_count,
                "success_count": r.success_count,
                "fail_count": r.fail_count,
                "success_rate": r.success_rate(),
                "last_fired": r.last_fired,
                "stale": stale,
            })
        })
        .collect())
}

/// `improvement_trend` view: error counts bucketed into
/// [`defaults::TREND_WEEKS`] trailing 7-day windows, oldest first, with a
/// coarse up/down/flat direction tag comparing the last two buckets.
pub async fn improvement_trend(storage: &dyn StorageBackend, project: &str) -> Result<serde_json::Value> {
    let now = chrono::Utc::now();
    let horizon = (now - chrono::Duration::weeks(defaults::TREND_WEEKS)).to_rfc3339();
    let errors: Vec<ErrorRecord> = storage
        .list_errors(Some(project), None, usize::MAX)
        .await?
        .into_iter()
        .filter(|e| e.created_at.as_str() >= horizon.as_str())
        .collect();
    let mut buckets = vec![0i64; defaults::TREND_WEEKS as usize];
    for e in &errors {
        if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&e.created_at) {
            let age_days = (now - created.with_timezone(&chrono::Utc)).num_days();
            let week = (age_days / 7).clamp(0, defaults::TREND_WEEKS - 1);
            let idx = (defaults::TREND_WEEKS - 1 - week) as usize;
            buckets[idx] += 1;
        }
    }
    let direction = match (buckets.len(), buckets.last(), buckets.get(buckets.len().saturating_sub(2))) {
        (n, Some(&last), Some(&prev)) if n >= 2 => {
            if last > prev {
                "up"
            } else if last < prev {
                "down"
            } else {
                "flat"
            }
        }
        _ => "flat",
    };
    Ok(serde_json::json!({ "weekly_counts": buckets, "direction": direction }))
}

/// `full_report`: every analysis view in one payload.
pub async fn full_report(storage: &dyn StorageBackend, project: &str, days: i64) -> Result<serde_json::Value> {
    let patterns = error_patterns(storage, project, days).await?;
    let candidates = insight_candidates(storage, project).await?;
    let rules = rule_effectiveness(storage, project).await?;
    let trend = improvement_trend(storage, project).await?;
    Ok(serde_json::json!({
        "error_patterns": patterns,
        "insight_candidates": candidates,
        "rule_effectiveness": rules,
        "improvement_trend": trend,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_match_carries_category_and_project() {
        let m = PatternMatch {
            category: ErrorCategory::Timeout,
            project: "api".to_string(),
            errors: vec![],
        };
        assert_eq!(m.category, ErrorCategory::Timeout);
        assert_eq!(m.project, "api");
    }

    #[test]
    fn truncate_appends_ellipsis_only_when_cut() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcde\u{2026}");
    }
}
