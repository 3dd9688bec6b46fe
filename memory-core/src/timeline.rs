//! Timeline recording/query and the stats/health-score view (component I,
//! spec.md §4.I).

use std::collections::HashSet;
use std::path::Path;

use crate::config::MemoryConfig;
use crate::storage_backend::{KnowledgeFilter, StorageBackend};
use crate::types::{default_project, KnowledgeItem, KnowledgeStatus, Session, TimelineEvent};
use crate::Result;

/// First 30 events attached to a timeline session view (spec.md §4.I).
const EVENTS_PER_SESSION: usize = 30;

/// Append a timeline event and return its assigned id.
pub async fn record_event(
    storage: &dyn StorageBackend,
    session_id: &str,
    project: Option<&str>,
    event: &str,
    summary: &str,
    details: &str,
    files: Vec<String>,
) -> Result<i64> {
    let event = TimelineEvent {
        id: 0,
        session_id: session_id.to_string(),
        ts: chrono::Utc::now().to_rfc3339(),
        event: event.to_string(),
        summary: summary.to_string(),
        details: details.to_string(),
        project: project.map(str::to_string).unwrap_or_else(default_project),
        files,
    };
    storage.insert_timeline_event(&event).await
}

/// One session surfaced by [`query_timeline`], with its global 1-based
/// index, first 30 timeline events, and active knowledge items attached.
#[derive(Debug, Clone)]
pub struct TimelineSessionView {
    pub session: Session,
    pub session_number: usize,
    pub events: Vec<TimelineEvent>,
    pub knowledge: Vec<KnowledgeItem>,
}

/// `date_to` is inclusive of the whole day: a bare `YYYY-MM-DD` is expanded
/// to its end-of-day instant so the range comparison (a lexical comparison
/// over RFC3339 strings) includes every event that day.
fn expand_end_of_day(date: &str) -> String {
    if date.contains('T') {
        date.to_string()
    } else {
        format!("{date}T23:59:59Z")
    }
}

/// Run one of the timeline's four query modes (spec.md §4.I):
/// `sessions_ago` (offset from the end of the global session list), an
/// absolute `session_number` (1-based, negative counts from the end), a
/// `date_from`/`date_to` range (both inclusive), or a `text_query` matching
/// session summaries and any knowledge item under the session. With none
/// of those set, falls back to the most recent `limit` sessions.
#[allow(clippy::too_many_arguments)]
pub async fn query_timeline(
    storage: &dyn StorageBackend,
    sessions_ago: Option<usize>,
    session_number: Option<i64>,
    date_from: Option<&str>,
    date_to: Option<&str>,
    text_query: Option<&str>,
    project: Option<&str>,
    limit: usize,
) -> Result<Vec<TimelineSessionView>> {
    let all = storage.all_sessions_chronological().await?;
    let total = all.len();
    let mut selected: Vec<(usize, Session)> = Vec::new();

    if let Some(ago) = sessions_ago {
        if ago < total {
            let idx = total - 1 - ago;
            selected.push((idx + 1, all[idx].clone()));
        }
    } else if let Some(num) = session_number {
        let idx = if num > 0 { num - 1 } else { total as i64 + num };
        if idx >= 0 && (idx as usize) < total {
            selected.push((idx as usize + 1, all[idx as usize].clone()));
        }
    } else if date_from.is_some() || date_to.is_some() {
        let from = date_from.unwrap_or("0000-01-01T00:00:00Z");
        let to = date_to.map(expand_end_of_day);
        for (i, s) in all.iter().enumerate() {
            let in_range = s.started_at.as_str() >= from && to.as_deref().map_or(true, |t| s.started_at.as_str() <= t);
            let in_project = project.map_or(true, |p| s.project == p);
            if in_range && in_project {
                selected.push((i + 1, s.clone()));
            }
        }
    } else if let Some(q) = text_query {
        let q_lower = q.to_lowercase();
        let mut seen: HashSet<String> = HashSet::new();
        for (i, s) in all.iter().enumerate() {
            if s.summary.as_deref().is_some_and(|sum| sum.to_lowercase().contains(&q_lower)) {
                seen.insert(s.id.clone());
                selected.push((i + 1, s.clone()));
            }
        }
        let filter = KnowledgeFilter {
            project: project.map(str::to_string),
            status: Some(KnowledgeStatus::Active),
            ..Default::default()
        };
        for hit in storage.fts_search(q, &filter, limit.max(20)).await? {
            if seen.insert(hit.item.session_id.clone()) {
                if let Some(idx) = all.iter().position(|s| s.id == hit.item.session_id) {
                    selected.push((idx + 1, all[idx].clone()));
                }
            }
        }
        selected.sort_by_key(|(idx, _)| *idx);
    } else {
        let mut recent: Vec<(usize, Session)> = all
            .iter()
            .enumerate()
            .filter(|(_, s)| project.map_or(true, |p| s.project == p))
            .map(|(i, s)| (i + 1, s.clone()))
            .collect();
        recent.reverse();
        selected = recent;
    }

    selected.truncate(limit);

    let mut views = Vec::with_capacity(selected.len());
    for (session_number, session) in selected {
        let events = storage.list_timeline(Some(&session.id), None, EVENTS_PER_SESSION).await?;
        let knowledge = storage.knowledge_for_session(&session.id).await?;
        views.push(TimelineSessionView { session, session_number, events, knowledge });
    }
    Ok(views)
}

/// A point-in-time snapshot of the knowledge base's health.
#[derive(Debug, Clone)]
pub struct StatsSummary {
    pub active_count: i64,
    pub archived_count: i64,
    pub purged_count: i64,
    pub consolidated_count: i64,
    pub superseded_count: i64,
    pub total_sessions: i64,
    pub open_error_count: i64,
    pub active_rule_count: i64,
    /// Active items whose `last_confirmed` is older than
    /// [`crate::constants::defaults::STALE_THRESHOLD_DAYS`].
    pub stale_count: i64,
    /// Active items that have never been recalled (`recall_count == 0`).
    pub never_recalled_count: i64,
    /// On-disk bytes used, per named subdirectory under the memory root.
    pub storage_footprint: Vec<(String, u64)>,
    /// `max(0, 1 − 0.5·stale/active − 0.3·never_recalled/active)`.
    pub health_score: f64,
}

fn count_for(counts: &[(KnowledgeStatus, i64)], status: KnowledgeStatus) -> i64 {
    counts
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, c)| *c)
        .unwrap_or(0)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

/// Compute [`StatsSummary`] from current storage counts and on-disk
/// directory sizes under `config.memory_dir`.
pub async fn compute_stats(storage: &dyn StorageBackend, config: &MemoryConfig) -> Result<StatsSummary> {
    let counts = storage.knowledge_counts_by_status().await?;
    let active_count = count_for(&counts, KnowledgeStatus::Active);
    let archived_count = count_for(&counts, KnowledgeStatus::Archived);
    let purged_count = count_for(&counts, KnowledgeStatus::Purged);
    let consolidated_count = count_for(&counts, KnowledgeStatus::Consolidated);
    let superseded_count = count_for(&counts, KnowledgeStatus::Superseded);
    let open_error_count = storage.open_error_count().await?;
    let active_rule_count = storage.active_rule_count().await?;
    let total_sessions = storage.all_sessions_chronological().await?.len() as i64;

    let now = chrono::Utc::now();
    let stale_cutoff = now - chrono::Duration::days(crate::constants::defaults::STALE_THRESHOLD_DAYS);
    let active_items = storage.all_active(None).await?;
    let stale_count = active_items
        .iter()
        .filter(|i| {
            chrono::DateTime::parse_from_rfc3339(&i.last_confirmed)
                .map(|t| t.with_timezone(&chrono::Utc) < stale_cutoff)
                .unwrap_or(false)
        })
        .count() as i64;
    let never_recalled_count = active_items.iter().filter(|i| i.recall_count == 0).count() as i64;

    let storage_footprint: Vec<(String, u64)> = config
        .footprint_dirs()
        .into_iter()
        .map(|(name, path)| (name.to_string(), dir_size(&path)))
        .collect();

    let health_score = if active_count > 0 {
        let stale_ratio = stale_count as f64 / active_count as f64;
        let never_recalled_ratio = never_recalled_count as f64 / active_count as f64;
        (1.0 - 0.5 * stale_ratio - 0.3 * never_recalled_ratio).max(0.0)
    } else {
        1.0
    };

    Ok(StatsSummary {
        active_count,
        archived_count,
        purged_count,
        consolidated_count,
        superseded_count,
        total_sessions,
        open_error_count,
        active_rule_count,
        stale_count,
        never_recalled_count,
        storage_footprint,
        health_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_for_defaults_to_zero() {
        let counts = vec![(KnowledgeStatus::Active, 5)];
        assert_eq!(count_for(&counts, KnowledgeStatus::Active), 5);
        assert_eq!(count_for(&counts, KnowledgeStatus::Purged), 0);
    }

    #[test]
    fn expand_end_of_day_only_touches_bare_dates() {
        assert_eq!(expand_end_of_day("2026-01-01"), "2026-01-01T23:59:59Z");
        assert_eq!(expand_end_of_day("2026-01-01T10:00:00Z"), "2026-01-01T10:00:00Z");
    }

    #[test]
    fn dir_size_of_missing_dir_is_zero() {
        assert_eq!(dir_size(Path::new("/nonexistent/path/for/sure")), 0);
    }
}
