//! Decay scoring and the retention sweep that ages knowledge through
//! `active -> archived -> purged` (spec.md §4.G).

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::constants::logging::LOG_PREFIX_LIFECYCLE;
use crate::storage_backend::StorageBackend;
use crate::types::{KnowledgeItem, KnowledgeStatus};
use crate::Result;

/// Exponential decay factor for an item last confirmed `last_confirmed`
/// days ago relative to `now`, given `half_life_days`.
///
/// `max(0.01, exp(-days * ln2 / half_life))`, floored so an item's score
/// never hits exactly zero. An item with no parseable `last_confirmed`
/// timestamp gets a neutral `0.5`.
pub fn decay_factor(last_confirmed: &str, now: DateTime<Utc>, half_life_days: i64) -> f64 {
    let Ok(confirmed) = DateTime::parse_from_rfc3339(last_confirmed) else {
        return 0.5;
    };
    let days = (now - confirmed.with_timezone(&Utc)).num_seconds() as f64 / 86400.0;
    let half_life = half_life_days.max(1) as f64;
    (-days * std::f64::consts::LN_2 / half_life).exp().max(0.01)
}

fn days_since(ts: &str, now: DateTime<Utc>) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| (now - dt.with_timezone(&Utc)).num_days())
}

/// Result of [`plan_retention`]: items to transition, without having
/// touched storage yet.
#[derive(Debug, Default)]
pub struct RetentionPlan {
    pub to_archive: Vec<KnowledgeItem>,
    pub to_purge: Vec<KnowledgeItem>,
}

/// Decide which active items should archive and which archived items
/// should purge, given the current time. Pure: callers apply the plan
/// (or merely report it, for `dry_run`).
///
/// An active item archives once its `last_confirmed` is older than
/// `archive_after_days` AND it has never been recalled AND its confidence
/// is below 0.8 — a confidently held or actively-recalled fact survives
/// longer even if stale (spec.md §4.G). An archived item purges once its
/// `last_confirmed` is older than `purge_after_days`, unconditionally.
pub fn plan_retention(
    active: &[KnowledgeItem],
    archived: &[KnowledgeItem],
    now: DateTime<Utc>,
    archive_after_days: i64,
    purge_after_days: i64,
) -> RetentionPlan {
    let mut plan = RetentionPlan::default();
    for item in active {
        if let Some(days) = days_since(&item.last_confirmed, now) {
            if days >= archive_after_days && item.recall_count == 0 && item.confidence < 0.8 {
                plan.to_archive.push(item.clone());
            }
        }
    }
    for item in archived {
        if let Some(days) = days_since(&item.last_confirmed, now) {
            if days >= purge_after_days {
                plan.to_purge.push(item.clone());
            }
        }
    }
    plan
}

/// Apply a [`RetentionPlan`]: flips status and writes through storage.
/// Returns `(archived_count, purged_count)`.
#[instrument(skip(storage, plan))]
pub async fn apply_retention(storage: &dyn StorageBackend, plan: &RetentionPlan) -> Result<(u64, u64)> {
    for item in &plan.to_archive {
        let mut updated = item.clone();
        updated.status = KnowledgeStatus::Archived;
        storage.update_knowledge(&updated).await?;
    }
    for item in &plan.to_purge {
        let mut updated = item.clone();
        updated.status = KnowledgeStatus::Purged;
        storage.update_knowledge(&updated).await?;
    }
    info!(
        "{} archived {} item(s), purged {} item(s)",
        LOG_PREFIX_LIFECYCLE,
        plan.to_archive.len(),
        plan.to_purge.len()
    );
    Ok((plan.to_archive.len() as u64, plan.to_purge.len() as u64))
}

/// Run the full retention sweep against storage: fetch candidates, plan,
/// and apply in one step. `dry_run` skips the apply and only reports.
pub async fn run_retention_sweep(
    storage: &dyn StorageBackend,
    now: DateTime<Utc>,
    archive_after_days: i64,
    purge_after_days: i64,
    dry_run: bool,
) -> Result<RetentionPlan> {
    let active = storage.all_active(None).await?;
    let purge_cutoff = (now - chrono::Duration::days(purge_after_days)).to_rfc3339();
    let archived = storage
        .stale_since(KnowledgeStatus::Archived, &purge_cutoff)
        .await?;
    let plan = plan_retention(&active, &archived, now, archive_after_days, purge_after_days);
    if !dry_run {
        apply_retention(storage, &plan).await?;
    }
    Ok(plan)
}

/// Delete observations older than `retention_days`. Returns the count removed.
pub async fn purge_stale_observations(
    storage: &dyn StorageBackend,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<u64> {
    let cutoff = (now - chrono::Duration::days(retention_days)).to_rfc3339();
    storage.purge_observations_before(&cutoff).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_project;

    fn item_at(id: i64, confidence: f64, last_confirmed: &str) -> KnowledgeItem {
        KnowledgeItem {
            id,
            session_id: "s1".to_string(),
            ktype: crate::types::KnowledgeType::Fact,
            content: "c".to_string(),
            context: String::new(),
            project: default_project(),
            tags: Default::default(),
            status: KnowledgeStatus::Active,
            superseded_by: None,
            confidence,
            source: "agent".to_string(),
            created_at: last_confirmed.to_string(),
            last_confirmed: last_confirmed.to_string(),
            recall_count: 0,
            last_recalled: None,
            branch: String::new(),
        }
    }

    #[test]
    fn decay_factor_is_one_at_zero_days() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let f = decay_factor("2026-01-01T00:00:00Z", now, 90);
        assert!((f - 1.0).abs() < 1e-9);
    }

    #[test]
    fn decay_factor_halves_at_half_life() {
        let now = DateTime::parse_from_rfc3339("2026-04-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let f = decay_factor("2026-01-01T00:00:00Z", now, 90);
        assert!((f - 0.5).abs() < 0.05);
    }

    #[test]
    fn decay_factor_missing_timestamp_is_neutral() {
        let now = Utc::now();
        assert_eq!(decay_factor("not-a-date", now, 90), 0.5);
    }

    #[test]
    fn plan_retention_archives_idle_low_confidence() {
        let now = DateTime::parse_from_rfc3339("2026-07-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let active = vec![
            item_at(1, 0.5, "2026-01-01T00:00:00Z"),
            item_at(2, 0.95, "2026-01-01T00:00:00Z"),
        ];
        let plan = plan_retention(&active, &[], now, 180, 365);
        assert_eq!(plan.to_archive.len(), 1);
        assert_eq!(plan.to_archive[0].id, 1);
    }
}
