//! Write-time dedup and the periodic consolidation sweep (spec.md §4.F).

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::constants::{defaults, logging::LOG_PREFIX_DEDUP};
use crate::similarity::{jaccard, ratio};
use crate::storage_backend::{KnowledgeFilter, StorageBackend};
use crate::types::{KnowledgeItem, KnowledgeStatus, KnowledgeType};
use crate::vector::VectorIndex;
use crate::Result;

/// Extract up to [`defaults::DEDUP_TOKEN_WINDOW`] lower-cased tokens longer
/// than [`defaults::DEDUP_MIN_TOKEN_LEN`] characters, in order of first
/// appearance, for building an OR'd lexical probe query.
fn dedup_tokens(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for word in content.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if word.chars().count() <= defaults::DEDUP_MIN_TOKEN_LEN {
            continue;
        }
        if seen.insert(word.clone()) {
            tokens.push(word);
            if tokens.len() >= defaults::DEDUP_TOKEN_WINDOW {
                break;
            }
        }
    }
    tokens
}

/// Outcome of a write-time dedup check.
pub enum DedupOutcome {
    /// No sufficiently similar active item exists; safe to insert.
    Unique,
    /// `existing` is similar enough that it should be reused/refreshed
    /// instead of inserting a new row.
    Duplicate { existing: KnowledgeItem },
}

/// Probe for an existing active item that is effectively the same
/// knowledge as `content` (type- and project-scoped).
///
/// Builds an OR'd FTS query from the leading content tokens, restricts
/// candidates to the top [`defaults::DEDUP_CANDIDATE_LIMIT`] lexical hits of
/// matching type/project/active status, then confirms with the Jaccard and
/// sequence-ratio kernels. Either threshold exceeded (strictly) merges.
#[instrument(skip(storage, content), fields(ktype = %ktype, project = %project))]
pub async fn check_duplicate(
    storage: &dyn StorageBackend,
    content: &str,
    ktype: KnowledgeType,
    project: &str,
) -> Result<DedupOutcome> {
    let tokens = dedup_tokens(content);
    if tokens.is_empty() {
        return Ok(DedupOutcome::Unique);
    }
    let query = tokens.join(" OR ");
    let filter = KnowledgeFilter {
        project: Some(project.to_string()),
        ktype: Some(ktype),
        status: Some(KnowledgeStatus::Active),
        tags: Vec::new(),
        branch: None,
    };
    let hits = storage
        .fts_search(&query, &filter, defaults::DEDUP_CANDIDATE_LIMIT)
        .await?;

    for hit in hits {
        let j = jaccard(content, &hit.item.content);
        let r = ratio(content, &hit.item.content);
        if j > defaults::DEDUP_JACCARD_THRESHOLD || r > defaults::DEDUP_RATIO_THRESHOLD {
            debug!(
                "{} duplicate of #{} (jaccard={:.3}, ratio={:.3})",
                LOG_PREFIX_DEDUP, hit.item.id, j, r
            );
            return Ok(DedupOutcome::Duplicate { existing: hit.item });
        }
    }
    Ok(DedupOutcome::Unique)
}

/// One planned consolidation: `kept` absorbs `superseded`, which move to
/// `KnowledgeStatus::Consolidated` pointing at `kept.id`.
#[derive(Debug, Clone)]
pub struct ConsolidationPlan {
    pub kept: KnowledgeItem,
    pub superseded: Vec<KnowledgeItem>,
}

/// Group `items` into consolidation plans by pairwise Jaccard similarity
/// above `threshold`. Greedy clustering: each not-yet-claimed item seeds a
/// cluster with every later item above threshold; within a cluster the
/// longest `content` is kept.
///
/// Pure planning function: does not touch storage, so callers can preview
/// (dry-run) or apply (spec.md `memory_consolidate` `dry_run` flag).
pub fn plan_consolidation(items: &[KnowledgeItem], threshold: f64) -> Vec<ConsolidationPlan> {
    let mut claimed = vec![false; items.len()];
    let mut plans = Vec::new();

    for i in 0..items.len() {
        if claimed[i] {
            continue;
        }
        let mut cluster = vec![i];
        for j in (i + 1)..items.len() {
            if claimed[j] {
                continue;
            }
            if jaccard(&items[i].content, &items[j].content) > threshold {
                cluster.push(j);
            }
        }
        if cluster.len() < 2 {
            continue;
        }
        for &idx in &cluster {
            claimed[idx] = true;
        }
        let keep_idx = cluster
            .iter()
            .copied()
            .max_by_key(|&idx| items[idx].content.len())
            .expect("cluster is non-empty");
        let kept = items[keep_idx].clone();
        let superseded = cluster
            .into_iter()
            .filter(|&idx| idx != keep_idx)
            .map(|idx| items[idx].clone())
            .collect();
        plans.push(ConsolidationPlan { kept, superseded });
    }
    plans
}

/// Apply a consolidation plan: mark `superseded` items consolidated,
/// pointing at `kept.id`, and drop them from the vector index.
#[instrument(skip(storage, vector_index, plans))]
pub async fn apply_consolidation(
    storage: &dyn StorageBackend,
    vector_index: &dyn VectorIndex,
    plans: &[ConsolidationPlan],
) -> Result<u64> {
    let mut consolidated_count = 0u64;
    for plan in plans {
        for item in &plan.superseded {
            let mut updated = item.clone();
            updated.status = KnowledgeStatus::Consolidated;
            updated.superseded_by = Some(plan.kept.id);
            storage.update_knowledge(&updated).await?;
            vector_index.remove(item.id).await?;
            consolidated_count += 1;
        }
        debug!(
            "{} merged {} item(s) into #{}",
            LOG_PREFIX_DEDUP,
            plan.superseded.len(),
            plan.kept.id
        );
    }
    Ok(consolidated_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_project;

    fn item(id: i64, content: &str) -> KnowledgeItem {
        KnowledgeItem {
            id,
            session_id: "s1".to_string(),
            ktype: KnowledgeType::Lesson,
            content: content.to_string(),
            context: String::new(),
            project: default_project(),
            tags: Default::default(),
            status: KnowledgeStatus::Active,
            superseded_by: None,
            confidence: 0.8,
            source: "agent".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            last_confirmed: "2026-01-01T00:00:00Z".to_string(),
            recall_count: 0,
            last_recalled: None,
            branch: String::new(),
        }
    }

    #[test]
    fn dedup_tokens_caps_window_and_length() {
        let content = "a bb ccc dddd eeeee ffffff ggggggg hhhhhhhh iiiiiiiii jjjjjjjjjj kkkkkkkkkkk lllllllllll mmmmmmmmmmmm";
        let tokens = dedup_tokens(content);
        assert!(tokens.len() <= defaults::DEDUP_TOKEN_WINDOW);
        assert!(tokens.iter().all(|t| t.chars().count() > defaults::DEDUP_MIN_TOKEN_LEN));
    }

    #[test]
    fn plan_consolidation_keeps_longest_and_groups_similar() {
        let items = vec![
            item(1, "use wal mode for sqlite concurrent reads"),
            item(2, "use wal mode for sqlite concurrent reads please"),
            item(3, "totally unrelated content about networking"),
        ];
        let plans = plan_consolidation(&items, defaults::CONSOLIDATE_DEFAULT_THRESHOLD);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].kept.id, 2);
        assert_eq!(plans[0].superseded.len(), 1);
        assert_eq!(plans[0].superseded[0].id, 1);
    }

    #[test]
    fn plan_consolidation_ignores_singletons() {
        let items = vec![
            item(1, "alpha beta gamma"),
            item(2, "delta epsilon zeta"),
        ];
        let plans = plan_consolidation(&items, defaults::CONSOLIDATE_DEFAULT_THRESHOLD);
        assert!(plans.is_empty());
    }
}
