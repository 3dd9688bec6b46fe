//! The four-tier retrieval pipeline (spec.md §4.H): lexical, semantic,
//! fuzzy and one-hop graph expansion, merged by id and rescaled by decay
//! and recall frequency.

use std::collections::HashMap;

use chrono::Utc;
use tracing::instrument;

use crate::constants::logging::LOG_PREFIX_RETRIEVAL;
use crate::embedder::Embedder;
use crate::lifecycle::decay_factor;
use crate::similarity::ratio;
use crate::storage_backend::{KnowledgeFilter, StorageBackend};
use crate::types::KnowledgeItem;
use crate::vector::VectorIndex;
use crate::Result;

/// Minimum fuzzy-tier ratio for an item to be considered a hit at all.
const FUZZY_INCLUSION_THRESHOLD: f64 = 0.35;
const FUZZY_WEIGHT: f64 = 0.6;
const GRAPH_WEIGHT: f64 = 0.4;
const GRAPH_EXPANSION_SEEDS: usize = 5;
/// Floor applied to the normalized lexical score so a weak FTS match never
/// drops out entirely once merged with the other tiers.
const LEXICAL_SCORE_FLOOR: f64 = 0.5;

/// A knowledge item with its final, post-decay retrieval score.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: KnowledgeItem,
    pub score: f64,
    /// Which tier(s) contributed this hit: `fts`/`semantic`/`fuzzy`/`graph`,
    /// in the order they were merged in.
    pub via: Vec<&'static str>,
    /// Raw decay factor at merge time, reported separately from `score`
    /// (which also folds in the recall-frequency boost).
    pub decay: f64,
}

/// One candidate's running score, item, and tier-attribution tags while
/// the four tiers are being merged.
struct MergedEntry {
    score: f64,
    item: KnowledgeItem,
    via: Vec<&'static str>,
}

fn passes_filter(item: &KnowledgeItem, filter: &KnowledgeFilter) -> bool {
    if !item.status.is_active() {
        return false;
    }
    if let Some(project) = &filter.project {
        if &item.project != project {
            return false;
        }
    }
    if let Some(ktype) = filter.ktype {
        if item.ktype != ktype {
            return false;
        }
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| item.tags.contains(t)) {
        return false;
    }
    if let Some(branch) = &filter.branch {
        if !item.branch.is_empty() && &item.branch != branch {
            return false;
        }
    }
    true
}

/// Tier 1: normalize raw FTS ranks to `[0.5, 2.0]`-ish scores. `m` is the
/// largest absolute rank among the hits; a hit's score is
/// `clamp(|rank| / max(m, 0.01) * 2.0, lower = 0.5)`.
fn normalize_lexical(hits: &[crate::storage_backend::FtsHit]) -> HashMap<i64, (f64, KnowledgeItem)> {
    let m = hits
        .iter()
        .map(|h| h.raw_rank.abs())
        .fold(0.0_f64, f64::max);
    let denom = m.max(0.01);
    hits.iter()
        .map(|h| {
            let score = (h.raw_rank.abs() / denom * 2.0).max(LEXICAL_SCORE_FLOOR);
            (h.item.id, (score, h.item.clone()))
        })
        .collect()
}

/// Tiers 1, 3 and 4: insert a brand-new candidate, tagged `via`. Never
/// overwrites an id that's already present — even a higher-scoring later
/// hit for the same item yields to whichever tier found it first
/// (spec.md §4.H).
fn insert_if_absent(
    into: &mut HashMap<i64, MergedEntry>,
    id: i64,
    score: f64,
    item: KnowledgeItem,
    via: &'static str,
) {
    into.entry(id).or_insert_with(|| MergedEntry { score, item, via: vec![via] });
}

/// Tier 2 (semantic): additive combine. An id already surfaced by tier 1
/// has its score *increased* by the semantic hit and gains the `semantic`
/// tag; an id seen for the first time is inserted fresh (spec.md §4.H).
fn add_or_insert(
    into: &mut HashMap<i64, MergedEntry>,
    id: i64,
    score: f64,
    item: KnowledgeItem,
) {
    into.entry(id)
        .and_modify(|entry| {
            entry.score += score;
            entry.via.push("semantic");
        })
        .or_insert_with(|| MergedEntry { score, item, via: vec!["semantic"] });
}

/// Run all four tiers against `query`, merge by id, apply the decay and
/// recall-boost rescale, and return the top `limit` results sorted
/// descending by score.
#[instrument(skip(storage, vector_index, embedder, query), fields(limit))]
pub async fn search(
    storage: &dyn StorageBackend,
    vector_index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    filter: &KnowledgeFilter,
    limit: usize,
    half_life_days: i64,
) -> Result<Vec<ScoredItem>> {
    let candidate_limit = (limit * 3).max(20);
    let mut merged: HashMap<i64, MergedEntry> = HashMap::new();

    // Tier 1: lexical.
    let lexical_hits = storage.fts_search(query, filter, candidate_limit).await?;
    for (id, (score, item)) in normalize_lexical(&lexical_hits) {
        insert_if_absent(&mut merged, id, score, item, "fts");
    }

    // Tier 2: semantic. No-op when no embedder is configured. Any adapter
    // failure is logged and swallowed (spec.md §4.D/§4.E/§7): the pipeline
    // continues with fewer tiers rather than failing the whole recall.
    // An id also found by tier 1 has its score *added* to, not replaced
    // (spec.md §4.H): both signals agreeing should outrank either alone.
    if embedder.dimensions() > 0 {
        match embedder.embed(query).await {
            Ok(query_vec) => match vector_index.search(&query_vec, candidate_limit).await {
                Ok(semantic_hits) => {
                    for hit in semantic_hits {
                        if let Some(item) = storage.get_knowledge(hit.id).await? {
                            if passes_filter(&item, filter) {
                                let score = (1.0 - hit.distance as f64).max(0.0);
                                add_or_insert(&mut merged, item.id, score, item);
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("{} vector index query failed, skipping tier 2: {e}", LOG_PREFIX_RETRIEVAL),
            },
            Err(e) => tracing::warn!("{} embedder failed, skipping tier 2: {e}", LOG_PREFIX_RETRIEVAL),
        }
    }

    // Tier 3: fuzzy, matched against the first 200 characters of content
    // only (spec.md §4.H). Only probed when the first two tiers haven't
    // already filled the requested limit.
    if merged.len() < limit {
        let mut recent = storage.all_active(filter.project.as_deref()).await?;
        recent.sort_by(|a, b| b.last_confirmed.cmp(&a.last_confirmed));
        recent.truncate(limit * 5);
        for item in recent.into_iter().filter(|i| passes_filter(i, filter)) {
            if merged.contains_key(&item.id) {
                continue;
            }
            let head: String = item.content.chars().take(200).collect();
            let r = ratio(query, &head);
            if r > FUZZY_INCLUSION_THRESHOLD {
                let score = r * FUZZY_WEIGHT;
                insert_if_absent(&mut merged, item.id, score, item, "fuzzy");
            }
        }
    }

    // Tier 4: one-hop graph expansion from the current top-5.
    let mut ranked: Vec<(i64, f64)> = merged.iter().map(|(id, entry)| (*id, entry.score)).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for &(seed_id, seed_score) in ranked.iter().take(GRAPH_EXPANSION_SEEDS) {
        let relations = storage.relations_from(seed_id, None).await?;
        for relation in relations {
            if let Some(item) = storage.get_knowledge(relation.to_id).await? {
                if passes_filter(&item, filter) {
                    let score = seed_score * GRAPH_WEIGHT;
                    insert_if_absent(&mut merged, item.id, score, item, "graph");
                }
            }
        }
    }

    // Decay + recall-frequency rescale.
    let now = Utc::now();
    let mut results: Vec<ScoredItem> = merged
        .into_values()
        .map(|entry| {
            let decay = decay_factor(&entry.item.last_confirmed, now, half_life_days);
            let recall_boost = (entry.item.recall_count as f64 * 0.05).min(0.3);
            let score = entry.score * (decay + recall_boost);
            ScoredItem { item: entry.item, score, via: entry.via, decay }
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    tracing::debug!("{} {} result(s) for query", LOG_PREFIX_RETRIEVAL, results.len());
    Ok(results)
}

/// Rough token estimate for context-budget shaping: ~4 characters/token,
/// matching the original's coarse estimator.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_backend::FtsHit;
    use crate::types::{default_project, KnowledgeStatus, KnowledgeType};

    fn item(id: i64, content: &str) -> KnowledgeItem {
        KnowledgeItem {
            id,
            session_id: "s1".to_string(),
            ktype: KnowledgeType::Fact,
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
    fn normalize_lexical_floors_weak_matches() {
        let hits = vec![
            FtsHit { item: item(1, "a"), raw_rank: -10.0 },
            FtsHit { item: item(2, "b"), raw_rank: -0.001 },
        ];
        let scores = normalize_lexical(&hits);
        assert!((scores[&1].0 - 2.0).abs() < 1e-9);
        assert!(scores[&2].0 >= LEXICAL_SCORE_FLOOR);
    }

    #[test]
    fn insert_if_absent_keeps_first_writer() {
        let mut map = HashMap::new();
        insert_if_absent(&mut map, 1, 0.3, item(1, "a"), "fts");
        insert_if_absent(&mut map, 1, 0.9, item(1, "a"), "fuzzy");
        assert_eq!(map[&1].score, 0.3);
        assert_eq!(map[&1].via, vec!["fts"]);
    }

    #[test]
    fn add_or_insert_combines_with_existing_score() {
        let mut map = HashMap::new();
        insert_if_absent(&mut map, 1, 0.3, item(1, "a"), "fts");
        add_or_insert(&mut map, 1, 0.4, item(1, "a"));
        assert!((map[&1].score - 0.7).abs() < 1e-9);
        assert_eq!(map[&1].via, vec!["fts", "semantic"]);

        add_or_insert(&mut map, 2, 0.5, item(2, "b"));
        assert_eq!(map[&2].score, 0.5);
        assert_eq!(map[&2].via, vec!["semantic"]);
    }

    #[test]
    fn estimate_tokens_is_roughly_four_chars() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 1);
    }
}
