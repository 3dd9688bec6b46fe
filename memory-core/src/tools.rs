//! # Tool dispatch facade (component K)
//!
//! `ToolDispatcher` is the single seam every front-end (CLI, or a wire
//! protocol server outside this workspace's scope) calls through. Every
//! method takes a `serde_json::Value` argument bag, validates/coerces it
//! into a typed request, and returns either a `serde_json::Value` result or
//! a structured [`crate::Error`] — never a panic.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use crate::dedup::{self, DedupOutcome};
use crate::engine::MemoryEngine;
use crate::extraction::ExtractionQueue;
use crate::improvement;
use crate::lifecycle;
use crate::raw_log::RawLog;
use crate::retrieval;
use crate::sanitizer::sanitize;
use crate::storage_backend::KnowledgeFilter;
use crate::timeline;
use crate::types::{
    default_project, ErrorCategory, KnowledgeItem, KnowledgeStatus, KnowledgeType, Relation,
    RelationType, RuleScope,
};
use crate::{Error, Result};

/// How much of each recalled item to return. `Compact` is id+content only,
/// `Summary` truncates content to a token budget, `Full` returns every
/// field including tags and recall metadata.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Compact,
    #[default]
    Summary,
    Full,
}

/// Truncate `s` to its first `n` characters, appending `...` if anything
/// was cut off (spec.md §4.H's `compact`/`summary` title/content shaping).
fn truncate_with_ellipsis(s: &str, n: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(n).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Shape one scored item for a `memory_recall` response at the requested
/// detail level (spec.md §4.H). `via`/`decay` come from the retrieval
/// pipeline's per-candidate tier-attribution and raw decay factor, which
/// are reported alongside but independent of the compound `score`.
fn shape_item(item: &KnowledgeItem, score: f64, via: &[&'static str], decay: f64, detail: DetailLevel) -> Value {
    match detail {
        DetailLevel::Compact => json!({
            "id": item.id,
            "type": item.ktype.as_str(),
            "title": truncate_with_ellipsis(&item.content, 80),
            "project": item.project,
            "score": score,
            "created_at": item.created_at,
        }),
        DetailLevel::Summary => json!({
            "id": item.id,
            "content": truncate_with_ellipsis(&item.content, 150),
            "context": "",
            "project": item.project,
            "tags": item.tags,
            "confidence": item.confidence,
            "created_at": item.created_at,
            "session_id": item.session_id,
            "score": score,
            "via": via,
            "recall_count": item.recall_count,
            "decay": decay,
        }),
        DetailLevel::Full => json!({
            "id": item.id,
            "content": item.content,
            "context": item.context,
            "project": item.project,
            "tags": item.tags,
            "confidence": item.confidence,
            "created_at": item.created_at,
            "session_id": item.session_id,
            "score": score,
            "via": via,
            "recall_count": item.recall_count,
            "decay": decay,
            "branch": item.branch,
        }),
    }
}

fn get_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgument(format!("missing required field `{key}`")))
}

fn get_opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn get_i64(args: &Value, key: &str) -> Result<i64> {
    args.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidArgument(format!("missing required field `{key}`")))
}

fn get_opt_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

fn get_tags(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// The facade itself: engine handle plus the extraction queue.
pub struct ToolDispatcher {
    engine: Arc<MemoryEngine>,
    extraction_queue: Arc<dyn ExtractionQueue>,
    raw_log: RawLog,
}

impl ToolDispatcher {
    pub fn new(engine: Arc<MemoryEngine>, extraction_queue: Arc<dyn ExtractionQueue>, raw_log: RawLog) -> Self {
        Self { engine, extraction_queue, raw_log }
    }

    /// `memory_save`: sanitize, dedup-check, and insert (or refresh the
    /// existing duplicate instead of inserting).
    #[instrument(skip(self, args))]
    pub async fn memory_save(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let content = get_str(&args, "content")?;
        let ktype: KnowledgeType = get_str(&args, "type")?.parse()?;
        let project = get_opt_str(&args, "project").map(str::to_string).unwrap_or_else(default_project);
        let session_id = get_str(&args, "session_id")?;
        let (content, _) = sanitize(content);
        let (context, _) = sanitize(get_opt_str(&args, "context").unwrap_or(""));
        let skip_dedup = args.get("skip_dedup").and_then(Value::as_bool).unwrap_or(false);

        if !skip_dedup {
            if let DedupOutcome::Duplicate { existing } =
                dedup::check_duplicate(self.engine.storage.as_ref(), &content, ktype, &project).await?
            {
                let mut refreshed = existing.clone();
                refreshed.last_confirmed = chrono::Utc::now().to_rfc3339();
                refreshed.recall_count += 1;
                self.engine.storage.update_knowledge(&refreshed).await?;
                return Ok(json!({ "id": refreshed.id, "status": "duplicate" }));
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let item = KnowledgeItem {
            id: 0,
            session_id: session_id.to_string(),
            ktype,
            content,
            context,
            project,
            tags: get_tags(&args, "tags").into_iter().collect(),
            status: KnowledgeStatus::Active,
            superseded_by: None,
            confidence: args.get("confidence").and_then(Value::as_f64).unwrap_or(0.8),
            source: get_opt_str(&args, "source").unwrap_or("agent").to_string(),
            created_at: now.clone(),
            last_confirmed: now,
            recall_count: 0,
            last_recalled: None,
            branch: get_opt_str(&args, "branch").unwrap_or("").to_string(),
        };
        let id = self.engine.storage.insert_knowledge(&item).await?;
        if self.engine.embedder.dimensions() > 0 {
            let vec = self.engine.embedder.embed(&item.content).await?;
            self.engine.vector_index.upsert(id, &vec).await?;
        }
        self.raw_log
            .append(&item.session_id, &json!({ "tool": "memory_save", "id": id, "type": item.ktype.as_str() }))
            .await?;
        Ok(json!({ "id": id, "status": "created" }))
    }

    /// `memory_recall`: run the four-tier pipeline and shape results.
    #[instrument(skip(self, args))]
    pub async fn memory_recall(&self, args: Value) -> Result<Value> {
        let query = get_str(&args, "query")?;
        let filter = KnowledgeFilter {
            project: get_opt_str(&args, "project").map(str::to_string),
            ktype: get_opt_str(&args, "type").map(|s| s.parse::<KnowledgeType>()).transpose()?,
            status: Some(KnowledgeStatus::Active),
            tags: get_tags(&args, "tags"),
            branch: get_opt_str(&args, "branch").map(str::to_string),
        };
        let limit = get_opt_usize(&args, "limit", crate::constants::defaults::DEFAULT_RECALL_LIMIT);
        let detail: DetailLevel = get_opt_str(&args, "detail")
            .map(|s| serde_json::from_value(json!(s)))
            .transpose()
            .map_err(|_: serde_json::Error| Error::InvalidArgument("invalid detail level".into()))?
            .unwrap_or_default();

        let results = retrieval::search(
            self.engine.storage.as_ref(),
            self.engine.vector_index.as_ref(),
            self.engine.embedder.as_ref(),
            query,
            &filter,
            limit,
            self.engine.config.decay_half_life_days,
        )
        .await?;

        // Recall-count bookkeeping (spaced-repetition strengthening,
        // spec.md §4.C): every returned item's recall count bumps and both
        // `last_recalled` and `last_confirmed` reset to now, so a recalled
        // memory decays as if freshly confirmed.
        let now = chrono::Utc::now().to_rfc3339();
        for scored in &results {
            let mut item = scored.item.clone();
            item.recall_count += 1;
            item.last_recalled = Some(now.clone());
            item.last_confirmed = now.clone();
            self.engine.storage.update_knowledge(&item).await?;
        }

        let total = results.len();
        let mut total_tokens = 0usize;
        let mut grouped: std::collections::BTreeMap<String, Vec<Value>> = std::collections::BTreeMap::new();
        for r in &results {
            let mut entry = shape_item(&r.item, r.score, &r.via, r.decay, detail);
            let tokens = retrieval::estimate_tokens(&entry.to_string());
            total_tokens += tokens;
            if let Value::Object(map) = &mut entry {
                map.insert("_tokens".to_string(), json!(tokens));
            }
            grouped.entry(r.item.ktype.as_str().to_string()).or_default().push(entry);
        }

        Ok(json!({
            "query": query,
            "total": total,
            "detail": detail,
            "total_tokens": total_tokens,
            "results": grouped,
        }))
    }

    /// `memory_update`: find the target (by id, or by search if absent),
    /// insert its replacement with dedup skipped, and supersede the old row.
    #[instrument(skip(self, args))]
    pub async fn memory_update(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let target = if let Some(id) = args.get("id").and_then(Value::as_i64) {
            self.engine.storage.get_knowledge(id).await?.ok_or(Error::NotFound(id))?
        } else {
            let query = get_str(&args, "query")?;
            let filter = KnowledgeFilter {
                project: get_opt_str(&args, "project").map(str::to_string),
                ..Default::default()
            };
            let hits = retrieval::search(
                self.engine.storage.as_ref(),
                self.engine.vector_index.as_ref(),
                self.engine.embedder.as_ref(),
                query,
                &filter,
                1,
                self.engine.config.decay_half_life_days,
            )
            .await?;
            hits.into_iter().next().map(|r| r.item).ok_or_else(|| {
                Error::InvalidArgument("no matching knowledge item to update".into())
            })?
        };

        let new_content = get_str(&args, "content")?;
        let session_id = get_opt_str(&args, "session_id").unwrap_or(&target.session_id);
        let save_args = json!({
            "content": new_content,
            "context": get_opt_str(&args, "context").unwrap_or(&target.context),
            "type": target.ktype.as_str(),
            "project": target.project,
            "session_id": session_id,
            "tags": target.tags,
            "confidence": args.get("confidence").and_then(Value::as_f64).unwrap_or(target.confidence),
            "source": get_opt_str(&args, "source").unwrap_or(&target.source),
            "branch": target.branch,
            "skip_dedup": true,
        });
        let saved = self.memory_save(save_args).await?;
        let new_id = saved
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Storage("memory_save did not return an id".into()))?;

        let mut superseded = target.clone();
        superseded.status = KnowledgeStatus::Superseded;
        superseded.superseded_by = Some(new_id);
        self.engine.storage.update_knowledge(&superseded).await?;
        self.engine.vector_index.remove(target.id).await?;

        Ok(json!({ "id": new_id, "superseded_id": target.id }))
    }

    /// `memory_delete`: soft-delete a single item.
    #[instrument(skip(self, args))]
    pub async fn memory_delete(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let id = get_i64(&args, "id")?;
        let mut item = self.engine.storage.get_knowledge(id).await?.ok_or(Error::NotFound(id))?;
        item.status = KnowledgeStatus::Deleted;
        self.engine.storage.update_knowledge(&item).await?;
        self.engine.vector_index.remove(id).await?;
        Ok(json!({ "id": id, "status": "deleted" }))
    }

    /// `memory_forget`: bulk soft-delete every active item in a
    /// project (optionally narrowed by tag).
    #[instrument(skip(self, args))]
    pub async fn memory_forget(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let project = get_opt_str(&args, "project");
        let tags = get_tags(&args, "tags");
        let items = self.engine.storage.all_active(project).await?;
        let mut forgotten = 0u64;
        for mut item in items {
            if !tags.is_empty() && !tags.iter().any(|t| item.tags.contains(t)) {
                continue;
            }
            item.status = KnowledgeStatus::Deleted;
            self.engine.storage.update_knowledge(&item).await?;
            self.engine.vector_index.remove(item.id).await?;
            forgotten += 1;
        }
        Ok(json!({ "forgotten": forgotten }))
    }

    /// `memory_consolidate`: preview or apply a consolidation sweep.
    #[instrument(skip(self, args))]
    pub async fn memory_consolidate(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let project = get_opt_str(&args, "project").map(str::to_string).unwrap_or_else(default_project);
        let ktype: KnowledgeType = get_opt_str(&args, "type").unwrap_or("lesson").parse()?;
        let threshold = args
            .get("threshold")
            .and_then(Value::as_f64)
            .unwrap_or(crate::constants::defaults::CONSOLIDATE_DEFAULT_THRESHOLD);
        let dry_run = args.get("dry_run").and_then(Value::as_bool).unwrap_or(false);

        let items = self
            .engine
            .storage
            .list_active_by_type_project(ktype, &project)
            .await?;
        let plans = dedup::plan_consolidation(&items, threshold);
        let preview: Vec<Value> = plans
            .iter()
            .map(|p| {
                json!({
                    "kept_id": p.kept.id,
                    "superseded_ids": p.superseded.iter().map(|i| i.id).collect::<Vec<_>>(),
                })
            })
            .collect();
        let merged_count = if dry_run {
            0
        } else {
            dedup::apply_consolidation(self.engine.storage.as_ref(), self.engine.vector_index.as_ref(), &plans).await?
        };
        Ok(json!({ "plan": preview, "dry_run": dry_run, "merged": merged_count }))
    }

    /// `memory_export`: dump every non-deleted item for a project.
    #[instrument(skip(self, args))]
    pub async fn memory_export(&self, args: Value) -> Result<Value> {
        let project = get_opt_str(&args, "project");
        let items = self.engine.storage.all_active(project).await?;
        let shaped: Vec<Value> = items.iter().map(|i| shape_item(i, 0.0, &[], 0.0, DetailLevel::Full)).collect();
        Ok(json!({ "items": shaped }))
    }

    /// `memory_history`: walk the `superseded_by` version chain starting
    /// at `id`, guarding against cycles with a visited set.
    #[instrument(skip(self, args))]
    pub async fn memory_history(&self, args: Value) -> Result<Value> {
        let id = get_i64(&args, "id")?;
        let Some(anchor) = self.engine.storage.get_knowledge(id).await? else {
            return Ok(json!({ "chain": Vec::<Value>::new() }));
        };
        let mut visited = HashSet::new();
        visited.insert(id);

        // Walk forward (newer versions) via `superseded_by`, then reverse
        // so the newest version comes first.
        let mut newer = Vec::new();
        let mut current = anchor.superseded_by;
        while let Some(cur_id) = current {
            if !visited.insert(cur_id) {
                break;
            }
            let Some(item) = self.engine.storage.get_knowledge(cur_id).await? else {
                break;
            };
            current = item.superseded_by;
            newer.push(item);
        }
        newer.reverse();

        // Walk backward (older versions) via `superseded_by = id`.
        let mut older = Vec::new();
        let mut current = self.engine.storage.predecessor_of(id).await?;
        while let Some(item) = current {
            if !visited.insert(item.id) {
                break;
            }
            current = self.engine.storage.predecessor_of(item.id).await?;
            older.push(item);
        }

        let chain: Vec<Value> = newer
            .into_iter()
            .chain(std::iter::once(anchor))
            .chain(older)
            .map(|item| shape_item(&item, 0.0, &[], 0.0, DetailLevel::Full))
            .collect();
        Ok(json!({ "chain": chain }))
    }

    /// `memory_relate`: add a typed edge between two items.
    #[instrument(skip(self, args))]
    pub async fn memory_relate(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let from_id = get_i64(&args, "from_id")?;
        let to_id = get_i64(&args, "to_id")?;
        let rtype: RelationType = get_str(&args, "type")?.parse()?;
        let relation = Relation { from_id, to_id, rtype, created_at: chrono::Utc::now().to_rfc3339() };
        self.engine.storage.insert_relation(&relation).await?;
        Ok(json!({ "status": "related" }))
    }

    /// `memory_search_by_tag`: list active items carrying any of the
    /// given tags.
    #[instrument(skip(self, args))]
    pub async fn memory_search_by_tag(&self, args: Value) -> Result<Value> {
        let tags = get_tags(&args, "tags");
        if tags.is_empty() {
            return Err(Error::InvalidArgument("`tags` must be non-empty".into()));
        }
        let filter = KnowledgeFilter {
            project: get_opt_str(&args, "project").map(str::to_string),
            status: Some(KnowledgeStatus::Active),
            tags,
            ..Default::default()
        };
        let limit = get_opt_usize(&args, "limit", crate::constants::defaults::DEFAULT_RECALL_LIMIT);
        let items = self.engine.storage.list_knowledge(&filter, limit).await?;
        let shaped: Vec<Value> = items.iter().map(|i| shape_item(i, 0.0, &[], 0.0, DetailLevel::Summary)).collect();
        Ok(json!({ "results": shaped }))
    }

    /// `memory_observe`: record a lightweight, non-retrievable tool
    /// observation.
    #[instrument(skip(self, args))]
    pub async fn memory_observe(&self, args: Value) -> Result<Value> {
        let (summary, _) = sanitize(get_str(&args, "summary")?);
        let observation = crate::types::Observation {
            id: 0,
            session_id: get_str(&args, "session_id")?.to_string(),
            tool_name: get_str(&args, "tool_name")?.to_string(),
            observation_type: serde_json::from_value(json!(get_str(&args, "observation_type")?))
                .map_err(|_: serde_json::Error| Error::InvalidArgument("invalid observation_type".into()))?,
            summary,
            files_affected: get_tags(&args, "files_affected"),
            project: get_opt_str(&args, "project").map(str::to_string).unwrap_or_else(default_project),
            branch: get_opt_str(&args, "branch").unwrap_or("").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let id = self.engine.storage.insert_observation(&observation).await?;
        Ok(json!({ "id": id }))
    }

    /// `memory_timeline`: session-ordered query by `sessions_ago`, absolute
    /// `session_number`, `date_from`/`date_to` range, or `text_query`;
    /// falls back to the most recent `limit` sessions. Each returned
    /// session carries its global index, first 30 events, and active
    /// knowledge items.
    #[instrument(skip(self, args))]
    pub async fn memory_timeline(&self, args: Value) -> Result<Value> {
        let limit = get_opt_usize(&args, "limit", 50);
        let views = timeline::query_timeline(
            self.engine.storage.as_ref(),
            args.get("sessions_ago").and_then(Value::as_u64).map(|v| v as usize),
            args.get("session_number").and_then(Value::as_i64),
            get_opt_str(&args, "date_from"),
            get_opt_str(&args, "date_to"),
            get_opt_str(&args, "text_query"),
            get_opt_str(&args, "project"),
            limit,
        )
        .await?;
        let sessions: Vec<Value> = views
            .iter()
            .map(|v| {
                json!({
                    "session": v.session,
                    "session_number": v.session_number,
                    "events": v.events,
                    "knowledge": v.knowledge,
                })
            })
            .collect();
        Ok(json!({ "sessions": sessions }))
    }

    /// `memory_stats`: health-score snapshot with per-status/type counts,
    /// staleness/never-recalled counts, storage footprint, and
    /// self-improvement counters.
    #[instrument(skip(self, _args))]
    pub async fn memory_stats(&self, _args: Value) -> Result<Value> {
        let stats = timeline::compute_stats(self.engine.storage.as_ref(), &self.engine.config).await?;
        Ok(serde_json::to_value(StatsView::from(stats))?)
    }

    /// `self_error_log`: log an error against the ledger, then run pattern
    /// detection and surface an upvote/add suggestion if a pattern formed.
    #[instrument(skip(self, args))]
    pub async fn self_error_log(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let category: ErrorCategory = get_str(&args, "category")?.parse()?;
        let project = get_opt_str(&args, "project").map(str::to_string).unwrap_or_else(default_project);
        let id = improvement::log_error(
            self.engine.storage.as_ref(),
            get_str(&args, "session_id")?,
            category,
            get_opt_str(&args, "severity").unwrap_or("medium"),
            get_str(&args, "description")?,
            get_opt_str(&args, "context").unwrap_or(""),
            get_opt_str(&args, "fix").unwrap_or(""),
            Some(&project),
            get_tags(&args, "tags"),
        )
        .await?;
        let suggestion = improvement::suggest_after_error(self.engine.storage.as_ref(), category, &project).await?;
        Ok(match suggestion {
            Some(s) => json!({
                "id": id,
                "pattern_detected": true,
                "count": s.count,
                "suggested_action": s.action,
                "insight_id": s.insight_id,
                "source_error_ids": s.source_error_ids,
                "descriptions": s.descriptions,
            }),
            None => json!({ "id": id, "pattern_detected": false }),
        })
    }

    /// `self_insight`: `action` is `add`, `upvote`, `downvote`, `edit`,
    /// `list`, `promote` or the legacy `resolve` (links an insight back to
    /// the error it was extracted from).
    #[instrument(skip(self, args))]
    pub async fn self_insight(&self, args: Value) -> Result<Value> {
        match get_opt_str(&args, "action").unwrap_or("add") {
            "add" | "record" => {
                let _guard = self.engine.writer().await;
                let project = get_opt_str(&args, "project").map(str::to_string).unwrap_or_else(default_project);
                let content = get_str(&args, "content")?;
                let category: ErrorCategory = get_str(&args, "category")?.parse()?;
                if let Some(upvoted) = improvement::upvote_insight(self.engine.storage.as_ref(), content, category, &project).await? {
                    return Ok(json!({ "id": upvoted, "status": "upvoted" }));
                }
                let id = improvement::record_insight(
                    self.engine.storage.as_ref(),
                    get_str(&args, "session_id")?,
                    content,
                    get_opt_str(&args, "context").unwrap_or(""),
                    category,
                    args.get("importance").and_then(Value::as_i64).unwrap_or(2) as i32,
                    args.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
                    args.get("source_error_ids")
                        .and_then(Value::as_array)
                        .map(|a| a.iter().filter_map(Value::as_i64).collect())
                        .unwrap_or_default(),
                    Some(&project),
                    get_tags(&args, "tags"),
                )
                .await?;
                Ok(json!({ "id": id, "status": "created" }))
            }
            "upvote" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                improvement::upvote_insight_by_id(self.engine.storage.as_ref(), id).await?;
                Ok(json!({ "id": id, "status": "upvoted" }))
            }
            "downvote" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                let insight = improvement::downvote_insight(self.engine.storage.as_ref(), id).await?;
                Ok(json!({ "id": id, "status": insight.status, "importance": insight.importance }))
            }
            "edit" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                improvement::edit_insight(self.engine.storage.as_ref(), id, get_str(&args, "content")?).await?;
                Ok(json!({ "id": id, "status": "edited" }))
            }
            "list" => {
                let insights = improvement::list_insights(
                    self.engine.storage.as_ref(),
                    get_opt_str(&args, "project"),
                    get_opt_str(&args, "category").map(|s| s.parse::<ErrorCategory>()).transpose()?,
                )
                .await?;
                Ok(json!({ "insights": insights }))
            }
            "promote" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                let scope: RuleScope = get_opt_str(&args, "scope").unwrap_or("global").parse()?;
                let priority = args.get("priority").and_then(Value::as_i64).unwrap_or(5) as i32;
                let rule_id = improvement::promote_insight(self.engine.storage.as_ref(), id, scope, priority).await?;
                Ok(json!({ "id": rule_id, "status": "promoted" }))
            }
            "resolve" => {
                let _guard = self.engine.writer().await;
                let error_id = get_i64(&args, "error_id")?;
                let insight_id = args.get("insight_id").and_then(Value::as_i64);
                improvement::resolve_error(self.engine.storage.as_ref(), error_id, insight_id).await?;
                Ok(json!({ "error_id": error_id, "status": "resolved" }))
            }
            other => Err(Error::InvalidArgument(format!("unknown self_insight action: {other}"))),
        }
    }

    /// `self_rules`: `action` is `list`, `fire`, `rate`, `suspend`,
    /// `activate`, `retire`, `add_manual` or `promote`.
    #[instrument(skip(self, args))]
    pub async fn self_rules(&self, args: Value) -> Result<Value> {
        match get_opt_str(&args, "action").unwrap_or("list") {
            "promote" => {
                let _guard = self.engine.writer().await;
                let insight_id = get_i64(&args, "insight_id")?;
                let scope: RuleScope = get_opt_str(&args, "scope").unwrap_or("global").parse()?;
                let priority = args.get("priority").and_then(Value::as_i64).unwrap_or(5) as i32;
                let id = improvement::promote_insight(self.engine.storage.as_ref(), insight_id, scope, priority).await?;
                Ok(json!({ "id": id, "status": "promoted" }))
            }
            "fire" => {
                let _guard = self.engine.writer().await;
                let rule_id = get_i64(&args, "id")?;
                improvement::fire_rule(self.engine.storage.as_ref(), rule_id).await?;
                Ok(json!({ "id": rule_id, "status": "fired" }))
            }
            "rate" | "record_fire" => {
                let _guard = self.engine.writer().await;
                let rule_id = get_i64(&args, "id").or_else(|_| get_i64(&args, "rule_id"))?;
                let success = args.get("success").and_then(Value::as_bool).unwrap_or(false);
                improvement::record_rule_fire(self.engine.storage.as_ref(), rule_id, success).await?;
                Ok(json!({ "id": rule_id, "status": "recorded" }))
            }
            "suspend" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                improvement::suspend_rule(self.engine.storage.as_ref(), id).await?;
                Ok(json!({ "id": id, "status": "suspended" }))
            }
            "activate" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                improvement::activate_rule(self.engine.storage.as_ref(), id).await?;
                Ok(json!({ "id": id, "status": "active" }))
            }
            "retire" => {
                let _guard = self.engine.writer().await;
                let id = get_i64(&args, "id")?;
                improvement::retire_rule(self.engine.storage.as_ref(), id).await?;
                Ok(json!({ "id": id, "status": "retired" }))
            }
            "add_manual" => {
                let _guard = self.engine.writer().await;
                let category: ErrorCategory = get_str(&args, "category")?.parse()?;
                let scope: RuleScope = get_opt_str(&args, "scope").unwrap_or("global").parse()?;
                let priority = args.get("priority").and_then(Value::as_i64).unwrap_or(5) as i32;
                let id = improvement::add_manual_rule(
                    self.engine.storage.as_ref(),
                    get_opt_str(&args, "session_id").unwrap_or("manual"),
                    get_str(&args, "content")?,
                    get_opt_str(&args, "context").unwrap_or(""),
                    category,
                    scope,
                    priority,
                    get_opt_str(&args, "project"),
                    get_tags(&args, "tags"),
                )
                .await?;
                Ok(json!({ "id": id, "status": "created" }))
            }
            "list" => {
                let scope: Option<RuleScope> = get_opt_str(&args, "scope").map(|s| s.parse()).transpose()?;
                let rules = improvement::list_rules(self.engine.storage.as_ref(), get_opt_str(&args, "project"), scope.as_ref()).await?;
                Ok(json!({ "rules": rules }))
            }
            other => Err(Error::InvalidArgument(format!("unknown self_rules action: {other}"))),
        }
    }

    /// `self_patterns`: the ledger's read-only analysis views. `view`
    /// selects one of `detect` (single category/project), `error_patterns`,
    /// `insight_candidates`, `rule_effectiveness`, `improvement_trend` or
    /// `full_report` (default).
    #[instrument(skip(self, args))]
    pub async fn self_patterns(&self, args: Value) -> Result<Value> {
        let project = get_opt_str(&args, "project").unwrap_or("general");
        match get_opt_str(&args, "view").unwrap_or("full_report") {
            "detect" => {
                let category: ErrorCategory = get_str(&args, "category")?.parse()?;
                let pattern = improvement::detect_patterns(self.engine.storage.as_ref(), category, project).await?;
                Ok(match pattern {
                    Some(p) => json!({ "found": true, "category": p.category.as_str(), "project": p.project, "count": p.errors.len() }),
                    None => json!({ "found": false }),
                })
            }
            "error_patterns" => {
                let days = args.get("days").and_then(Value::as_i64).unwrap_or(crate::constants::defaults::PATTERN_LOOKBACK_DAYS);
                improvement::error_patterns(self.engine.storage.as_ref(), project, days).await
            }
            "insight_candidates" => {
                let candidates = improvement::insight_candidates(self.engine.storage.as_ref(), project).await?;
                Ok(json!({ "candidates": candidates }))
            }
            "rule_effectiveness" => {
                let rules = improvement::rule_effectiveness(self.engine.storage.as_ref(), project).await?;
                Ok(json!({ "rules": rules }))
            }
            "improvement_trend" => improvement::improvement_trend(self.engine.storage.as_ref(), project).await,
            "full_report" => {
                let days = args.get("days").and_then(Value::as_i64).unwrap_or(crate::constants::defaults::PATTERN_LOOKBACK_DAYS);
                improvement::full_report(self.engine.storage.as_ref(), project, days).await
            }
            other => Err(Error::InvalidArgument(format!("unknown self_patterns view: {other}"))),
        }
    }

    /// `self_reflect`: read-only sweep across every error category for a
    /// project, surfacing patterns worth turning into insights without
    /// mutating anything itself.
    #[instrument(skip(self, args))]
    pub async fn self_reflect(&self, args: Value) -> Result<Value> {
        let project = get_opt_str(&args, "project").unwrap_or("general");
        let categories = [
            ErrorCategory::CodeError,
            ErrorCategory::LogicError,
            ErrorCategory::ConfigError,
            ErrorCategory::ApiError,
            ErrorCategory::Timeout,
            ErrorCategory::LoopDetected,
            ErrorCategory::WrongAssumption,
            ErrorCategory::MissingContext,
        ];
        let mut found = Vec::new();
        for category in categories {
            if let Some(p) = improvement::detect_patterns(self.engine.storage.as_ref(), category, project).await? {
                found.push(json!({ "category": p.category.as_str(), "count": p.errors.len() }));
            }
        }
        Ok(json!({ "patterns": found }))
    }

    /// `self_rules_context`: `get_rules_for_context(project, categories)`.
    /// Active rules in scope for `project` and any of `categories`, top 20
    /// by priority then success_rate. Side effect: every returned rule's
    /// `fire_count` is incremented and `last_fired` refreshed.
    #[instrument(skip(self, args))]
    pub async fn self_rules_context(&self, args: Value) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let project = get_opt_str(&args, "project").unwrap_or("general");
        let categories: Vec<ErrorCategory> = args
            .get("categories")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).filter_map(|s| s.parse().ok()).collect())
            .or_else(|| get_opt_str(&args, "category").and_then(|s| s.parse().ok()).map(|c| vec![c]))
            .unwrap_or_default();
        let rules = improvement::get_rules_for_context(self.engine.storage.as_ref(), project, &categories).await?;
        Ok(json!({ "rules": rules.iter().map(|r| json!({
            "id": r.id,
            "content": r.content,
            "scope": r.scope.to_string(),
            "priority": r.priority,
            "fire_count": r.fire_count,
            "success_rate": r.success_rate(),
        })).collect::<Vec<_>>() }))
    }

    /// `memory_extract_session` (list): every pending queue entry.
    pub async fn memory_extract_session_list(&self) -> Result<Value> {
        let pending = self.extraction_queue.list_pending().await?;
        Ok(serde_json::to_value(pending)?)
    }

    /// `memory_extract_session` (get): read `session_id`'s queued content,
    /// paginated in `EXTRACTION_CHUNK_SIZE_BYTES` (~100 KiB) windows
    /// (spec.md §6, SPEC_FULL.md §4.K). Content that fits in one window is
    /// returned whole with `_total_chunks=1`; larger content is windowed
    /// and the caller pages through it with successive `chunk` values.
    pub async fn memory_extract_session_get(&self, session_id: &str, chunk: usize) -> Result<Value> {
        let entries = self.extraction_queue.list_pending().await?;
        let entry = entries
            .into_iter()
            .find(|e| e.session_id == session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let content = entry.chunks.concat();
        if content.len() <= crate::constants::defaults::EXTRACTION_CHUNK_SIZE_BYTES {
            return Ok(json!({
                "session_id": entry.session_id,
                "project": entry.project,
                "created_at": entry.created_at,
                "content": content,
                "_total_chunks": 1,
                "_chunk": 0,
            }));
        }
        let pages = crate::extraction::chunk_content(&content, crate::constants::defaults::EXTRACTION_CHUNK_SIZE_BYTES);
        let total_chunks = pages.len();
        let idx = chunk.min(total_chunks.saturating_sub(1));
        Ok(json!({
            "session_id": entry.session_id,
            "_total_chunks": total_chunks,
            "_chunk": idx,
            "partial_content": pages[idx],
        }))
    }

    /// `memory_extract_session` (enqueue): hand a session's raw content to
    /// the queue for the (external) background scanner to pick up. Not one
    /// of spec.md's three named actions (`list`/`get`/`complete`) — this is
    /// the writer side of the queue, used by whatever captures a session's
    /// transcript on exit, ahead of a front-end ever calling `list`/`get`.
    pub async fn memory_extract_session_enqueue(&self, session_id: &str, project: &str, content: &str) -> Result<Value> {
        self.extraction_queue.enqueue(session_id, project, content).await?;
        Ok(json!({ "session_id": session_id, "status": "queued" }))
    }

    /// `memory_extract_session` (complete): mark a session's queue entry done.
    pub async fn memory_extract_session_complete(&self, session_id: &str) -> Result<Value> {
        self.extraction_queue.mark_done(session_id).await?;
        Ok(json!({ "session_id": session_id, "status": "done" }))
    }

    /// Run the retention sweep (archive/purge aging knowledge) and the
    /// observation TTL cleanup. Not a named tool: invoked on a schedule by
    /// the host process.
    pub async fn run_maintenance(&self, dry_run: bool) -> Result<Value> {
        let _guard = self.engine.writer().await;
        let now = chrono::Utc::now();
        let plan = lifecycle::run_retention_sweep(
            self.engine.storage.as_ref(),
            now,
            self.engine.config.archive_after_days,
            self.engine.config.purge_after_days,
            dry_run,
        )
        .await?;
        let observations_purged = if dry_run {
            0
        } else {
            lifecycle::purge_stale_observations(self.engine.storage.as_ref(), now, self.engine.config.observation_retention_days).await?
        };
        Ok(json!({
            "archived": plan.to_archive.len(),
            "purged": plan.to_purge.len(),
            "observations_purged": observations_purged,
            "dry_run": dry_run,
        }))
    }
}

#[derive(Serialize)]
struct StatsView {
    active: i64,
    archived: i64,
    purged: i64,
    consolidated: i64,
    superseded: i64,
    total_sessions: i64,
    open_errors: i64,
    active_rules: i64,
    stale_count: i64,
    never_recalled_count: i64,
    storage_footprint: Vec<(String, u64)>,
    health_score: f64,
}

impl From<timeline::StatsSummary> for StatsView {
    fn from(s: timeline::StatsSummary) -> Self {
        Self {
            active: s.active_count,
            archived: s.archived_count,
            purged: s.purged_count,
            consolidated: s.consolidated_count,
            superseded: s.superseded_count,
            total_sessions: s.total_sessions,
            open_errors: s.open_error_count,
            active_rules: s.active_rule_count,
            stale_count: s.stale_count,
            never_recalled_count: s.never_recalled_count,
            storage_footprint: s.storage_footprint,
            health_score: s.health_score,
        }
    }
}
