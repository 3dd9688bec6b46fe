//! # Storage Abstraction
//!
//! Unified trait for the durable backing store (spec.md component C).
//!
//! Keeping the engine (component G/H/J/K) generic over `dyn StorageBackend`
//! means the concrete SQLite/libSQL implementation can be swapped for a
//! different backend, or a fake, without touching retrieval, lifecycle or
//! ledger logic.

use async_trait::async_trait;

use crate::types::{
    ErrorCategory, ErrorRecord, ErrorStatus, Insight, InsightStatus, KnowledgeItem,
    KnowledgeStatus, KnowledgeType, Relation, RelationType, Rule, RuleStatus, Session,
    SessionStatus, TimelineEvent,
};
use crate::Result;

/// A single lexical search hit returned by [`StorageBackend::fts_search`].
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub item: KnowledgeItem,
    /// Raw BM25-style rank from the FTS engine. More negative is better,
    /// matching SQLite FTS5's `rank` convention.
    pub raw_rank: f64,
}

/// Filters shared by most knowledge queries.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFilter {
    pub project: Option<String>,
    pub ktype: Option<KnowledgeType>,
    pub status: Option<KnowledgeStatus>,
    pub tags: Vec<String>,
    /// Restrict to a single branch. An empty-branch item always matches
    /// (spec.md §4.H: "branch filter also admits items with empty branch").
    pub branch: Option<String>,
}

/// Unified storage backend trait implemented by the concrete SQLite crate.
///
/// All operations are async so a backend may use network or blocking I/O
/// internally (e.g. `spawn_blocking` around a synchronous driver) without
/// forcing that choice on callers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Run any startup migrations and integrity repair. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be opened or repaired.
    async fn init(&self) -> Result<()>;

    // ---- sessions ----------------------------------------------------

    /// Open (insert) a new session.
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Fetch a session by id.
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Update session status, `ended_at` and/or `summary`.
    async fn update_session(
        &self,
        id: &str,
        status: SessionStatus,
        ended_at: Option<&str>,
        summary: Option<&str>,
    ) -> Result<()>;

    /// List sessions, most recent first.
    async fn list_sessions(&self, project: Option<&str>, limit: usize) -> Result<Vec<Session>>;

    /// Every session ever created, oldest first. Used by the timeline's
    /// `sessions_ago`/`session_number` indexing, which is defined relative
    /// to the full, unpaginated session history (spec.md §4.I).
    async fn all_sessions_chronological(&self) -> Result<Vec<Session>>;

    // ---- knowledge items ----------------------------------------------

    /// Insert a new knowledge item and return its assigned id.
    async fn insert_knowledge(&self, item: &KnowledgeItem) -> Result<i64>;

    /// Fetch a single knowledge item by id, regardless of status.
    async fn get_knowledge(&self, id: i64) -> Result<Option<KnowledgeItem>>;

    /// Update mutable fields of a knowledge item (status transitions,
    /// `superseded_by`, `recall_count`/`last_recalled`, `last_confirmed`).
    async fn update_knowledge(&self, item: &KnowledgeItem) -> Result<()>;

    /// List active knowledge items matching a filter, most recently
    /// confirmed first. Used by dedup candidate probing and listing tools.
    async fn list_knowledge(&self, filter: &KnowledgeFilter, limit: usize) -> Result<Vec<KnowledgeItem>>;

    /// Active knowledge items owned by one session, for timeline display.
    async fn knowledge_for_session(&self, session_id: &str) -> Result<Vec<KnowledgeItem>>;

    /// All active items for a (type, project) pair, used by the
    /// consolidation sweep. No limit: consolidation must see every
    /// candidate in scope.
    async fn list_active_by_type_project(
        &self,
        ktype: KnowledgeType,
        project: &str,
    ) -> Result<Vec<KnowledgeItem>>;

    /// Full-text search over active knowledge content/context, ranked by
    /// the backend's native lexical scoring (component C's FTS5 index).
    async fn fts_search(
        &self,
        query: &str,
        filter: &KnowledgeFilter,
        limit: usize,
    ) -> Result<Vec<FtsHit>>;

    /// All active items, for the fuzzy-match retrieval tier and for
    /// consolidation/lifecycle sweeps that must scan the full active set.
    async fn all_active(&self, project: Option<&str>) -> Result<Vec<KnowledgeItem>>;

    /// Items whose `last_confirmed` is at or before `cutoff`, for the
    /// retention sweep. `from_status` scopes the scan to one lifecycle
    /// status.
    async fn stale_since(&self, from_status: KnowledgeStatus, cutoff: &str) -> Result<Vec<KnowledgeItem>>;

    /// The item that was superseded by `id`, i.e. the row with
    /// `superseded_by = id`, if any. Used to walk a version chain backward
    /// from a given id toward its older predecessors (spec.md's dashboard
    /// `/api/knowledge/<id>` note: "predecessors found via `superseded_by =
    /// id`"). A chain is expected to have at most one predecessor per id.
    async fn predecessor_of(&self, id: i64) -> Result<Option<KnowledgeItem>>;

    // ---- relations ------------------------------------------------------

    async fn insert_relation(&self, relation: &Relation) -> Result<()>;

    /// Outgoing relations from `id`, optionally filtered by type.
    async fn relations_from(&self, id: i64, rtype: Option<RelationType>) -> Result<Vec<Relation>>;

    // ---- timeline ---------------------------------------------------

    async fn insert_timeline_event(&self, event: &TimelineEvent) -> Result<i64>;

    async fn list_timeline(
        &self,
        session_id: Option<&str>,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TimelineEvent>>;

    // ---- observations -------------------------------------------------

    async fn insert_observation(&self, observation: &crate::types::Observation) -> Result<i64>;

    /// Delete observations older than `cutoff`. Returns the number removed.
    async fn purge_observations_before(&self, cutoff: &str) -> Result<u64>;

    // ---- self-improvement ledger: errors --------------------------------

    async fn insert_error(&self, error: &ErrorRecord) -> Result<i64>;

    async fn get_error(&self, id: i64) -> Result<Option<ErrorRecord>>;

    async fn update_error(&self, error: &ErrorRecord) -> Result<()>;

    /// Errors in `category` within `project` created since `since`, for
    /// pattern detection. `status` optionally narrows to a single status.
    async fn errors_since(
        &self,
        category: ErrorCategory,
        project: &str,
        since: &str,
        status: Option<ErrorStatus>,
    ) -> Result<Vec<ErrorRecord>>;

    async fn list_errors(
        &self,
        project: Option<&str>,
        status: Option<ErrorStatus>,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>>;

    // ---- self-improvement ledger: insights -------------------------------

    async fn insert_insight(&self, insight: &Insight) -> Result<i64>;

    async fn get_insight(&self, id: i64) -> Result<Option<Insight>>;

    async fn update_insight(&self, insight: &Insight) -> Result<()>;

    async fn list_insights(
        &self,
        project: Option<&str>,
        status: Option<InsightStatus>,
        limit: usize,
    ) -> Result<Vec<Insight>>;

    // ---- self-improvement ledger: rules -----------------------------------

    async fn insert_rule(&self, rule: &Rule) -> Result<i64>;

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>>;

    async fn update_rule(&self, rule: &Rule) -> Result<()>;

    /// Rules applicable to a context: global scope plus the matching
    /// project/category scopes, active only, highest priority first.
    async fn applicable_rules(
        &self,
        project: &str,
        category: Option<ErrorCategory>,
        status: Option<RuleStatus>,
    ) -> Result<Vec<Rule>>;

    async fn list_rules(&self, status: Option<RuleStatus>, limit: usize) -> Result<Vec<Rule>>;

    // ---- stats --------------------------------------------------------

    /// Raw counts backing the stats/health-score tool: (active, archived,
    /// purged, consolidated, superseded) knowledge counts.
    async fn knowledge_counts_by_status(&self) -> Result<Vec<(KnowledgeStatus, i64)>>;

    async fn open_error_count(&self) -> Result<i64>;

    async fn active_rule_count(&self) -> Result<i64>;
}
