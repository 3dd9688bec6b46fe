//! Global constants for memory-core.
//!
//! Centralizes the magic numbers named by the specification so they are
//! defined exactly once and can be overridden by configuration.

/// Default configuration values.
pub mod defaults {
    /// Half-life (days) for the decay scoring used by retrieval ranking.
    pub const DECAY_HALF_LIFE_DAYS: i64 = 90;
    /// Active items idle this many days (with no recalls and confidence
    /// below 0.8) move to `archived`.
    pub const ARCHIVE_AFTER_DAYS: i64 = 180;
    /// Archived items idle this many days move to `purged`.
    pub const PURGE_AFTER_DAYS: i64 = 365;
    /// Observations older than this are deleted on startup.
    pub const OBSERVATION_RETENTION_DAYS: i64 = 30;
    /// Default read-only dashboard port (unused by this workspace; carried
    /// through configuration for the external dashboard collaborator).
    pub const DASHBOARD_PORT: u16 = 37737;

    /// Default retrieval page size.
    pub const DEFAULT_RECALL_LIMIT: usize = 10;

    /// Dedup: number of leading content tokens considered.
    pub const DEDUP_TOKEN_WINDOW: usize = 12;
    /// Dedup: minimum token length to be considered meaningful.
    pub const DEDUP_MIN_TOKEN_LEN: usize = 2;
    /// Dedup: number of lexical candidates probed.
    pub const DEDUP_CANDIDATE_LIMIT: usize = 5;
    /// Dedup threshold: jaccard strictly greater than this merges.
    pub const DEDUP_JACCARD_THRESHOLD: f64 = 0.85;
    /// Dedup threshold: sequence ratio strictly greater than this merges.
    pub const DEDUP_RATIO_THRESHOLD: f64 = 0.90;

    /// Default consolidation jaccard threshold.
    pub const CONSOLIDATE_DEFAULT_THRESHOLD: f64 = 0.75;

    /// Insight auto-upvote fuzzy-match threshold.
    pub const INSIGHT_SIMILAR_RATIO_THRESHOLD: f64 = 0.70;
    /// Insight promotion eligibility: minimum importance.
    pub const PROMOTION_MIN_IMPORTANCE: i32 = 5;
    /// Insight promotion eligibility: minimum confidence.
    pub const PROMOTION_MIN_CONFIDENCE: f64 = 0.8;
    /// Upvote confidence increment, capped at 1.0.
    pub const INSIGHT_UPVOTE_CONFIDENCE_STEP: f64 = 0.05;

    /// Rule auto-suspend: minimum fire count before evaluating success rate.
    pub const RULE_SUSPEND_MIN_FIRES: i64 = 10;
    /// Rule auto-suspend: success rate strictly below this suspends.
    pub const RULE_SUSPEND_MAX_SUCCESS_RATE: f64 = 0.2;

    /// Error pattern detection: minimum repeated errors in the lookback window.
    pub const PATTERN_MIN_OCCURRENCES: i64 = 3;
    /// Error pattern detection: lookback window in days.
    pub const PATTERN_LOOKBACK_DAYS: i64 = 30;

    /// Staleness threshold for stats/health scoring (days).
    pub const STALE_THRESHOLD_DAYS: i64 = 90;

    /// Extraction queue file size cap in bytes (~200 KiB).
    pub const EXTRACTION_QUEUE_SIZE_CAP_BYTES: usize = 200 * 1024;
    /// Extraction queue chunk-paging size in bytes (~100 KiB).
    pub const EXTRACTION_CHUNK_SIZE_BYTES: usize = 100 * 1024;

    /// `self_insight(action:"list")`: top-N cap.
    pub const INSIGHT_LIST_LIMIT: usize = 50;
    /// `self_rules(action:"list")`: top-N cap.
    pub const RULE_LIST_LIMIT: usize = 30;
    /// `get_rules_for_context`: top-N cap.
    pub const CONTEXT_RULE_LIMIT: usize = 20;
    /// A rule is flagged stale in `rule_effectiveness` once it hasn't fired
    /// in this many days.
    pub const RULE_STALE_DAYS: i64 = 60;
    /// Number of weekly buckets in `improvement_trend`.
    pub const TREND_WEEKS: i64 = 4;
    /// Max source-error ids/descriptions carried by a pattern suggestion.
    pub const PATTERN_SUGGESTION_SAMPLE: usize = 10;
}

/// Log message prefixes, matching the teacher's bracketed-tag convention.
pub mod logging {
    pub const LOG_PREFIX_STORE: &str = "[store]";
    pub const LOG_PREFIX_DEDUP: &str = "[dedup]";
    pub const LOG_PREFIX_RETRIEVAL: &str = "[retrieval]";
    pub const LOG_PREFIX_LIFECYCLE: &str = "[lifecycle]";
    pub const LOG_PREFIX_LEDGER: &str = "[ledger]";
}

/// Storage layout directory names under `$CLAUDE_MEMORY_DIR`.
pub mod paths {
    pub const DB_FILE_NAME: &str = "memory.db";
    pub const RAW_DIR: &str = "raw";
    pub const TRANSCRIPTS_DIR: &str = "transcripts";
    pub const VECTOR_DIR: &str = "vector";
    pub const QUEUE_DIR: &str = "queue";
    pub const BACKUPS_DIR: &str = "backups";
    pub const EXTRACTION_QUEUE_DIR: &str = "extraction_queue";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_thresholds_are_sane() {
        assert!(defaults::DEDUP_JACCARD_THRESHOLD > 0.0 && defaults::DEDUP_JACCARD_THRESHOLD < 1.0);
        assert!(defaults::DEDUP_RATIO_THRESHOLD > 0.0 && defaults::DEDUP_RATIO_THRESHOLD < 1.0);
    }

    #[test]
    fn promotion_thresholds_are_sane() {
        assert!(defaults::PROMOTION_MIN_IMPORTANCE > 0);
        assert!(defaults::PROMOTION_MIN_CONFIDENCE > 0.0 && defaults::PROMOTION_MIN_CONFIDENCE <= 1.0);
    }
}
