//! The data model (spec.md §3): sessions, knowledge items, relations,
//! timeline events, observations, and the self-improvement ledger's
//! errors/insights/rules.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An identified run of an upstream agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    #[serde(default = "default_project")]
    pub project: String,
    pub status: SessionStatus,
    pub summary: Option<String>,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub log_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

pub(crate) fn default_project() -> String {
    "general".to_string()
}

/// The type tag of a knowledge item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeType {
    Decision,
    Fact,
    Solution,
    Lesson,
    Convention,
    Reflection,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Decision => "decision",
            KnowledgeType::Fact => "fact",
            KnowledgeType::Solution => "solution",
            KnowledgeType::Lesson => "lesson",
            KnowledgeType::Convention => "convention",
            KnowledgeType::Reflection => "reflection",
        }
    }
}

impl fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for KnowledgeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(KnowledgeType::Decision),
            "fact" => Ok(KnowledgeType::Fact),
            "solution" => Ok(KnowledgeType::Solution),
            "lesson" => Ok(KnowledgeType::Lesson),
            "convention" => Ok(KnowledgeType::Convention),
            "reflection" => Ok(KnowledgeType::Reflection),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown knowledge type: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a knowledge item. Exactly one value applies at any
/// instant (I1); `Active` is the only status findable by retrieval (I2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeStatus {
    Active,
    Superseded,
    Consolidated,
    Archived,
    Purged,
    Deleted,
}

impl KnowledgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeStatus::Active => "active",
            KnowledgeStatus::Superseded => "superseded",
            KnowledgeStatus::Consolidated => "consolidated",
            KnowledgeStatus::Archived => "archived",
            KnowledgeStatus::Purged => "purged",
            KnowledgeStatus::Deleted => "deleted",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, KnowledgeStatus::Active)
    }
}

impl fmt::Display for KnowledgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for KnowledgeStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KnowledgeStatus::Active),
            "superseded" => Ok(KnowledgeStatus::Superseded),
            "consolidated" => Ok(KnowledgeStatus::Consolidated),
            "archived" => Ok(KnowledgeStatus::Archived),
            "purged" => Ok(KnowledgeStatus::Purged),
            "deleted" => Ok(KnowledgeStatus::Deleted),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown knowledge status: {other}"
            ))),
        }
    }
}

/// The primary entity: a stored unit of agent-produced text with lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeItem {
    pub id: i64,
    pub session_id: String,
    #[serde(rename = "type")]
    pub ktype: KnowledgeType,
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub status: KnowledgeStatus,
    pub superseded_by: Option<i64>,
    pub confidence: f64,
    pub source: String,
    pub created_at: String,
    pub last_confirmed: String,
    pub recall_count: i64,
    pub last_recalled: Option<String>,
    #[serde(default)]
    pub branch: String,
}

/// A typed directed edge between two knowledge items.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Causal,
    Solution,
    Context,
    Related,
    Contradicts,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causal => "causal",
            RelationType::Solution => "solution",
            RelationType::Context => "context",
            RelationType::Related => "related",
            RelationType::Contradicts => "contradicts",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "causal" => Ok(RelationType::Causal),
            "solution" => Ok(RelationType::Solution),
            "context" => Ok(RelationType::Context),
            "related" => Ok(RelationType::Related),
            "contradicts" => Ok(RelationType::Contradicts),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown relation type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub from_id: i64,
    pub to_id: i64,
    #[serde(rename = "type")]
    pub rtype: RelationType,
    pub created_at: String,
}

/// Append-only audit entry within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub id: i64,
    pub session_id: String,
    pub ts: String,
    pub event: String,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Lightweight auto-captured tool observation. Never participates in
/// retrieval; purged on a TTL sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: i64,
    pub session_id: String,
    pub tool_name: String,
    pub observation_type: ObservationType,
    pub summary: String,
    #[serde(default)]
    pub files_affected: Vec<String>,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub branch: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    Bugfix,
    Feature,
    Refactor,
    Change,
    Discovery,
    Decision,
}

/// A structured error logged by the self-improvement ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CodeError,
    LogicError,
    ConfigError,
    ApiError,
    Timeout,
    LoopDetected,
    WrongAssumption,
    MissingContext,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::CodeError => "code_error",
            ErrorCategory::LogicError => "logic_error",
            ErrorCategory::ConfigError => "config_error",
            ErrorCategory::ApiError => "api_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::LoopDetected => "loop_detected",
            ErrorCategory::WrongAssumption => "wrong_assumption",
            ErrorCategory::MissingContext => "missing_context",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code_error" => Ok(ErrorCategory::CodeError),
            "logic_error" => Ok(ErrorCategory::LogicError),
            "config_error" => Ok(ErrorCategory::ConfigError),
            "api_error" => Ok(ErrorCategory::ApiError),
            "timeout" => Ok(ErrorCategory::Timeout),
            "loop_detected" => Ok(ErrorCategory::LoopDetected),
            "wrong_assumption" => Ok(ErrorCategory::WrongAssumption),
            "missing_context" => Ok(ErrorCategory::MissingContext),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown error category: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    Open,
    Resolved,
    InsightExtracted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub id: i64,
    pub session_id: String,
    pub category: ErrorCategory,
    pub severity: String,
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub fix: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ErrorStatus,
    pub resolved_at: Option<String>,
    pub insight_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InsightStatus {
    Active,
    Archived,
    Promoted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub id: i64,
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub context: String,
    pub category: ErrorCategory,
    pub importance: i32,
    pub confidence: f64,
    #[serde(default)]
    pub source_error_ids: Vec<i64>,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: InsightStatus,
    pub promoted_to_rule_id: Option<i64>,
    #[serde(default)]
    pub fire_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Insight {
    /// importance >= 5 AND confidence >= 0.8 (spec.md §4.J).
    pub fn promotion_eligible(&self) -> bool {
        self.importance >= crate::constants::defaults::PROMOTION_MIN_IMPORTANCE
            && self.confidence >= crate::constants::defaults::PROMOTION_MIN_CONFIDENCE
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Active,
    Suspended,
    Retired,
}

/// `global`, `project:<name>` or `category:<name>` — determines which
/// contexts retrieve a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleScope {
    Global,
    Project(String),
    Category(String),
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Global => write!(f, "global"),
            RuleScope::Project(p) => write!(f, "project:{p}"),
            RuleScope::Category(c) => write!(f, "category:{c}"),
        }
    }
}

impl std::str::FromStr for RuleScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global" {
            Ok(RuleScope::Global)
        } else if let Some(rest) = s.strip_prefix("project:") {
            Ok(RuleScope::Project(rest.to_string()))
        } else if let Some(rest) = s.strip_prefix("category:") {
            Ok(RuleScope::Category(rest.to_string()))
        } else {
            Err(crate::Error::InvalidArgument(format!(
                "unknown rule scope: {s}"
            )))
        }
    }
}

impl Serialize for RuleScope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RuleScope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: i64,
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub context: String,
    pub category: ErrorCategory,
    pub scope: RuleScope,
    pub priority: i32,
    pub source_insight_id: Option<i64>,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: RuleStatus,
    pub fire_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub last_fired: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Rule {
    /// `success_count / max(fire_count, 1)`.
    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / (self.fire_count.max(1)) as f64
    }

    /// Auto-transition eligibility: fire_count >= 10 and success_rate < 0.2 (B4).
    pub fn should_auto_suspend(&self) -> bool {
        self.fire_count >= crate::constants::defaults::RULE_SUSPEND_MIN_FIRES
            && self.success_rate() < crate::constants::defaults::RULE_SUSPEND_MAX_SUCCESS_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_scope_roundtrips() {
        assert_eq!("global".parse::<RuleScope>().unwrap(), RuleScope::Global);
        assert_eq!(
            "project:api".parse::<RuleScope>().unwrap(),
            RuleScope::Project("api".to_string())
        );
        assert_eq!(RuleScope::Global.to_string(), "global");
        assert_eq!(RuleScope::Project("api".to_string()).to_string(), "project:api");
    }

    #[test]
    fn knowledge_type_roundtrips() {
        for t in [
            KnowledgeType::Decision,
            KnowledgeType::Fact,
            KnowledgeType::Solution,
            KnowledgeType::Lesson,
            KnowledgeType::Convention,
            KnowledgeType::Reflection,
        ] {
            let s = t.to_string();
            assert_eq!(s.parse::<KnowledgeType>().unwrap(), t);
        }
    }
}
