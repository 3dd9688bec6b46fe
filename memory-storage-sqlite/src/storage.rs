//! [`SqliteStorage`]: the concrete [`memory_core::StorageBackend`] over a
//! local libSQL/SQLite file, with an FTS5-backed lexical index.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use libsql::{Builder, Connection, Database, Row, Value};
use memory_core::storage_backend::{FtsHit, KnowledgeFilter, StorageBackend};
use memory_core::types::{
    ErrorCategory, ErrorRecord, ErrorStatus, Insight, InsightStatus, KnowledgeItem,
    KnowledgeStatus, KnowledgeType, Observation, ObservationType, Relation, RelationType, Rule,
    RuleStatus, Session, SessionStatus, TimelineEvent,
};
use memory_core::{Error, Result};

use crate::migrate;

fn storage_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

/// Turns free-text into a safe FTS5 `MATCH` expression by quoting every
/// token individually and OR-joining them, so punctuation in user-supplied
/// queries never breaks FTS5's query grammar.
fn safe_match_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn json_to_text<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}

fn text_to_json<T: for<'de> serde::Deserialize<'de> + Default>(text: &str) -> T {
    serde_json::from_str(text).unwrap_or_default()
}

pub struct SqliteStorage {
    db: Database,
    #[allow(dead_code)]
    path: PathBuf,
}

impl SqliteStorage {
    /// Open (creating if absent) a local database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Builder::new_local(&path)
            .build()
            .await
            .map_err(storage_err)?;
        Ok(Self { db, path })
    }

    /// In-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await.map_err(storage_err)?;
        Ok(Self { db, path: PathBuf::from(":memory:") })
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(storage_err)
    }

    fn row_to_session(row: &Row) -> Result<Session> {
        Ok(Session {
            id: row.get(0).map_err(storage_err)?,
            started_at: row.get(1).map_err(storage_err)?,
            ended_at: row.get(2).ok(),
            project: row.get(3).map_err(storage_err)?,
            status: row.get::<String>(4).map_err(storage_err)?.parse_session_status()?,
            summary: row.get(5).ok(),
            branch: row.get(6).map_err(storage_err)?,
            log_count: row.get(7).map_err(storage_err)?,
        })
    }

    fn row_to_knowledge(row: &Row) -> Result<KnowledgeItem> {
        let tags_json: String = row.get(6).map_err(storage_err)?;
        let tags: HashSet<String> = text_to_json(&tags_json);
        Ok(KnowledgeItem {
            id: row.get(0).map_err(storage_err)?,
            session_id: row.get(1).map_err(storage_err)?,
            ktype: row.get::<String>(2).map_err(storage_err)?.parse()?,
            content: row.get(3).map_err(storage_err)?,
            context: row.get(4).map_err(storage_err)?,
            project: row.get(5).map_err(storage_err)?,
            tags,
            status: row.get::<String>(7).map_err(storage_err)?.parse()?,
            superseded_by: row.get(8).ok(),
            confidence: row.get(9).map_err(storage_err)?,
            source: row.get(10).map_err(storage_err)?,
            created_at: row.get(11).map_err(storage_err)?,
            last_confirmed: row.get(12).map_err(storage_err)?,
            recall_count: row.get(13).map_err(storage_err)?,
            last_recalled: row.get(14).ok(),
            branch: row.get(15).map_err(storage_err)?,
        })
    }

    fn row_to_timeline(row: &Row) -> Result<TimelineEvent> {
        let files_json: String = row.get(6).map_err(storage_err)?;
        Ok(TimelineEvent {
            id: row.get(0).map_err(storage_err)?,
            session_id: row.get(1).map_err(storage_err)?,
            ts: row.get(2).map_err(storage_err)?,
            event: row.get(3).map_err(storage_err)?,
            summary: row.get(4).map_err(storage_err)?,
            details: row.get(5).map_err(storage_err)?,
            project: row.get(7).map_err(storage_err)?,
            files: text_to_json(&files_json),
        })
    }

    fn row_to_error(row: &Row) -> Result<ErrorRecord> {
        let tags_json: String = row.get(7).map_err(storage_err)?;
        Ok(ErrorRecord {
            id: row.get(0).map_err(storage_err)?,
            session_id: row.get(1).map_err(storage_err)?,
            category: row.get::<String>(2).map_err(storage_err)?.parse()?,
            severity: row.get(3).map_err(storage_err)?,
            description: row.get(4).map_err(storage_err)?,
            context: row.get(5).map_err(storage_err)?,
            fix: row.get(6).map_err(storage_err)?,
            project: row.get(8).map_err(storage_err)?,
            tags: text_to_json(&tags_json),
            status: row.get::<String>(9).map_err(storage_err)?.parse_error_status()?,
            resolved_at: row.get(10).ok(),
            insight_id: row.get(11).ok(),
            created_at: row.get(12).map_err(storage_err)?,
        })
    }

    fn row_to_insight(row: &Row) -> Result<Insight> {
        let source_errors_json: String = row.get(7).map_err(storage_err)?;
        let tags_json: String = row.get(9).map_err(storage_err)?;
        Ok(Insight {
            id: row.get(0).map_err(storage_err)?,
            session_id: row.get(1).map_err(storage_err)?,
            content: row.get(2).map_err(storage_err)?,
            context: row.get(3).map_err(storage_err)?,
            category: row.get::<String>(4).map_err(storage_err)?.parse()?,
            importance: row.get(5).map_err(storage_err)?,
            confidence: row.get(6).map_err(storage_err)?,
            source_error_ids: text_to_json(&source_errors_json),
            project: row.get(8).map_err(storage_err)?,
            tags: text_to_json(&tags_json),
            status: row.get::<String>(10).map_err(storage_err)?.parse_insight_status()?,
            promoted_to_rule_id: row.get(11).ok(),
            fire_count: row.get(12).map_err(storage_err)?,
            created_at: row.get(13).map_err(storage_err)?,
            updated_at: row.get(14).map_err(storage_err)?,
        })
    }

    fn row_to_rule(row: &Row) -> Result<Rule> {
        let tags_json: String = row.get(9).map_err(storage_err)?;
        let scope: String = row.get(5).map_err(storage_err)?;
        Ok(Rule {
            id: row.get(0).map_err(storage_err)?,
            session_id: row.get(1).map_err(storage_err)?,
            content: row.get(2).map_err(storage_err)?,
            context: row.get(3).map_err(storage_err)?,
            category: row.get::<String>(4).map_err(storage_err)?.parse()?,
            scope: scope.parse()?,
            priority: row.get(6).map_err(storage_err)?,
            source_insight_id: row.get(7).ok(),
            project: row.get(8).map_err(storage_err)?,
            tags: text_to_json(&tags_json),
            status: row.get::<String>(10).map_err(storage_err)?.parse_rule_status()?,
            fire_count: row.get(11).map_err(storage_err)?,
            success_count: row.get(12).map_err(storage_err)?,
            fail_count: row.get(13).map_err(storage_err)?,
            last_fired: row.get(14).ok(),
            created_at: row.get(15).map_err(storage_err)?,
            updated_at: row.get(16).map_err(storage_err)?,
        })
    }
}

/// Small parse helpers for the status/enum strings that don't carry a
/// payload and so don't already have a `FromStr` impl reused from
/// memory-core's type-parsing (those live on the type itself via
/// `std::str::FromStr`; these three wrap session/error/insight/rule status
/// the same way).
trait ParseStatus {
    fn parse_session_status(&self) -> Result<SessionStatus>;
    fn parse_error_status(&self) -> Result<ErrorStatus>;
    fn parse_insight_status(&self) -> Result<InsightStatus>;
    fn parse_rule_status(&self) -> Result<RuleStatus>;
}

impl ParseStatus for String {
    fn parse_session_status(&self) -> Result<SessionStatus> {
        match self.as_str() {
            "open" => Ok(SessionStatus::Open),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(Error::InvalidArgument(format!("unknown session status: {other}"))),
        }
    }

    fn parse_error_status(&self) -> Result<ErrorStatus> {
        match self.as_str() {
            "open" => Ok(ErrorStatus::Open),
            "resolved" => Ok(ErrorStatus::Resolved),
            "insight_extracted" => Ok(ErrorStatus::InsightExtracted),
            other => Err(Error::InvalidArgument(format!("unknown error status: {other}"))),
        }
    }

    fn parse_insight_status(&self) -> Result<InsightStatus> {
        match self.as_str() {
            "active" => Ok(InsightStatus::Active),
            "archived" => Ok(InsightStatus::Archived),
            "promoted" => Ok(InsightStatus::Promoted),
            other => Err(Error::InvalidArgument(format!("unknown insight status: {other}"))),
        }
    }

    fn parse_rule_status(&self) -> Result<RuleStatus> {
        match self.as_str() {
            "active" => Ok(RuleStatus::Active),
            "suspended" => Ok(RuleStatus::Suspended),
            "retired" => Ok(RuleStatus::Retired),
            other => Err(Error::InvalidArgument(format!("unknown rule status: {other}"))),
        }
    }
}

fn session_status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Open => "open",
        SessionStatus::Closed => "closed",
    }
}

fn error_status_str(s: ErrorStatus) -> &'static str {
    match s {
        ErrorStatus::Open => "open",
        ErrorStatus::Resolved => "resolved",
        ErrorStatus::InsightExtracted => "insight_extracted",
    }
}

fn insight_status_str(s: InsightStatus) -> &'static str {
    match s {
        InsightStatus::Active => "active",
        InsightStatus::Archived => "archived",
        InsightStatus::Promoted => "promoted",
    }
}

fn rule_status_str(s: RuleStatus) -> &'static str {
    match s {
        RuleStatus::Active => "active",
        RuleStatus::Suspended => "suspended",
        RuleStatus::Retired => "retired",
    }
}

fn observation_type_str(t: ObservationType) -> &'static str {
    match t {
        ObservationType::Bugfix => "bugfix",
        ObservationType::Feature => "feature",
        ObservationType::Refactor => "refactor",
        ObservationType::Change => "change",
        ObservationType::Discovery => "discovery",
        ObservationType::Decision => "decision",
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn init(&self) -> Result<()> {
        migrate::create_schema(&self.conn()?).await
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, started_at, ended_at, project, status, summary, branch, log_count) VALUES (?,?,?,?,?,?,?,?)",
            libsql::params![
                session.id.clone(),
                session.started_at.clone(),
                session.ended_at.clone(),
                session.project.clone(),
                session_status_str(session.status),
                session.summary.clone(),
                session.branch.clone(),
                session.log_count,
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, started_at, ended_at, project, status, summary, branch, log_count FROM sessions WHERE id = ?",
                libsql::params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(Self::row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_session(
        &self,
        id: &str,
        status: SessionStatus,
        ended_at: Option<&str>,
        summary: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET status = ?, ended_at = COALESCE(?, ended_at), summary = COALESCE(?, summary) WHERE id = ?",
            libsql::params![session_status_str(status), ended_at, summary, id.to_string()],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn list_sessions(&self, project: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let (sql, params): (&str, Vec<Value>) = match project {
            Some(p) => (
                "SELECT id, started_at, ended_at, project, status, summary, branch, log_count FROM sessions WHERE project = ? ORDER BY started_at DESC LIMIT ?",
                vec![p.to_string().into(), (limit as i64).into()],
            ),
            None => (
                "SELECT id, started_at, ended_at, project, status, summary, branch, log_count FROM sessions ORDER BY started_at DESC LIMIT ?",
                vec![(limit as i64).into()],
            ),
        };
        let mut rows = conn.query(sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_session(&row)?);
        }
        Ok(out)
    }

    async fn all_sessions_chronological(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, started_at, ended_at, project, status, summary, branch, log_count FROM sessions ORDER BY started_at ASC",
                (),
            )
            .await
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_session(&row)?);
        }
        Ok(out)
    }

    async fn insert_knowledge(&self, item: &KnowledgeItem) -> Result<i64> {
        let conn = self.conn()?;
        let tags_json = json_to_text(&item.tags)?;
        conn.execute(
            "INSERT INTO knowledge (session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            libsql::params![
                item.session_id.clone(),
                item.ktype.as_str(),
                item.content.clone(),
                item.context.clone(),
                item.project.clone(),
                tags_json,
                item.status.as_str(),
                item.superseded_by,
                item.confidence,
                item.source.clone(),
                item.created_at.clone(),
                item.last_confirmed.clone(),
                item.recall_count,
                item.last_recalled.clone(),
                item.branch.clone(),
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_knowledge(&self, id: i64) -> Result<Option<KnowledgeItem>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE id = ?",
                libsql::params![id],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(Self::row_to_knowledge(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_knowledge(&self, item: &KnowledgeItem) -> Result<()> {
        let conn = self.conn()?;
        let tags_json = json_to_text(&item.tags)?;
        conn.execute(
            "UPDATE knowledge SET session_id=?, type=?, content=?, context=?, project=?, tags=?, status=?, superseded_by=?, confidence=?, source=?, created_at=?, last_confirmed=?, recall_count=?, last_recalled=?, branch=? WHERE id = ?",
            libsql::params![
                item.session_id.clone(),
                item.ktype.as_str(),
                item.content.clone(),
                item.context.clone(),
                item.project.clone(),
                tags_json,
                item.status.as_str(),
                item.superseded_by,
                item.confidence,
                item.source.clone(),
                item.created_at.clone(),
                item.last_confirmed.clone(),
                item.recall_count,
                item.last_recalled.clone(),
                item.branch.clone(),
                item.id,
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn list_knowledge(&self, filter: &KnowledgeFilter, limit: usize) -> Result<Vec<KnowledgeItem>> {
        let mut sql = "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE 1=1".to_string();
        let mut params: Vec<Value> = Vec::new();
        if let Some(p) = &filter.project {
            sql.push_str(" AND project = ?");
            params.push(p.clone().into());
        }
        if let Some(t) = filter.ktype {
            sql.push_str(" AND type = ?");
            params.push(t.as_str().into());
        }
        let status = filter.status.unwrap_or(KnowledgeStatus::Active);
        sql.push_str(" AND status = ?");
        params.push(status.as_str().into());
        if let Some(b) = &filter.branch {
            sql.push_str(" AND (branch = ? OR branch = '')");
            params.push(b.clone().into());
        }
        sql.push_str(" ORDER BY last_confirmed DESC LIMIT ?");
        params.push((limit as i64).into());

        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let item = Self::row_to_knowledge(&row)?;
            if filter.tags.is_empty() || filter.tags.iter().any(|t| item.tags.contains(t)) {
                out.push(item);
            }
        }
        Ok(out)
    }

    async fn knowledge_for_session(&self, session_id: &str) -> Result<Vec<KnowledgeItem>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE session_id = ? AND status = 'active' ORDER BY created_at ASC",
                libsql::params![session_id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_knowledge(&row)?);
        }
        Ok(out)
    }

    async fn list_active_by_type_project(&self, ktype: KnowledgeType, project: &str) -> Result<Vec<KnowledgeItem>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE status = 'active' AND type = ? AND project = ?",
                libsql::params![ktype.as_str(), project.to_string()],
            )
            .await
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_knowledge(&row)?);
        }
        Ok(out)
    }

    async fn fts_search(&self, query: &str, filter: &KnowledgeFilter, limit: usize) -> Result<Vec<FtsHit>> {
        let match_query = safe_match_query(query);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = "SELECT k.id, k.session_id, k.type, k.content, k.context, k.project, k.tags, k.status, k.superseded_by, k.confidence, k.source, k.created_at, k.last_confirmed, k.recall_count, k.last_recalled, k.branch, knowledge_fts.rank FROM knowledge_fts JOIN knowledge k ON k.id = knowledge_fts.rowid WHERE knowledge_fts MATCH ? AND k.status = 'active'".to_string();
        let mut params: Vec<Value> = vec![match_query.into()];
        if let Some(p) = &filter.project {
            sql.push_str(" AND k.project = ?");
            params.push(p.clone().into());
        }
        if let Some(t) = filter.ktype {
            sql.push_str(" AND k.type = ?");
            params.push(t.as_str().into());
        }
        if let Some(b) = &filter.branch {
            sql.push_str(" AND (k.branch = ? OR k.branch = '')");
            params.push(b.clone().into());
        }
        sql.push_str(" ORDER BY knowledge_fts.rank LIMIT ?");
        params.push((limit as i64).into());

        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let item = Self::row_to_knowledge(&row)?;
            let raw_rank: f64 = row.get(16).unwrap_or(0.0);
            if filter.tags.is_empty() || filter.tags.iter().any(|t| item.tags.contains(t)) {
                out.push(FtsHit { item, raw_rank });
            }
        }
        Ok(out)
    }

    async fn all_active(&self, project: Option<&str>) -> Result<Vec<KnowledgeItem>> {
        let conn = self.conn()?;
        let (sql, params): (&str, Vec<Value>) = match project {
            Some(p) => (
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE status = 'active' AND project = ?",
                vec![p.to_string().into()],
            ),
            None => (
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE status = 'active'",
                vec![],
            ),
        };
        let mut rows = conn.query(sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_knowledge(&row)?);
        }
        Ok(out)
    }

    async fn stale_since(&self, from_status: KnowledgeStatus, cutoff: &str) -> Result<Vec<KnowledgeItem>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE status = ? AND last_confirmed <= ?",
                libsql::params![from_status.as_str(), cutoff.to_string()],
            )
            .await
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_knowledge(&row)?);
        }
        Ok(out)
    }

    async fn predecessor_of(&self, id: i64) -> Result<Option<KnowledgeItem>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, type, content, context, project, tags, status, superseded_by, confidence, source, created_at, last_confirmed, recall_count, last_recalled, branch FROM knowledge WHERE superseded_by = ? LIMIT 1",
                libsql::params![id],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(Self::row_to_knowledge(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_relation(&self, relation: &Relation) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO relations (from_id, to_id, type, created_at) VALUES (?,?,?,?)",
            libsql::params![relation.from_id, relation.to_id, relation.rtype.as_str(), relation.created_at.clone()],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn relations_from(&self, id: i64, rtype: Option<RelationType>) -> Result<Vec<Relation>> {
        let conn = self.conn()?;
        let (sql, params): (&str, Vec<Value>) = match rtype {
            Some(t) => (
                "SELECT from_id, to_id, type, created_at FROM relations WHERE from_id = ? AND type = ?",
                vec![id.into(), t.as_str().into()],
            ),
            None => (
                "SELECT from_id, to_id, type, created_at FROM relations WHERE from_id = ?",
                vec![id.into()],
            ),
        };
        let mut rows = conn.query(sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let rtype_str: String = row.get(2).map_err(storage_err)?;
            out.push(Relation {
                from_id: row.get(0).map_err(storage_err)?,
                to_id: row.get(1).map_err(storage_err)?,
                rtype: rtype_str.parse()?,
                created_at: row.get(3).map_err(storage_err)?,
            });
        }
        Ok(out)
    }

    async fn insert_timeline_event(&self, event: &TimelineEvent) -> Result<i64> {
        let conn = self.conn()?;
        let files_json = json_to_text(&event.files)?;
        conn.execute(
            "INSERT INTO timeline_events (session_id, ts, event, summary, details, project, files) VALUES (?,?,?,?,?,?,?)",
            libsql::params![
                event.session_id.clone(),
                event.ts.clone(),
                event.event.clone(),
                event.summary.clone(),
                event.details.clone(),
                event.project.clone(),
                files_json,
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn list_timeline(&self, session_id: Option<&str>, project: Option<&str>, limit: usize) -> Result<Vec<TimelineEvent>> {
        let mut sql = "SELECT id, session_id, ts, event, summary, details, files, project FROM timeline_events WHERE 1=1".to_string();
        let mut params: Vec<Value> = Vec::new();
        if let Some(s) = session_id {
            sql.push_str(" AND session_id = ?");
            params.push(s.to_string().into());
        }
        if let Some(p) = project {
            sql.push_str(" AND project = ?");
            params.push(p.to_string().into());
        }
        sql.push_str(" ORDER BY ts DESC LIMIT ?");
        params.push((limit as i64).into());

        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_timeline(&row)?);
        }
        Ok(out)
    }

    async fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        let conn = self.conn()?;
        let files_json = json_to_text(&observation.files_affected)?;
        conn.execute(
            "INSERT INTO observations (session_id, tool_name, observation_type, summary, files_affected, project, branch, created_at) VALUES (?,?,?,?,?,?,?,?)",
            libsql::params![
                observation.session_id.clone(),
                observation.tool_name.clone(),
                observation_type_str(observation.observation_type),
                observation.summary.clone(),
                files_json,
                observation.project.clone(),
                observation.branch.clone(),
                observation.created_at.clone(),
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn purge_observations_before(&self, cutoff: &str) -> Result<u64> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM observations WHERE created_at < ?", libsql::params![cutoff.to_string()])
            .await
            .map_err(storage_err)?;
        Ok(changed)
    }

    async fn insert_error(&self, error: &ErrorRecord) -> Result<i64> {
        let conn = self.conn()?;
        let tags_json = json_to_text(&error.tags)?;
        conn.execute(
            "INSERT INTO errors (session_id, category, severity, description, context, fix, project, tags, status, resolved_at, insight_id, created_at) VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
            libsql::params![
                error.session_id.clone(),
                error.category.as_str(),
                error.severity.clone(),
                error.description.clone(),
                error.context.clone(),
                error.fix.clone(),
                error.project.clone(),
                tags_json,
                error_status_str(error.status),
                error.resolved_at.clone(),
                error.insight_id,
                error.created_at.clone(),
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_error(&self, id: i64) -> Result<Option<ErrorRecord>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, category, severity, description, context, fix, tags, project, status, resolved_at, insight_id, created_at FROM errors WHERE id = ?",
                libsql::params![id],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(Self::row_to_error(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_error(&self, error: &ErrorRecord) -> Result<()> {
        let conn = self.conn()?;
        let tags_json = json_to_text(&error.tags)?;
        conn.execute(
            "UPDATE errors SET category=?, severity=?, description=?, context=?, fix=?, project=?, tags=?, status=?, resolved_at=?, insight_id=? WHERE id = ?",
            libsql::params![
                error.category.as_str(),
                error.severity.clone(),
                error.description.clone(),
                error.context.clone(),
                error.fix.clone(),
                error.project.clone(),
                tags_json,
                error_status_str(error.status),
                error.resolved_at.clone(),
                error.insight_id,
                error.id,
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn errors_since(
        &self,
        category: ErrorCategory,
        project: &str,
        since: &str,
        status: Option<ErrorStatus>,
    ) -> Result<Vec<ErrorRecord>> {
        let mut sql = "SELECT id, session_id, category, severity, description, context, fix, tags, project, status, resolved_at, insight_id, created_at FROM errors WHERE category = ? AND project = ? AND created_at >= ?".to_string();
        let mut params: Vec<Value> = vec![category.as_str().into(), project.to_string().into(), since.to_string().into()];
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            params.push(error_status_str(s).into());
        }
        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_error(&row)?);
        }
        Ok(out)
    }

    async fn list_errors(&self, project: Option<&str>, status: Option<ErrorStatus>, limit: usize) -> Result<Vec<ErrorRecord>> {
        let mut sql = "SELECT id, session_id, category, severity, description, context, fix, tags, project, status, resolved_at, insight_id, created_at FROM errors WHERE 1=1".to_string();
        let mut params: Vec<Value> = Vec::new();
        if let Some(p) = project {
            sql.push_str(" AND project = ?");
            params.push(p.to_string().into());
        }
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            params.push(error_status_str(s).into());
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        params.push((limit as i64).into());
        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_error(&row)?);
        }
        Ok(out)
    }

    async fn insert_insight(&self, insight: &Insight) -> Result<i64> {
        let conn = self.conn()?;
        let source_errors_json = json_to_text(&insight.source_error_ids)?;
        let tags_json = json_to_text(&insight.tags)?;
        conn.execute(
            "INSERT INTO insights (session_id, content, context, category, importance, confidence, source_error_ids, project, tags, status, promoted_to_rule_id, fire_count, created_at, updated_at) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            libsql::params![
                insight.session_id.clone(),
                insight.content.clone(),
                insight.context.clone(),
                insight.category.as_str(),
                insight.importance,
                insight.confidence,
                source_errors_json,
                insight.project.clone(),
                tags_json,
                insight_status_str(insight.status),
                insight.promoted_to_rule_id,
                insight.fire_count,
                insight.created_at.clone(),
                insight.updated_at.clone(),
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_insight(&self, id: i64) -> Result<Option<Insight>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, content, context, category, importance, confidence, source_error_ids, project, tags, status, promoted_to_rule_id, fire_count, created_at, updated_at FROM insights WHERE id = ?",
                libsql::params![id],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(Self::row_to_insight(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_insight(&self, insight: &Insight) -> Result<()> {
        let conn = self.conn()?;
        let source_errors_json = json_to_text(&insight.source_error_ids)?;
        let tags_json = json_to_text(&insight.tags)?;
        conn.execute(
            "UPDATE insights SET content=?, context=?, category=?, importance=?, confidence=?, source_error_ids=?, project=?, tags=?, status=?, promoted_to_rule_id=?, fire_count=?, updated_at=? WHERE id = ?",
            libsql::params![
                insight.content.clone(),
                insight.context.clone(),
                insight.category.as_str(),
                insight.importance,
                insight.confidence,
                source_errors_json,
                insight.project.clone(),
                tags_json,
                insight_status_str(insight.status),
                insight.promoted_to_rule_id,
                insight.fire_count,
                insight.updated_at.clone(),
                insight.id,
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn list_insights(&self, project: Option<&str>, status: Option<InsightStatus>, limit: usize) -> Result<Vec<Insight>> {
        let mut sql = "SELECT id, session_id, content, context, category, importance, confidence, source_error_ids, project, tags, status, promoted_to_rule_id, fire_count, created_at, updated_at FROM insights WHERE 1=1".to_string();
        let mut params: Vec<Value> = Vec::new();
        if let Some(p) = project {
            sql.push_str(" AND project = ?");
            params.push(p.to_string().into());
        }
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            params.push(insight_status_str(s).into());
        }
        sql.push_str(" ORDER BY updated_at DESC");
        if limit != usize::MAX {
            sql.push_str(" LIMIT ?");
            params.push((limit as i64).into());
        }
        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_insight(&row)?);
        }
        Ok(out)
    }

    async fn insert_rule(&self, rule: &Rule) -> Result<i64> {
        let conn = self.conn()?;
        let tags_json = json_to_text(&rule.tags)?;
        conn.execute(
            "INSERT INTO rules (session_id, content, context, category, scope, priority, source_insight_id, project, tags, status, fire_count, success_count, fail_count, last_fired, created_at, updated_at) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            libsql::params![
                rule.session_id.clone(),
                rule.content.clone(),
                rule.context.clone(),
                rule.category.as_str(),
                rule.scope.to_string(),
                rule.priority,
                rule.source_insight_id,
                rule.project.clone(),
                tags_json,
                rule_status_str(rule.status),
                rule.fire_count,
                rule.success_count,
                rule.fail_count,
                rule.last_fired.clone(),
                rule.created_at.clone(),
                rule.updated_at.clone(),
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, session_id, content, context, category, scope, priority, source_insight_id, project, tags, status, fire_count, success_count, fail_count, last_fired, created_at, updated_at FROM rules WHERE id = ?",
                libsql::params![id],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(Self::row_to_rule(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_rule(&self, rule: &Rule) -> Result<()> {
        let conn = self.conn()?;
        let tags_json = json_to_text(&rule.tags)?;
        conn.execute(
            "UPDATE rules SET content=?, context=?, category=?, scope=?, priority=?, source_insight_id=?, project=?, tags=?, status=?, fire_count=?, success_count=?, fail_count=?, last_fired=?, updated_at=? WHERE id = ?",
            libsql::params![
                rule.content.clone(),
                rule.context.clone(),
                rule.category.as_str(),
                rule.scope.to_string(),
                rule.priority,
                rule.source_insight_id,
                rule.project.clone(),
                tags_json,
                rule_status_str(rule.status),
                rule.fire_count,
                rule.success_count,
                rule.fail_count,
                rule.last_fired.clone(),
                rule.updated_at.clone(),
                rule.id,
            ],
        )
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn applicable_rules(&self, project: &str, category: Option<ErrorCategory>, status: Option<RuleStatus>) -> Result<Vec<Rule>> {
        let mut sql = "SELECT id, session_id, content, context, category, scope, priority, source_insight_id, project, tags, status, fire_count, success_count, fail_count, last_fired, created_at, updated_at FROM rules WHERE (scope = 'global' OR scope = ?)".to_string();
        let mut params: Vec<Value> = vec![format!("project:{project}").into()];
        if let Some(c) = category {
            sql.push_str(" AND (category = ? OR scope = ?)");
            params.push(c.as_str().into());
            params.push(format!("category:{}", c.as_str()).into());
        }
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            params.push(rule_status_str(s).into());
        }
        sql.push_str(" ORDER BY priority DESC");
        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_rule(&row)?);
        }
        Ok(out)
    }

    async fn list_rules(&self, status: Option<RuleStatus>, limit: usize) -> Result<Vec<Rule>> {
        let mut sql = "SELECT id, session_id, content, context, category, scope, priority, source_insight_id, project, tags, status, fire_count, success_count, fail_count, last_fired, created_at, updated_at FROM rules WHERE 1=1".to_string();
        let mut params: Vec<Value> = Vec::new();
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            params.push(rule_status_str(s).into());
        }
        sql.push_str(" ORDER BY priority DESC LIMIT ?");
        params.push((limit as i64).into());
        let conn = self.conn()?;
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(Self::row_to_rule(&row)?);
        }
        Ok(out)
    }

    async fn knowledge_counts_by_status(&self) -> Result<Vec<(KnowledgeStatus, i64)>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM knowledge GROUP BY status", ())
            .await
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let status: String = row.get(0).map_err(storage_err)?;
            let count: i64 = row.get(1).map_err(storage_err)?;
            out.push((status.parse()?, count));
        }
        Ok(out)
    }

    async fn open_error_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM errors WHERE status = 'open'", ())
            .await
            .map_err(storage_err)?;
        let row = rows.next().await.map_err(storage_err)?;
        Ok(row.map(|r| r.get(0).unwrap_or(0)).unwrap_or(0))
    }

    async fn active_rule_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM rules WHERE status = 'active'", ())
            .await
            .map_err(storage_err)?;
        let row = rows.next().await.map_err(storage_err)?;
        Ok(row.map(|r| r.get(0).unwrap_or(0)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_core::types::default_project;

    async fn store() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn item() -> KnowledgeItem {
        KnowledgeItem {
            id: 0,
            session_id: "s1".to_string(),
            ktype: KnowledgeType::Fact,
            content: "use WAL mode for concurrent sqlite reads".to_string(),
            context: String::new(),
            project: default_project(),
            tags: HashSet::new(),
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

    #[tokio::test]
    async fn insert_and_get_knowledge_roundtrips() {
        let storage = store().await;
        let id = storage.insert_knowledge(&item()).await.unwrap();
        let fetched = storage.get_knowledge(id).await.unwrap().unwrap();
        assert_eq!(fetched.content, item().content);
        assert_eq!(fetched.status, KnowledgeStatus::Active);
    }

    #[tokio::test]
    async fn fts_search_finds_active_content() {
        let storage = store().await;
        storage.insert_knowledge(&item()).await.unwrap();
        let filter = KnowledgeFilter::default();
        let hits = storage.fts_search("WAL sqlite", &filter, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn fts_index_drops_non_active_rows() {
        let storage = store().await;
        let id = storage.insert_knowledge(&item()).await.unwrap();
        let mut superseded = storage.get_knowledge(id).await.unwrap().unwrap();
        superseded.status = KnowledgeStatus::Superseded;
        storage.update_knowledge(&superseded).await.unwrap();

        let filter = KnowledgeFilter::default();
        let hits = storage.fts_search("WAL sqlite", &filter, 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn knowledge_counts_reflect_status() {
        let storage = store().await;
        storage.insert_knowledge(&item()).await.unwrap();
        let counts = storage.knowledge_counts_by_status().await.unwrap();
        assert_eq!(counts, vec![(KnowledgeStatus::Active, 1)]);
    }
}
