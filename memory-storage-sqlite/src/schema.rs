//! Table, index, FTS5 virtual table and trigger definitions.
//!
//! The FTS5 table indexes only active rows: triggers remove a row's FTS
//! entry the moment its status leaves `active` (spec.md invariant I7 — only
//! active knowledge is lexically findable) and (re)insert it the moment it
//! becomes active again.

pub const CREATE_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    project TEXT NOT NULL DEFAULT 'general',
    status TEXT NOT NULL,
    summary TEXT,
    branch TEXT NOT NULL DEFAULT '',
    log_count INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_KNOWLEDGE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    type TEXT NOT NULL,
    content TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    project TEXT NOT NULL DEFAULT 'general',
    tags TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    superseded_by INTEGER,
    confidence REAL NOT NULL DEFAULT 0.8,
    source TEXT NOT NULL DEFAULT 'agent',
    created_at TEXT NOT NULL,
    last_confirmed TEXT NOT NULL,
    recall_count INTEGER NOT NULL DEFAULT 0,
    last_recalled TEXT,
    branch TEXT NOT NULL DEFAULT ''
)
"#;

pub const CREATE_KNOWLEDGE_PROJECT_TYPE_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_knowledge_project_type_status
ON knowledge(project, type, status)
"#;

pub const CREATE_KNOWLEDGE_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_knowledge_status ON knowledge(status)
"#;

pub const CREATE_KNOWLEDGE_FTS_TABLE: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    content,
    context,
    tags,
    content='knowledge',
    content_rowid='id',
    tokenize='porter unicode61'
)
"#;

pub const CREATE_KNOWLEDGE_FTS_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS knowledge_ai AFTER INSERT ON knowledge
WHEN new.status = 'active'
BEGIN
    INSERT INTO knowledge_fts(rowid, content, context, tags) VALUES (new.id, new.content, new.context, new.tags);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_au AFTER UPDATE ON knowledge
BEGIN
    DELETE FROM knowledge_fts WHERE rowid = old.id;
    INSERT INTO knowledge_fts(rowid, content, context, tags)
    SELECT new.id, new.content, new.context, new.tags WHERE new.status = 'active';
END;

CREATE TRIGGER IF NOT EXISTS knowledge_ad AFTER DELETE ON knowledge
BEGIN
    DELETE FROM knowledge_fts WHERE rowid = old.id;
END;
"#;

pub const CREATE_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
    from_id INTEGER NOT NULL,
    to_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, type)
)
"#;

pub const CREATE_RELATIONS_FROM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_id)
"#;

pub const CREATE_TIMELINE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS timeline_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    event TEXT NOT NULL,
    summary TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    project TEXT NOT NULL DEFAULT 'general',
    files TEXT NOT NULL DEFAULT '[]'
)
"#;

pub const CREATE_TIMELINE_SESSION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_timeline_session ON timeline_events(session_id, ts DESC)
"#;

pub const CREATE_OBSERVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    observation_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    files_affected TEXT NOT NULL DEFAULT '[]',
    project TEXT NOT NULL DEFAULT 'general',
    branch TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_OBSERVATIONS_CREATED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at)
"#;

pub const CREATE_ERRORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    category TEXT NOT NULL,
    severity TEXT NOT NULL,
    description TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    fix TEXT NOT NULL DEFAULT '',
    project TEXT NOT NULL DEFAULT 'general',
    tags TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'open',
    resolved_at TEXT,
    insight_id INTEGER,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_ERRORS_CATEGORY_PROJECT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_errors_category_project ON errors(category, project, created_at)
"#;

pub const CREATE_INSIGHTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL,
    importance INTEGER NOT NULL DEFAULT 1,
    confidence REAL NOT NULL DEFAULT 0.5,
    source_error_ids TEXT NOT NULL DEFAULT '[]',
    project TEXT NOT NULL DEFAULT 'general',
    tags TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    promoted_to_rule_id INTEGER,
    fire_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_INSIGHTS_PROJECT_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_insights_project_status ON insights(project, status)
"#;

pub const CREATE_RULES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL,
    scope TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 5,
    source_insight_id INTEGER,
    project TEXT NOT NULL DEFAULT 'general',
    tags TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    fire_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    fail_count INTEGER NOT NULL DEFAULT 0,
    last_fired TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_RULES_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rules_status ON rules(status, scope)
"#;

/// Every statement that brings a fresh database up to the current schema,
/// in dependency order (tables before their indexes/triggers).
pub const ALL_STATEMENTS: &[&str] = &[
    CREATE_SESSIONS_TABLE,
    CREATE_KNOWLEDGE_TABLE,
    CREATE_KNOWLEDGE_PROJECT_TYPE_STATUS_INDEX,
    CREATE_KNOWLEDGE_STATUS_INDEX,
    CREATE_KNOWLEDGE_FTS_TABLE,
    CREATE_RELATIONS_TABLE,
    CREATE_RELATIONS_FROM_INDEX,
    CREATE_TIMELINE_TABLE,
    CREATE_TIMELINE_SESSION_INDEX,
    CREATE_OBSERVATIONS_TABLE,
    CREATE_OBSERVATIONS_CREATED_INDEX,
    CREATE_ERRORS_TABLE,
    CREATE_ERRORS_CATEGORY_PROJECT_INDEX,
    CREATE_INSIGHTS_TABLE,
    CREATE_INSIGHTS_PROJECT_STATUS_INDEX,
    CREATE_RULES_TABLE,
    CREATE_RULES_STATUS_INDEX,
];

/// Trigger statements, split out because `CREATE_KNOWLEDGE_FTS_TRIGGERS`
/// contains multiple `;`-separated statements and must be executed as a
/// batch rather than through the single-statement `execute` path.
pub const FTS_TRIGGER_STATEMENTS: &str = CREATE_KNOWLEDGE_FTS_TRIGGERS;
