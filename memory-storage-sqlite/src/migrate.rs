//! Schema creation, additive migration and FTS5 integrity repair.

use libsql::Connection;
use memory_core::{Error, Result};
use tracing::{debug, warn};

use crate::schema;

async fn exec(conn: &Connection, sql: &str) -> Result<()> {
    conn.execute(sql, ())
        .await
        .map(|_| ())
        .map_err(|e| Error::Storage(format!("migration statement failed: {e}")))
}

/// Create every table/index/FTS virtual table/trigger that does not yet
/// exist. Idempotent: safe to call on every process start.
pub async fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .await
        .map_err(|e| Error::Storage(format!("failed to enable WAL mode: {e}")))?;

    for statement in schema::ALL_STATEMENTS {
        exec(conn, statement).await?;
    }
    conn.execute_batch(schema::FTS_TRIGGER_STATEMENTS)
        .await
        .map_err(|e| Error::Storage(format!("failed to install FTS triggers: {e}")))?;

    migrate_missing_columns(conn).await?;
    repair_fts_integrity(conn).await?;
    Ok(())
}

/// Table/column pairs this schema version expects, for drift detection
/// against a database created by an older schema version. New columns are
/// appended with `ALTER TABLE ... ADD COLUMN` rather than a data rewrite.
const EXPECTED_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "knowledge",
        &[
            ("branch", "TEXT NOT NULL DEFAULT ''"),
            ("last_recalled", "TEXT"),
        ],
    ),
    ("sessions", &[("branch", "TEXT NOT NULL DEFAULT ''")]),
];

async fn existing_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({table})");
    let mut rows = conn
        .query(&sql, ())
        .await
        .map_err(|e| Error::Storage(format!("failed to introspect {table}: {e}")))?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next().await.map_err(|e| Error::Storage(e.to_string()))? {
        let name: String = row.get(1).map_err(|e| Error::Storage(e.to_string()))?;
        columns.push(name);
    }
    Ok(columns)
}

/// Add any column named in [`EXPECTED_COLUMNS`] that an existing table is
/// missing, without touching existing data.
async fn migrate_missing_columns(conn: &Connection) -> Result<()> {
    for (table, columns) in EXPECTED_COLUMNS {
        let present = existing_columns(conn, table).await?;
        if present.is_empty() {
            // Table doesn't exist yet (fresh database); create_schema
            // already created it with every column, nothing to add.
            continue;
        }
        for (column, def) in *columns {
            if !present.iter().any(|c| c == column) {
                let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {def}");
                debug!("adding missing column {table}.{column}");
                exec(conn, &sql).await?;
            }
        }
    }
    Ok(())
}

/// Three-step FTS5 integrity repair: ask for an integrity check, fall back
/// to a rebuild, and as a last resort drop and recreate the index from the
/// active rows currently in `knowledge`.
pub async fn repair_fts_integrity(conn: &Connection) -> Result<()> {
    if conn
        .execute("INSERT INTO knowledge_fts(knowledge_fts) VALUES('integrity-check')", ())
        .await
        .is_ok()
    {
        return Ok(());
    }
    warn!("knowledge_fts integrity check failed, attempting rebuild");
    if conn
        .execute("INSERT INTO knowledge_fts(knowledge_fts) VALUES('rebuild')", ())
        .await
        .is_ok()
    {
        return Ok(());
    }
    warn!("knowledge_fts rebuild failed, recreating from active rows");
    exec(conn, "DROP TABLE IF EXISTS knowledge_fts").await?;
    exec(conn, schema::CREATE_KNOWLEDGE_FTS_TABLE).await?;
    exec(
        conn,
        "INSERT INTO knowledge_fts(rowid, content, context, tags) SELECT id, content, context, tags FROM knowledge WHERE status = 'active'",
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_schema_is_idempotent() {
        let db = libsql::Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        create_schema(&conn).await.unwrap();
        create_schema(&conn).await.unwrap();
    }
}
