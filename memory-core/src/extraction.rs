//! The extraction queue (spec.md §4.K): the on-disk handoff format between
//! a session and the (out-of-scope) background extraction scanner.
//!
//! Only the queue's file format and enqueue/complete operations are in
//! scope here; the scanner that reads pending files and turns their
//! content into errors/insights is a named external collaborator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::constants::defaults::{EXTRACTION_CHUNK_SIZE_BYTES, EXTRACTION_QUEUE_SIZE_CAP_BYTES};
use crate::Result;

/// A single queued chunk of session content awaiting extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub session_id: String,
    pub project: String,
    pub created_at: String,
    /// Already capped to [`EXTRACTION_QUEUE_SIZE_CAP_BYTES`] via [`cap_to_budget`].
    pub chunks: Vec<String>,
}

fn pending_file_name(session_id: &str) -> String {
    format!("pending-{session_id}.json")
}

fn done_file_name(session_id: &str) -> String {
    format!("done-{session_id}.json")
}

/// Split `content` into chunks no larger than `chunk_size` bytes, breaking
/// only on UTF-8 character boundaries.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    let bytes = content.as_bytes();
    while start < bytes.len() {
        let mut end = (start + chunk_size).min(bytes.len());
        while end < bytes.len() && !content.is_char_boundary(end) {
            end -= 1;
        }
        if end <= start {
            end = content[start..].chars().next().map_or(bytes.len(), |c| start + c.len_utf8());
        }
        chunks.push(content[start..end].to_string());
        start = end;
    }
    chunks
}

/// Cap total queued content to [`EXTRACTION_QUEUE_SIZE_CAP_BYTES`] by
/// progressively dropping the oldest chunks until the remainder fits.
pub fn cap_to_budget(chunks: Vec<String>) -> Vec<String> {
    let mut total: usize = chunks.iter().map(|c| c.len()).sum();
    let mut chunks = chunks;
    while total > EXTRACTION_QUEUE_SIZE_CAP_BYTES && !chunks.is_empty() {
        let removed = chunks.remove(0);
        total -= removed.len();
    }
    chunks
}

/// Durable handoff queue backed by pending/done marker files.
#[async_trait]
pub trait ExtractionQueue: Send + Sync {
    /// Write a pending entry for `session_id`, chunking `content` at
    /// [`EXTRACTION_CHUNK_SIZE_BYTES`] and capping the total at
    /// [`EXTRACTION_QUEUE_SIZE_CAP_BYTES`].
    async fn enqueue(&self, session_id: &str, project: &str, content: &str) -> Result<()>;

    /// Mark a session's pending entry as done (the scanner has processed
    /// it): renames `pending-<id>.json` to `done-<id>.json`.
    async fn mark_done(&self, session_id: &str) -> Result<()>;

    /// List all currently pending entries.
    async fn list_pending(&self) -> Result<Vec<QueueEntry>>;
}

/// Filesystem-backed [`ExtractionQueue`] using atomic temp-then-rename
/// writes so a reader never observes a partially written file.
pub struct FsExtractionQueue {
    dir: PathBuf,
}

impl FsExtractionQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ExtractionQueue for FsExtractionQueue {
    async fn enqueue(&self, session_id: &str, project: &str, content: &str) -> Result<()> {
        let chunks = cap_to_budget(chunk_content(content, EXTRACTION_CHUNK_SIZE_BYTES));
        let entry = QueueEntry {
            session_id: session_id.to_string(),
            project: project.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            chunks,
        };
        let body = serde_json::to_vec_pretty(&entry)?;
        let path = self.dir.join(pending_file_name(session_id));
        self.write_atomic(&path, &body).await
    }

    async fn mark_done(&self, session_id: &str) -> Result<()> {
        let pending = self.dir.join(pending_file_name(session_id));
        let done = self.dir.join(done_file_name(session_id));
        tokio::fs::rename(&pending, &done).await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<QueueEntry>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("pending-") && name.ends_with(".json") {
                let bytes = tokio::fs::read(entry.path()).await?;
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_content_respects_char_boundaries() {
        let content = "a".repeat(10) + "\u{1F600}" + &"b".repeat(10);
        let chunks = chunk_content(&content, 12);
        for chunk in &chunks {
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
        assert_eq!(chunks.join(""), content);
    }

    #[test]
    fn cap_to_budget_drops_oldest_first() {
        let chunks: Vec<String> = (0..10).map(|_| "x".repeat(50 * 1024)).collect();
        let capped = cap_to_budget(chunks.clone());
        let total: usize = capped.iter().map(|c| c.len()).sum();
        assert!(total <= EXTRACTION_QUEUE_SIZE_CAP_BYTES);
        assert!(capped.len() < chunks.len());
    }

    #[tokio::test]
    async fn enqueue_then_mark_done_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsExtractionQueue::new(dir.path());
        queue.enqueue("sess-1", "demo", "hello world").await.unwrap();
        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session_id, "sess-1");

        queue.mark_done("sess-1").await.unwrap();
        let pending = queue.list_pending().await.unwrap();
        assert!(pending.is_empty());
        assert!(dir.path().join("done-sess-1.json").exists());
    }
}
