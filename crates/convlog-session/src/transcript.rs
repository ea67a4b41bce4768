use crate::item::ConversationItem;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use convlog_core::{ConvlogError, ConvlogResult, CorrelationKeys};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File extension of transcript files.
pub const TRANSCRIPT_EXTENSION: &str = "transcript.json";

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// The rendering of a container that gets written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Container the transcript was rendered from.
    pub container_id: Uuid,
    /// File name stem, derived from creation time and session key.
    pub file_stem: String,
    /// Session keys at render time.
    pub session: CorrelationKeys,
    /// When tracking of the session started.
    pub created_at: DateTime<Local>,
    /// Last inbound activity, if any was observed.
    pub last_activity: Option<DateTime<Local>>,
    /// Items in arrival order.
    pub items: Vec<TranscriptLine>,
}

/// One item as it appears in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    /// When the item was extracted.
    pub timestamp: DateTime<Utc>,
    /// `participant`, `message` or `context`.
    pub kind: String,
    /// Short display label (may be empty).
    pub label: String,
    /// Full diagnostic rendering.
    pub detail: String,
    /// Raw XML payload.
    pub payload: String,
}

impl From<&ConversationItem> for TranscriptLine {
    fn from(item: &ConversationItem) -> Self {
        Self {
            timestamp: item.timestamp,
            kind: item.detail.kind().to_string(),
            label: item.short_label().to_string(),
            detail: item.to_string(),
            payload: item.raw_payload.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptSink trait
// ---------------------------------------------------------------------------

/// Destination for rendered transcripts.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Write `transcript`, replacing any previous version for the same session.
    /// Returns where it was written.
    async fn write(&self, transcript: &Transcript) -> ConvlogResult<PathBuf>;
}

// ---------------------------------------------------------------------------
// FileTranscriptWriter
// ---------------------------------------------------------------------------

/// Writes one pretty-printed JSON file per session under a directory.
///
/// Each write overwrites the whole file. The directory is (re)created on every
/// write, so removing it while running only loses the files, not the tracking.
#[derive(Debug, Clone)]
pub struct FileTranscriptWriter {
    dir: PathBuf,
}

impl FileTranscriptWriter {
    /// Create a writer rooted at `dir`. Nothing is touched until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The transcript directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the transcript with `file_stem` lives.
    pub fn transcript_path(&self, file_stem: &str) -> PathBuf {
        self.dir.join(format!("{file_stem}.{TRANSCRIPT_EXTENSION}"))
    }

    /// Read a transcript back from `path`.
    pub async fn read(path: &Path) -> ConvlogResult<Transcript> {
        let data = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&data).map_err(|e| {
            ConvlogError::Transcript(format!(
                "Failed to parse transcript '{}': {e}",
                path.display()
            ))
        })
    }

    /// Paths of all transcripts currently in the directory.
    pub async fn list(&self) -> ConvlogResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(TRANSCRIPT_EXTENSION) {
                    paths.push(entry.path());
                }
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl TranscriptSink for FileTranscriptWriter {
    async fn write(&self, transcript: &Transcript) -> ConvlogResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.transcript_path(&transcript.file_stem);
        let json = serde_json::to_string_pretty(transcript)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
