use crate::item::ConversationItem;
use crate::transcript::{Transcript, TranscriptLine, TranscriptSink};
use chrono::{DateTime, Local};
use convlog_client::ConversationSession;
use convlog_core::{ConvlogResult, CorrelationKeys};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Longest correlation-key fragment used in a transcript file name.
const MAX_STEM_KEY_CHARS: usize = 64;

/// Hex digits of the key digest appended when the key had to be altered.
const STEM_DIGEST_CHARS: usize = 12;

/// Per-session state: the live handle, when tracking started, and every item
/// extracted so far.
#[derive(Debug, Clone)]
pub struct ConversationContainer {
    id: Uuid,
    session: Arc<dyn ConversationSession>,
    initial_keys: CorrelationKeys,
    created_at: DateTime<Local>,
    last_activity: Option<DateTime<Local>>,
    items: Vec<ConversationItem>,
    file_stem: String,
}

impl ConversationContainer {
    /// Start tracking `session` now.
    pub fn new(session: Arc<dyn ConversationSession>) -> Self {
        Self::with_creation_time(session, Local::now())
    }

    /// Start tracking `session` with an explicit creation time.
    pub fn with_creation_time(
        session: Arc<dyn ConversationSession>,
        created_at: DateTime<Local>,
    ) -> Self {
        let id = Uuid::new_v4();
        let initial_keys = session.keys();
        let file_stem = file_stem(&created_at, &initial_keys, id);
        Self {
            id,
            session,
            initial_keys,
            created_at,
            last_activity: None,
            items: Vec::new(),
            file_stem,
        }
    }

    /// Unique id of this container.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The live session handle.
    pub fn session(&self) -> &Arc<dyn ConversationSession> {
        &self.session
    }

    /// Current keys of the session, falling back to the keys seen at creation
    /// for whichever part the session no longer reports.
    pub fn keys(&self) -> CorrelationKeys {
        let live = self.session.keys();
        CorrelationKeys {
            primary_id: if live.primary_id.is_empty() {
                self.initial_keys.primary_id.clone()
            } else {
                live.primary_id
            },
            secondary_id: if live.secondary_id.is_empty() {
                self.initial_keys.secondary_id.clone()
            } else {
                live.secondary_id
            },
        }
    }

    /// OR-match on either key, live or as seen at creation.
    pub fn matches(&self, keys: &CorrelationKeys) -> bool {
        self.session.keys().matches(keys) || self.initial_keys.matches(keys)
    }

    /// OR-match on a single key.
    pub fn matches_key(&self, key: &str) -> bool {
        self.session.keys().matches_key(key) || self.initial_keys.matches_key(key)
    }

    /// When tracking started.
    pub fn creation_time(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Last inbound activity recorded for this session.
    pub fn last_activity(&self) -> Option<DateTime<Local>> {
        self.last_activity
    }

    /// Extracted items, in arrival order.
    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    /// Append an item.
    pub fn push(&mut self, item: ConversationItem) {
        self.items.push(item);
    }

    /// Record inbound activity at `at`. Later timestamps win.
    pub fn record_activity(&mut self, at: DateTime<Local>) {
        if self.last_activity.map_or(true, |prev| at >= prev) {
            self.last_activity = Some(at);
        }
    }

    /// File name stem of this session's transcript. Fixed at creation so the
    /// transcript never moves while the session lives.
    pub fn file_stem(&self) -> &str {
        &self.file_stem
    }

    /// Materialize the transcript. `as_of` overrides the recorded last activity.
    ///
    /// Pure with respect to the container: the same items give the same
    /// transcript.
    pub fn transcript(&self, as_of: Option<DateTime<Local>>) -> Transcript {
        Transcript {
            container_id: self.id,
            file_stem: self.file_stem.clone(),
            session: self.keys(),
            created_at: self.created_at,
            last_activity: as_of.or(self.last_activity),
            items: self.items.iter().map(TranscriptLine::from).collect(),
        }
    }

    /// Write the transcript to `sink`, fully replacing any previous one.
    pub async fn dump(
        &self,
        sink: &dyn TranscriptSink,
        as_of: Option<DateTime<Local>>,
    ) -> ConvlogResult<PathBuf> {
        sink.write(&self.transcript(as_of)).await
    }
}

/// `<created>-<key>`. A key that is not file-name safe as-is is sanitized and
/// suffixed with a digest of the original, so distinct keys keep distinct files.
fn file_stem(created_at: &DateTime<Local>, keys: &CorrelationKeys, id: Uuid) -> String {
    let original = keys.preferred();
    let key: String = original
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_KEY_CHARS)
        .collect();
    let key = if key.is_empty() {
        id.to_string()
    } else if key != original {
        let digest = format!("{:x}", Sha256::digest(original.as_bytes()));
        format!("{key}-{}", &digest[..STEM_DIGEST_CHARS])
    } else {
        key
    };
    format!("{}-{key}", created_at.format("%Y%m%d-%H%M%S"))
}
