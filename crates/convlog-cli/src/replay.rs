//! Drive the tracker from a scripted client.
//!
//! A script is JSON lines, one [`ScriptStep`] per line. Blank lines and lines
//! starting with `#` are skipped. Steps run against an in-memory client that
//! the tracker discovers through its normal acquisition path.

use crate::config::AppConfig;
use anyhow::Context;
use chrono::NaiveDateTime;
use convlog_client::{
    InMemoryClient, InMemoryProvider, InMemorySession, ModalityState, SessionEventKind,
};
use convlog_core::CorrelationKeys;
use convlog_session::{Direction, FileTranscriptWriter};
use convlog_tracker::{Tracker, TrackerService, TrackerStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Client status code reported while signed in.
const SIGNED_IN: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Start (or restart) the client and sign in.
    Connect {
        /// Replace the client with a fresh instance holding no conversations.
        #[serde(default)]
        restart: bool,
    },
    /// Report a status code other than signed-in and withdraw the client.
    Lose {
        #[serde(default)]
        status: i32,
    },
    AddSession {
        primary: String,
        #[serde(default)]
        secondary: String,
    },
    /// Open a conversation silently, as if it existed before tracking began.
    ExistingSession {
        primary: String,
        #[serde(default)]
        secondary: String,
    },
    RemoveSession { key: String },
    Content {
        key: String,
        direction: Direction,
        payload: String,
    },
    InitialContent {
        key: String,
        direction: Direction,
        payload: String,
    },
    Participant {
        key: String,
        payload: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    /// Last inbound message timestamp, in UTC.
    LastReceived { key: String, at: NaiveDateTime },
    Modality { key: String, state: ModalityState },
    Wait { ms: u64 },
}

/// What a replay left behind.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub steps: usize,
    pub status: TrackerStatus,
    pub transcripts: Vec<PathBuf>,
}

pub fn parse_script(text: &str) -> anyhow::Result<Vec<ScriptStep>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line.trim())
                .with_context(|| format!("Invalid script step on line {}", n + 1))
        })
        .collect()
}

struct ScriptedClient {
    provider: Arc<InMemoryProvider>,
    client: Arc<InMemoryClient>,
}

impl ScriptedClient {
    fn session(&self, key: &str) -> Option<Arc<InMemorySession>> {
        let session = self.client.manager().find(key);
        if session.is_none() {
            warn!(key = %key, "Script refers to an unknown conversation");
        }
        session
    }

    fn emit(&self, key: &str, kind: SessionEventKind) {
        if let Some(session) = self.session(key) {
            session.emit(kind);
        }
    }

    async fn apply(&mut self, step: ScriptStep) {
        match step {
            ScriptStep::Connect { restart } => {
                if restart {
                    self.client = InMemoryClient::new();
                }
                self.client.set_status_code(SIGNED_IN);
                self.provider.install(self.client.clone());
            }
            ScriptStep::Lose { status } => {
                self.client.set_status_code(status);
                self.provider.uninstall();
            }
            ScriptStep::AddSession { primary, secondary } => {
                self.client
                    .manager()
                    .add_session(CorrelationKeys::new(primary, secondary));
            }
            ScriptStep::ExistingSession { primary, secondary } => {
                self.client
                    .manager()
                    .insert_session(CorrelationKeys::new(primary, secondary));
            }
            ScriptStep::RemoveSession { key } => {
                let keys = CorrelationKeys::new(key.clone(), key.clone());
                if self.client.manager().remove_session(&keys).is_none() {
                    warn!(key = %key, "Script removes an unknown conversation");
                }
            }
            ScriptStep::Content {
                key,
                direction,
                payload,
            } => {
                let kind = match direction {
                    Direction::Received => SessionEventKind::ContentReceived { payload },
                    Direction::Sent => SessionEventKind::ContentSent { payload },
                };
                self.emit(&key, kind);
            }
            ScriptStep::InitialContent {
                key,
                direction,
                payload,
            } => {
                let kind = match direction {
                    Direction::Received => SessionEventKind::InitialContentReceived { payload },
                    Direction::Sent => SessionEventKind::InitialContentSent { payload },
                };
                self.emit(&key, kind);
            }
            ScriptStep::Participant {
                key,
                payload,
                display_name,
            } => self.emit(
                &key,
                SessionEventKind::ParticipantAdded {
                    payload,
                    display_name,
                },
            ),
            ScriptStep::LastReceived { key, at } => {
                if let Some(session) = self.session(&key) {
                    session.emit_last_received(at);
                }
            }
            ScriptStep::Modality { key, state } => {
                if let Some(session) = self.session(&key) {
                    session.modality().set_state(state);
                }
            }
            ScriptStep::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
    }
}

/// Run `steps` against a live [`TrackerService`], pausing `pace` between
/// steps, then stop the service and write every remaining transcript.
pub async fn run(
    config: &AppConfig,
    steps: Vec<ScriptStep>,
    pace: Duration,
) -> anyhow::Result<ReplaySummary> {
    let provider = Arc::new(InMemoryProvider::new());
    let writer = Arc::new(FileTranscriptWriter::new(&config.paths.transcript_dir));
    let tracker = Arc::new(Tracker::new(
        config.tracker.clone(),
        provider.clone(),
        writer.clone(),
    ));
    let service = TrackerService::start(tracker.clone());

    let mut scripted = ScriptedClient {
        provider,
        client: InMemoryClient::new(),
    };
    let count = steps.len();
    for (n, step) in steps.into_iter().enumerate() {
        info!(step = n + 1, ?step, "Replaying");
        scripted.apply(step).await;
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }

    // Let the worker drain queued events and run a periodic pass.
    tokio::time::sleep(config.tracker.tick_interval() * 2).await;
    let status = tracker.status().await;
    service.stop().await?;
    tracker.flush_all().await;

    let transcripts = writer.list().await?;
    info!(
        steps = count,
        transcripts = transcripts.len(),
        "Replay finished"
    );
    Ok(ReplaySummary {
        steps: count,
        status,
        transcripts,
    })
}
