use convlog_core::{ConvlogError, ConvlogResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When tracked conversations are written to disk, besides the immediate dump
/// on every last-received timestamp change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Rewrite every transcript on every worker tick.
    #[default]
    EveryTick,
    /// Rewrite every transcript once every `ticks` worker ticks.
    EveryNTicks {
        /// Period, in ticks. Must be at least 1.
        ticks: u32,
    },
    /// Never flush periodically. A container is written whenever an item is
    /// appended to it.
    EventDriven,
}

impl FlushPolicy {
    /// Whether the periodic flush runs on the `tick`-th tick (1-based).
    pub fn is_due(&self, tick: u64) -> bool {
        match self {
            Self::EveryTick => true,
            Self::EveryNTicks { ticks } => tick % u64::from((*ticks).max(1)) == 0,
            Self::EventDriven => false,
        }
    }

    /// Whether appending an item writes the container right away.
    pub fn dumps_on_append(&self) -> bool {
        matches!(self, Self::EventDriven)
    }
}

/// Settings of the tracker worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Period of the worker tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Wait between client acquisition attempts.
    #[serde(default = "default_acquire_retry_ms")]
    pub acquire_retry_ms: u64,
    #[serde(default)]
    pub flush: FlushPolicy,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_acquire_retry_ms() -> u64 {
    1000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            acquire_retry_ms: default_acquire_retry_ms(),
            flush: FlushPolicy::default(),
        }
    }
}

impl TrackerConfig {
    /// Worker tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Pause between client acquisition attempts.
    pub fn acquire_retry(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_ms)
    }

    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> ConvlogResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(ConvlogError::Config(
                "tracker.tick_interval_ms must be greater than 0".into(),
            ));
        }
        if self.acquire_retry_ms == 0 {
            return Err(ConvlogError::Config(
                "tracker.acquire_retry_ms must be greater than 0".into(),
            ));
        }
        if let FlushPolicy::EveryNTicks { ticks: 0 } = self.flush {
            return Err(ConvlogError::Config(
                "tracker.flush.ticks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
