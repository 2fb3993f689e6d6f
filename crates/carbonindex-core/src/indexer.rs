//! Indexer configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// What a full pass does when an id in `1..=total` cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Log, count and continue. The cursor still advances.
    #[default]
    Skip,
    /// Stop the pass with [`IndexerError::Aborted`]. The cursor is left alone.
    Abort,
}

impl std::str::FromStr for GapPolicy {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(IndexerError::Config(format!(
                "unknown gap policy '{other}' (expected 'skip' or 'abort')"
            ))),
        }
    }
}

/// Configuration for the reconciler, listener and backstop timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Seconds between backstop reconcile passes.
    pub reconcile_interval_secs: u64,
    /// How many recent readings a full pass pulls per farm.
    pub recent_readings_depth: u32,
    /// Behaviour when an id cannot be read during a full pass.
    pub gap_policy: GapPolicy,
    /// Events the live listener may hold queued or in flight at once.
    pub event_channel_capacity: usize,
}

impl IndexerConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Reject values that would stall or spin the pipeline.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.reconcile_interval_secs == 0 {
            return Err(IndexerError::Config(
                "reconcile_interval_secs must be greater than zero".into(),
            ));
        }
        if self.recent_readings_depth == 0 {
            return Err(IndexerError::Config(
                "recent_readings_depth must be greater than zero".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(IndexerError::Config(
                "event_channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 300,
            recent_readings_depth: 50,
            gap_policy: GapPolicy::Skip,
            event_channel_capacity: 1024,
        }
    }
}

/// State of the most recent reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileState {
    /// No pass has run yet.
    Idle,
    /// A pass is in progress.
    Syncing,
    /// The last pass completed (or found nothing to do).
    Succeeded,
    /// The last pass returned an error.
    Failed,
}

impl std::fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Stopped,
    /// Running the initial reconcile.
    Starting,
    /// Listener and backstop timer are active.
    Running,
    /// Draining the listener and timer.
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = IndexerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
        assert_eq!(config.gap_policy, GapPolicy::Skip);
    }

    #[test]
    fn zero_interval_rejected() {
        let config = IndexerConfig {
            reconcile_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn gap_policy_parses() {
        assert_eq!("skip".parse::<GapPolicy>().unwrap(), GapPolicy::Skip);
        assert_eq!("ABORT".parse::<GapPolicy>().unwrap(), GapPolicy::Abort);
        assert!("retry".parse::<GapPolicy>().is_err());
    }

    #[test]
    fn states_display() {
        assert_eq!(ReconcileState::Syncing.to_string(), "syncing");
        assert_eq!(LifecycleState::Running.to_string(), "running");
    }
}
