//! Analyzer configuration.

use serde::Deserialize;

/// Tuning knobs for trace loading.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Number of events between scheduling-state snapshots.
    /// Bounds the replay needed to seek to an arbitrary time.
    pub snapshot_interval: usize,

    /// Number of events between checks of the cancellation flag.
    pub cancel_check_interval: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 10_000,
            cancel_check_interval: 1_024,
        }
    }
}

impl AnalyzerConfig {
    /// Parse a JSON config. Missing fields take their default values.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
