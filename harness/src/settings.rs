use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs of a hive. Durations are written in humantime form
/// (`"2s"`, `"250ms"`) when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveSettings {
    /// How long the seed has to persist its descriptor after starting.
    #[serde(with = "humantime_serde")]
    pub bootstrap_grace: Duration,

    /// How often the descriptor path is checked during the grace period.
    #[serde(with = "humantime_serde")]
    pub bootstrap_poll: Duration,

    #[serde(with = "humantime_serde")]
    pub seed_start_timeout: Duration,

    /// Bound on each non-seed instance's start.
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,

    /// Bound on each instance's stop before it is abandoned.
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,
}

impl Default for HiveSettings {
    fn default() -> Self {
        Self {
            bootstrap_grace: Duration::from_secs(2),
            bootstrap_poll: Duration::from_millis(50),
            seed_start_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(5),
        }
    }
}
