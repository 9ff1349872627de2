//! Runtime settings.

use std::time::Duration;

use tracing::Level;

/// Default threshold above which reaction effects are reported as slow.
pub const DEFAULT_SLOW_REACTION: Duration = Duration::from_millis(1);

/// Default bound on reaction flush passes before a loop is reported.
pub const DEFAULT_MAX_REACTION_PASSES: usize = 100;

/// Runtime settings shared by a registry and the stores built on it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Development mode: extra creation keys are reported, slow reactions are
    /// logged and failing style functions degrade to an empty value.
    pub dev_mode: bool,
    /// Maximum level for the default tracing subscriber.
    pub log_level: Level,
    /// Reaction effects taking at least this long are logged in development
    /// mode.
    pub slow_reaction: Duration,
    /// Maximum number of flush passes before reactions are considered to be
    /// looping.
    pub max_reaction_passes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dev_mode: cfg!(debug_assertions),
            log_level: Level::INFO,
            slow_reaction: DEFAULT_SLOW_REACTION,
            max_reaction_passes: DEFAULT_MAX_REACTION_PASSES,
        }
    }
}

impl Settings {
    /// Settings with development diagnostics disabled.
    pub fn production() -> Self {
        Self {
            dev_mode: false,
            ..Self::default()
        }
    }

    /// Override development mode.
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Override the log level used by [`crate::logging::init`].
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Override the reaction flush bound.
    pub fn with_max_reaction_passes(mut self, passes: usize) -> Self {
        self.max_reaction_passes = passes;
        self
    }
}
