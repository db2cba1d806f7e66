use super::stacktrace::DEFAULT_HIDDEN_PREFIXES;

/// Default slow-query threshold in milliseconds.
pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: f64 = 500.0;

/// Per-connection interception settings.
#[derive(Debug, Clone)]
pub struct InterceptConfig {
    /// Capture the call stack for every recorded call.
    pub capture_stacktrace: bool,
    /// Frames whose function path starts with one of these are dropped.
    pub hidden_frame_prefixes: Vec<String>,
    /// Calls slower than this are flagged `is_slow` and logged at WARN.
    pub slow_query_threshold_ms: f64,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            capture_stacktrace: true,
            hidden_frame_prefixes: DEFAULT_HIDDEN_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
        }
    }
}

impl InterceptConfig {
    /// Create a configuration with defaults (stack capture on, 500 ms threshold).
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn stack capture on or off.
    pub fn with_stacktrace(mut self, capture: bool) -> Self {
        self.capture_stacktrace = capture;
        self
    }

    /// Set the slow query threshold.
    pub fn with_slow_query_threshold_ms(mut self, threshold_ms: f64) -> Self {
        self.slow_query_threshold_ms = threshold_ms;
        self
    }

    /// Hide additional frames from captured stacks.
    pub fn hide_frames(mut self, prefix: impl Into<String>) -> Self {
        self.hidden_frame_prefixes.push(prefix.into());
        self
    }
}
