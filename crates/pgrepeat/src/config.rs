//! Profiler configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! skip_segments = ["/admin", "/pgrepeat", "/health"]
//! capture_stacktrace = false
//! slow_query_threshold_ms = 250.0
//! ```

use crate::error::{ProfError, ProfResult};
use crate::intercept::{DEFAULT_HIDDEN_PREFIXES, DEFAULT_SLOW_QUERY_THRESHOLD_MS, InterceptConfig};
use serde::Deserialize;
use std::path::Path;

/// Path segments that are never profiled unless configured otherwise.
pub const DEFAULT_SKIP_SEGMENTS: &[&str] = &["/admin", "/pgrepeat"];

/// Request bodies larger than this are not captured.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Requests whose path contains any of these are not recorded.
    pub skip_segments: Vec<String>,
    pub capture_stacktrace: bool,
    pub hidden_frame_prefixes: Vec<String>,
    pub slow_query_threshold_ms: f64,
    pub max_body_bytes: usize,
    /// Alias given to connections acquired without one.
    pub default_alias: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            skip_segments: DEFAULT_SKIP_SEGMENTS.iter().map(|s| s.to_string()).collect(),
            capture_stacktrace: true,
            hidden_frame_prefixes: DEFAULT_HIDDEN_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            default_alias: crate::intercept::DEFAULT_ALIAS.to_string(),
        }
    }
}

impl ProfilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path segment to skip.
    pub fn skip_segment(mut self, segment: impl Into<String>) -> Self {
        self.skip_segments.push(segment.into());
        self
    }

    /// Replace the skipped path segments.
    pub fn with_skip_segments<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_segments = segments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stacktrace(mut self, capture: bool) -> Self {
        self.capture_stacktrace = capture;
        self
    }

    pub fn hide_frames(mut self, prefix: impl Into<String>) -> Self {
        self.hidden_frame_prefixes.push(prefix.into());
        self
    }

    pub fn with_slow_query_threshold_ms(mut self, threshold_ms: f64) -> Self {
        self.slow_query_threshold_ms = threshold_ms;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn with_default_alias(mut self, alias: impl Into<String>) -> Self {
        self.default_alias = alias.into();
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ProfResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ProfError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ProfResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProfError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> ProfResult<()> {
        if !self.slow_query_threshold_ms.is_finite() || self.slow_query_threshold_ms < 0.0 {
            return Err(ProfError::Config(format!(
                "slow_query_threshold_ms must be a non-negative number, got {}",
                self.slow_query_threshold_ms
            )));
        }
        if self.skip_segments.iter().any(|s| s.trim().is_empty()) {
            return Err(ProfError::Config(
                "skip_segments must not contain empty strings".into(),
            ));
        }
        if self.default_alias.trim().is_empty() {
            return Err(ProfError::Config("default_alias must not be empty".into()));
        }
        Ok(())
    }

    /// Interception settings for connections profiled under this configuration.
    pub fn intercept_config(&self) -> InterceptConfig {
        InterceptConfig {
            capture_stacktrace: self.capture_stacktrace,
            hidden_frame_prefixes: self.hidden_frame_prefixes.clone(),
            slow_query_threshold_ms: self.slow_query_threshold_ms,
        }
    }
}
