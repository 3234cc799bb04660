//! Configuration for the agent turn execution core.
//!
//! This struct is intentionally minimal and users construct it however
//! they want. No TOML, YAML, or other config-file parsing dependencies
//! are introduced — the same convention the rest of this crate follows
//! for its other configuration surfaces.
//!
//! # Example
//!
//! ```rust
//! use agentturn::CoreConfig;
//! use std::time::Duration;
//!
//! // Use the spec's stated defaults.
//! let config = CoreConfig::default();
//! assert_eq!(config.default_step_cap, 12);
//!
//! // Or override a field directly.
//! let config = CoreConfig {
//!     ledger_ttl: Duration::from_secs(600),
//!     ..CoreConfig::default()
//! };
//! ```

use std::time::Duration;

/// Global configuration for the turn executor and its collaborators.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long a Tool-Session Ledger entry survives before the TTL sweep
    /// reclaims it. Default 5 minutes.
    pub ledger_ttl: Duration,
    /// How often the TTL sweeper runs. Default 60 s.
    pub ledger_sweep_interval: Duration,
    /// Default `stopWhen.stepCountIs` when an agent does not specify one. Default 12.
    pub default_step_cap: u32,
    /// Non-streaming phase-1 timeout. Default 90 s.
    pub phase1_timeout: Duration,
    /// Streaming phase-1 timeout. Default 270 s.
    pub phase1_stream_timeout: Duration,
    /// Phase-2 (structured output) timeout. Default 90 s.
    pub phase2_timeout: Duration,
    /// Hard ceiling on any per-call timeout regardless of provider options. Default 10 min.
    pub max_timeout_ceiling: Duration,
    /// Initial A2A retry backoff. Default 100 ms.
    pub a2a_retry_initial_backoff: Duration,
    /// Maximum A2A retry backoff. Default 10 s.
    pub a2a_retry_max_backoff: Duration,
    /// Total elapsed budget across all A2A retries. Default 20 s.
    pub a2a_retry_max_elapsed: Duration,
}

impl Default for CoreConfig {
    /// Create a config carrying every default named in the specification.
    fn default() -> Self {
        Self {
            ledger_ttl: Duration::from_secs(5 * 60),
            ledger_sweep_interval: Duration::from_secs(60),
            default_step_cap: 12,
            phase1_timeout: Duration::from_secs(90),
            phase1_stream_timeout: Duration::from_secs(270),
            phase2_timeout: Duration::from_secs(90),
            max_timeout_ceiling: Duration::from_secs(10 * 60),
            a2a_retry_initial_backoff: Duration::from_millis(100),
            a2a_retry_max_backoff: Duration::from_secs(10),
            a2a_retry_max_elapsed: Duration::from_secs(20),
        }
    }
}
