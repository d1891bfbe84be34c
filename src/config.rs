//! # Configuration
//!
//! Service configuration: the acceptance policy (which LEIs, role, and
//! credential schema grant submission rights) and the scheduling knobs for
//! the verification worker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engagement context role required for report submission.
pub const SUBMITTER_ROLE: &str = "EBA Document Submitter";

/// JSON Schema SAID of the vLEI Engagement Context Role credential.
pub const ECR_SCHEMA_SAID: &str = "EEy9PkikFcANV1l7EHukCeXqrzT1hNZjGlUk7wuMO5jw";

/// Service configuration. Deserializable so deployments can load it from a
/// JSON document; unset fields take the defaults below.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// LEIs whose credential holders are accepted. Must not be empty.
    pub allowed_leis: Vec<String>,

    /// Engagement context role a credential must carry.
    pub submitter_role: String,

    /// Credential schema SAID accepted for authorization.
    pub ecr_schema: String,

    /// Number of concurrent verification workers.
    pub workers: usize,

    /// Upper bound on a single oracle consultation, in milliseconds.
    /// Exceeding it yields an unresolvable outcome, not a hang.
    pub oracle_timeout_ms: u64,

    /// Attempts per verification cycle before work is returned to the queue.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between attempts, in milliseconds.
    pub retry_base_ms: u64,

    /// Cap on the backoff delay, in milliseconds.
    pub retry_max_ms: u64,

    /// Interval of the revocation sweep and stale-work rescan, in
    /// milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            allowed_leis: Vec::new(),
            submitter_role: SUBMITTER_ROLE.to_string(),
            ecr_schema: ECR_SCHEMA_SAID.to_string(),
            workers: 4,
            oracle_timeout_ms: 15_000,
            retry_attempts: 5,
            retry_base_ms: 1_000,
            retry_max_ms: 30_000,
            sweep_interval_ms: 30_000,
        }
    }
}

impl VerifierConfig {
    /// Load configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the document cannot be parsed or
    /// fails validation.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(data)
            .map_err(|e| Error::Configuration(format!("cannot parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when no LEIs are configured or the
    /// scheduling knobs are degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.allowed_leis.is_empty() {
            return Err(Error::Configuration("no LEIs available to accept".into()));
        }
        if self.workers == 0 {
            return Err(Error::Configuration("worker pool size must be non-zero".into()));
        }
        if self.retry_attempts == 0 {
            return Err(Error::Configuration("retry attempts must be non-zero".into()));
        }
        Ok(())
    }

    /// Whether a credential's LEI is in the allowlist.
    #[must_use]
    pub fn lei_allowed(&self, lei: &str) -> bool {
        self.allowed_leis.iter().any(|l| l == lei)
    }

    pub(crate) fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Backoff delay before retry `attempt` (zero-based), doubling from the
    /// base and capped.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self.retry_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.retry_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_rejected() {
        let config = VerifierConfig::default();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn from_json_applies_defaults() {
        let config = VerifierConfig::from_json(br#"{"allowed_leis": ["254900OPPU84GM83MG36"]}"#)
            .expect("config is valid");

        assert_eq!(config.submitter_role, SUBMITTER_ROLE);
        assert_eq!(config.ecr_schema, ECR_SCHEMA_SAID);
        assert!(config.lei_allowed("254900OPPU84GM83MG36"));
        assert!(!config.lei_allowed("5493001KJTIIGC8Y1R17"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = VerifierConfig {
            retry_base_ms: 100,
            retry_max_ms: 350,
            ..VerifierConfig::default()
        };

        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(350));
        assert_eq!(config.backoff(10), Duration::from_millis(350));
    }
}
