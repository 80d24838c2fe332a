//! Engine configuration and agent profiles.
//!
//! Process-wide tunables (guardrail thresholds, ponder cap, adaptation
//! ceiling, database paths, loop cadences) live in [`EngineConfig`] with
//! sane defaults and environment overrides. The agent *profile* is a YAML
//! file selecting the domain-specific DMA, the display name, and action
//! prompt overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading configuration or profiles.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// Profile file could not be read.
    #[error("failed to read profile {path}: {source}")]
    #[diagnostic(code(praxis::config::profile_io))]
    ProfileIo {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Profile file was not valid YAML for the profile schema.
    #[error("invalid profile {path}: {source}")]
    #[diagnostic(
        code(praxis::config::profile_parse),
        help("Check the profile YAML against the AgentProfile schema.")
    )]
    ProfileParse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// An environment override had an unparsable value.
    #[error("invalid value for {var}: {value}")]
    #[diagnostic(code(praxis::config::env_override))]
    InvalidEnvValue {
        /// Environment variable name.
        var: &'static str,
        /// Rejected value.
        value: String,
    },
}

// ============================================================================
// Guardrail thresholds
// ============================================================================

/// Thresholds applied by the guardrail stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Maximum tolerated entropy of communicative output. Default 0.40.
    pub entropy_threshold: f64,
    /// Minimum required coherence of communicative output. Default 0.80.
    pub coherence_threshold: f64,
    /// Entropy-reduction ratio at or above which the optimization veto
    /// fires. Default 10.0.
    pub optimization_veto_ratio: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            entropy_threshold: 0.40,
            coherence_threshold: 0.80,
            optimization_veto_ratio: 10.0,
        }
    }
}

// ============================================================================
// Adaptation configuration
// ============================================================================

/// Bounds and cadence of the self-adaptation loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Ceiling on cumulative weighted variance from the identity baseline,
    /// as a percentage. Default 20.0.
    pub variance_ceiling_percent: f64,
    /// Hours between adaptation cycles. Default 6.
    pub cycle_interval_hours: u64,
    /// Settle period before measuring a change's effect, in minutes.
    /// Default 30.
    pub settle_minutes: u64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            variance_ceiling_percent: 20.0,
            cycle_interval_hours: 6,
            settle_minutes: 30,
        }
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded retry policy for transient external failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first. Default 3.
    pub max_attempts: u32,
    /// Base delay before the first retry, in milliseconds. Default 250.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds. Default 5000.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Base delay as a [`Duration`].
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a [`Duration`].
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ============================================================================
// Engine configuration
// ============================================================================

/// Process-wide engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the engine database (tasks, thoughts, graph memory).
    pub engine_db: PathBuf,
    /// Path of the secrets database.
    pub secrets_db: PathBuf,
    /// Path of the audit database.
    pub audit_db: PathBuf,
    /// Directory of sequential `.sql` migrations for the engine database.
    pub migrations_dir: PathBuf,
    /// Maximum Ponder re-queues per thought. Default 7.
    pub ponder_cap: u32,
    /// Maximum thought depth along a parent chain. Default 7.
    pub max_thought_depth: u32,
    /// Guardrail thresholds.
    pub guardrails: GuardrailConfig,
    /// Adaptation loop bounds and cadence.
    pub adaptation: AdaptationConfig,
    /// Retry policy for transient external failures.
    pub retry: RetryConfig,
    /// Deadline applied to each external call, in seconds. Default 30.
    pub external_call_timeout_secs: u64,
    /// Default token budget for structured LLM calls.
    pub llm_max_tokens: u32,
    /// Default sampling temperature for structured LLM calls.
    pub llm_temperature: f32,
    /// Channel deferrals are escalated to. When unset, the transport's
    /// home channel is used.
    pub wa_channel_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_db: PathBuf::from("praxis_engine.db"),
            secrets_db: PathBuf::from("praxis_secrets.db"),
            audit_db: PathBuf::from("praxis_audit.db"),
            migrations_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations")),
            ponder_cap: 7,
            max_thought_depth: 7,
            guardrails: GuardrailConfig::default(),
            adaptation: AdaptationConfig::default(),
            retry: RetryConfig::default(),
            external_call_timeout_secs: 30,
            llm_max_tokens: 1024,
            llm_temperature: 0.0,
            wa_channel_id: None,
        }
    }
}

impl EngineConfig {
    /// External call deadline as a [`Duration`].
    #[must_use]
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }

    /// Load defaults, then apply environment overrides.
    ///
    /// Reads `.env` via dotenvy first (missing file is fine), then honors:
    /// `PRAXIS_ENGINE_DB`, `PRAXIS_SECRETS_DB`, `PRAXIS_AUDIT_DB`,
    /// `PRAXIS_MIGRATIONS_DIR`, `PRAXIS_PONDER_CAP`,
    /// `PRAXIS_ENTROPY_THRESHOLD`, `PRAXIS_COHERENCE_THRESHOLD`,
    /// `PRAXIS_VARIANCE_CEILING`, `PRAXIS_WA_CHANNEL`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvValue`] if a numeric override fails
    /// to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PRAXIS_ENGINE_DB") {
            config.engine_db = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("PRAXIS_SECRETS_DB") {
            config.secrets_db = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("PRAXIS_AUDIT_DB") {
            config.audit_db = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("PRAXIS_MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("PRAXIS_PONDER_CAP") {
            config.ponder_cap = parse_env("PRAXIS_PONDER_CAP", &value)?;
        }
        if let Ok(value) = std::env::var("PRAXIS_ENTROPY_THRESHOLD") {
            config.guardrails.entropy_threshold = parse_env("PRAXIS_ENTROPY_THRESHOLD", &value)?;
        }
        if let Ok(value) = std::env::var("PRAXIS_COHERENCE_THRESHOLD") {
            config.guardrails.coherence_threshold =
                parse_env("PRAXIS_COHERENCE_THRESHOLD", &value)?;
        }
        if let Ok(value) = std::env::var("PRAXIS_VARIANCE_CEILING") {
            config.adaptation.variance_ceiling_percent =
                parse_env("PRAXIS_VARIANCE_CEILING", &value)?;
        }
        if let Ok(channel) = std::env::var("PRAXIS_WA_CHANNEL") {
            config.wa_channel_id = Some(channel);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvValue {
        var,
        value: value.to_string(),
    })
}

// ============================================================================
// Agent profile
// ============================================================================

/// Selection of the domain-specific DMA and its construction arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainDmaSpec {
    /// Registered DMA kind name (e.g. `"community"`, `"support"`,
    /// `"research"`).
    pub kind: String,
    /// Free-form construction arguments interpreted by the DMA constructor.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// An agent profile loaded at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Display name of the agent.
    pub name: String,
    /// Domain-specific DMA selection.
    pub domain_dma: DomainDmaSpec,
    /// Per-action system-prompt overrides, keyed by action name.
    #[serde(default)]
    pub prompt_overrides: HashMap<String, String>,
}

impl AgentProfile {
    /// Load a profile from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ProfileIo`] or [`ConfigError::ProfileParse`].
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ProfileIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::ProfileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// A minimal default profile used when no file is supplied.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            name: "praxis".to_string(),
            domain_dma: DomainDmaSpec {
                kind: "community".to_string(),
                args: serde_json::Value::Null,
            },
            prompt_overrides: HashMap::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specified_values() {
        let config = EngineConfig::default();
        assert!((config.guardrails.entropy_threshold - 0.40).abs() < f64::EPSILON);
        assert!((config.guardrails.coherence_threshold - 0.80).abs() < f64::EPSILON);
        assert!((config.guardrails.optimization_veto_ratio - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.ponder_cap, 7);
        assert!((config.adaptation.variance_ceiling_percent - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn profile_parses_from_yaml() {
        let yaml = r#"
name: atlas
domain_dma:
  kind: support
  args:
    product: widgets
prompt_overrides:
  speak: "Answer briefly."
"#;
        let profile: AgentProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.name, "atlas");
        assert_eq!(profile.domain_dma.kind, "support");
        assert_eq!(profile.prompt_overrides["speak"], "Answer briefly.");
    }
}
