//! The tunable configuration vector and its variance metric.
//!
//! Variance is the weighted distance of the current configuration from the
//! identity baseline, expressed as a percentage. Each field is normalized
//! by its admissible range so one tunable cannot dominate the metric.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The typed configuration vector the adaptation controller may modify.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TunableConfig {
    /// Guardrail entropy threshold.
    pub entropy_threshold: f64,
    /// Guardrail coherence threshold.
    pub coherence_threshold: f64,
    /// Optimization-veto ratio.
    pub optimization_veto_ratio: f64,
    /// Ponder cap.
    pub ponder_cap: u32,
    /// Transient-retry attempt budget.
    pub retry_max_attempts: u32,
    /// Structured-call sampling temperature.
    pub llm_temperature: f32,
}

impl TunableConfig {
    /// Dotted paths of every tunable field, in variance order.
    pub const PATHS: [&'static str; 6] = [
        "guardrails.entropy_threshold",
        "guardrails.coherence_threshold",
        "guardrails.optimization_veto_ratio",
        "scheduler.ponder_cap",
        "retry.max_attempts",
        "llm.temperature",
    ];

    /// Read a field by dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        match path {
            "guardrails.entropy_threshold" => Some(Value::from(self.entropy_threshold)),
            "guardrails.coherence_threshold" => Some(Value::from(self.coherence_threshold)),
            "guardrails.optimization_veto_ratio" => Some(Value::from(self.optimization_veto_ratio)),
            "scheduler.ponder_cap" => Some(Value::from(self.ponder_cap)),
            "retry.max_attempts" => Some(Value::from(self.retry_max_attempts)),
            "llm.temperature" => Some(Value::from(self.llm_temperature)),
            _ => None,
        }
    }

    /// Write a field by dotted path. Unknown paths and wrong-typed values
    /// are rejected.
    pub fn set(&mut self, path: &str, value: &Value) -> Result<(), String> {
        match path {
            "guardrails.entropy_threshold" => {
                self.entropy_threshold = as_f64(value)?;
            }
            "guardrails.coherence_threshold" => {
                self.coherence_threshold = as_f64(value)?;
            }
            "guardrails.optimization_veto_ratio" => {
                self.optimization_veto_ratio = as_f64(value)?;
            }
            "scheduler.ponder_cap" => {
                self.ponder_cap = as_u32(value)?;
            }
            "retry.max_attempts" => {
                self.retry_max_attempts = as_u32(value)?;
            }
            "llm.temperature" => {
                self.llm_temperature = as_f64(value)? as f32;
            }
            other => return Err(format!("unknown tunable path: {other}")),
        }
        Ok(())
    }

    /// Weighted variance from `baseline`, in percent.
    ///
    /// Every field contributes `|current - baseline| / range`, weighted,
    /// and the total is scaled to a percentage of the weight budget.
    #[must_use]
    pub fn variance_from(&self, baseline: &TunableConfig) -> f64 {
        // (normalized delta, weight) per field. Guardrail thresholds weigh
        // double: they bound the agent's outward behavior.
        let contributions = [
            (
                (self.entropy_threshold - baseline.entropy_threshold).abs() / 1.0,
                2.0,
            ),
            (
                (self.coherence_threshold - baseline.coherence_threshold).abs() / 1.0,
                2.0,
            ),
            (
                (self.optimization_veto_ratio - baseline.optimization_veto_ratio).abs() / 20.0,
                1.5,
            ),
            (
                f64::from(self.ponder_cap.abs_diff(baseline.ponder_cap)) / 10.0,
                1.0,
            ),
            (
                f64::from(self.retry_max_attempts.abs_diff(baseline.retry_max_attempts)) / 5.0,
                0.5,
            ),
            (
                f64::from((self.llm_temperature - baseline.llm_temperature).abs()) / 2.0,
                0.5,
            ),
        ];

        let weight_total: f64 = contributions.iter().map(|(_, weight)| weight).sum();
        let weighted: f64 = contributions
            .iter()
            .map(|(delta, weight)| delta.min(1.0) * weight)
            .sum();
        weighted / weight_total * 100.0
    }
}

fn as_f64(value: &Value) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("expected a number, got {value}"))
}

fn as_u32(value: &Value) -> Result<u32, String> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("expected a small unsigned integer, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> TunableConfig {
        TunableConfig {
            entropy_threshold: 0.40,
            coherence_threshold: 0.80,
            optimization_veto_ratio: 10.0,
            ponder_cap: 7,
            retry_max_attempts: 3,
            llm_temperature: 0.0,
        }
    }

    #[test]
    fn identical_configs_have_zero_variance() {
        let config = baseline();
        assert!(config.variance_from(&baseline()) < f64::EPSILON);
    }

    #[test]
    fn variance_grows_with_distance() {
        let mut near = baseline();
        near.coherence_threshold = 0.78;
        let mut far = baseline();
        far.coherence_threshold = 0.60;

        let near_variance = near.variance_from(&baseline());
        let far_variance = far.variance_from(&baseline());
        assert!(near_variance > 0.0);
        assert!(far_variance > near_variance);
    }

    #[test]
    fn set_and_get_round_trip_every_path() {
        let mut config = baseline();
        for path in TunableConfig::PATHS {
            let value = config.get(path).unwrap();
            config.set(path, &value).unwrap();
        }
        assert_eq!(config, baseline());
    }

    #[test]
    fn unknown_path_is_rejected() {
        let mut config = baseline();
        assert!(config.set("guardrails.nope", &Value::from(1.0)).is_err());
    }
}
