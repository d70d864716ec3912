//! Assessment stages
//!
//! A stage is one assessment technique: a free local computation, a paid
//! remote scoring call, a paid remote semantic analysis. Each implements
//! [`CapabilityStage`] and is stateless per call, so one instance serves every
//! concurrent worker.
//!
//! Stages never fail for a low score. `process` returns `Err` only for
//! infrastructure failures, and the error carries its classification and the
//! cost already incurred.

pub mod http;
pub mod local;
pub mod registry;
pub mod remote;

pub use http::HttpScorer;
pub use local::LocalQualityStage;
pub use registry::{StageKind, StageRegistry};
pub use remote::{RemoteStage, ScoreResponse, Scorer};

use crate::asset::Asset;
use crate::config::StageConfig;
use crate::report::StageResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which way a stage's score scale runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreDirection {
    /// Higher is better: passes when score >= threshold
    Ascending,
    /// Lower is better: passes when score <= threshold
    Descending,
}

/// Pass threshold, inclusive at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    pub direction: ScoreDirection,
}

impl Threshold {
    pub fn ascending(value: f64) -> Self {
        Self {
            value,
            direction: ScoreDirection::Ascending,
        }
    }

    pub fn descending(value: f64) -> Self {
        Self {
            value,
            direction: ScoreDirection::Descending,
        }
    }

    /// Whether `score` meets the threshold. NaN never passes.
    pub fn passes(&self, score: f64) -> bool {
        match self.direction {
            ScoreDirection::Ascending => score >= self.value,
            ScoreDirection::Descending => score <= self.value,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            ScoreDirection::Ascending => write!(f, ">= {}", self.value),
            ScoreDirection::Descending => write!(f, "<= {}", self.value),
        }
    }
}

/// Static description of a configured stage
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub id: String,
    pub kind: StageKind,
    /// Nominal cost per call, used for budget pre-checks
    pub cost_per_call: f64,
    pub threshold: Threshold,
    /// Failure stops the asset's pipeline; optional stages degrade instead
    pub required: bool,
    pub timeout: Option<Duration>,
}

impl StageSpec {
    /// Build from a configured stage, applying the pipeline default timeout
    pub fn from_config(config: &StageConfig, default_timeout: Duration) -> Self {
        Self {
            id: config.id.clone(),
            kind: config.kind,
            cost_per_call: config.cost_per_call,
            threshold: Threshold {
                value: config.threshold,
                direction: config.direction(),
            },
            required: config.required,
            timeout: Some(
                config
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_timeout),
            ),
        }
    }

    /// Whether calls to this stage spend budget
    pub fn is_paid(&self) -> bool {
        self.cost_per_call > 0.0
    }
}

/// Successful stage output
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub score: f64,
    /// Technique-specific structured payload
    pub metadata: serde_json::Value,
    /// Actual cost of the call
    pub cost: f64,
}

impl StageOutcome {
    pub fn free(score: f64, metadata: serde_json::Value) -> Self {
        Self {
            score,
            metadata,
            cost: 0.0,
        }
    }
}

/// Classification of a capability failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network failure or provider overload; retryable by a later run
    Transient,
    /// The call did not finish within the stage timeout
    Timeout,
    /// Credentials rejected; the stage is disabled for the rest of the run
    Authentication,
    /// The provider rejected this asset
    InvalidInput,
    /// Anything else (malformed response, local IO failure)
    Internal,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::InvalidInput => "invalid input",
            Self::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Infrastructure failure raised by a stage
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error: {message}")]
pub struct CapabilityError {
    pub kind: ErrorKind,
    pub message: String,
    /// Spend already incurred when the call reached the provider
    pub cost: f64,
    /// The provider accepted the request before the failure
    pub delivered: bool,
}

impl CapabilityError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cost: 0.0,
            delivered: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the spend incurred before the failure
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Mark a failure that happened after the provider accepted the call
    pub fn delivered(mut self) -> Self {
        self.delivered = true;
        self
    }

    /// Check if a later run could succeed
    pub fn is_retryable(&self) -> bool {
        self.kind.is_transient()
    }
}

/// One assessment technique
///
/// Implementations must be safe to call concurrently across assets and must
/// not throw for ordinary low-score outcomes.
#[async_trait]
pub trait CapabilityStage: Send + Sync {
    /// Configured identity, cost, threshold and requirement
    fn spec(&self) -> &StageSpec;

    /// Fast rejection for unsupported media; never spends budget
    fn validate_input(&self, asset: &Asset) -> bool;

    /// Run the technique. `prior` holds earlier results for this asset in
    /// execution order.
    async fn process(
        &self,
        asset: &Asset,
        prior: &[StageResult],
    ) -> Result<StageOutcome, CapabilityError>;

    fn id(&self) -> &str {
        &self.spec().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_inclusive_at_boundary() {
        assert!(Threshold::ascending(40.0).passes(40.0));
        assert!(!Threshold::ascending(40.0).passes(39.999));
        assert!(Threshold::descending(0.3).passes(0.3));
        assert!(!Threshold::descending(0.3).passes(0.31));
    }

    #[test]
    fn threshold_rejects_nan() {
        assert!(!Threshold::ascending(0.0).passes(f64::NAN));
        assert!(!Threshold::descending(1.0).passes(f64::NAN));
    }

    #[test]
    fn threshold_display() {
        assert_eq!(Threshold::ascending(0.7).to_string(), ">= 0.7");
        assert_eq!(Threshold::descending(2.0).to_string(), "<= 2");
    }

    #[test]
    fn capability_error_classification() {
        let err = CapabilityError::timeout("no reply in 30s").with_cost(0.02);
        assert!(err.is_retryable());
        assert_eq!(err.cost, 0.02);
        assert_eq!(err.to_string(), "timeout error: no reply in 30s");
        assert!(!CapabilityError::authentication("401").is_retryable());
    }

    #[test]
    fn spec_from_config_uses_default_timeout() {
        let config: crate::config::Config = toml::from_str(
            r#"
            [[stages]]
            id = "semantic"
            kind = "semantic_analysis"
            cost_per_call = 0.05
            threshold = 0.3
            endpoint = "https://semantic.example"
            "#,
        )
        .unwrap();

        let spec = StageSpec::from_config(&config.stages[0], Duration::from_secs(12));
        assert_eq!(spec.timeout, Some(Duration::from_secs(12)));
        assert_eq!(spec.threshold, Threshold::descending(0.3));
        assert!(spec.is_paid());
        assert!(spec.required);
    }
}
