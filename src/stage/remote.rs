//! Remote scoring stages
//!
//! The scoring algorithms live behind an external [`Scorer`]; this stage only
//! maps its `{score, metadata, cost}` response to a stage outcome.

use crate::asset::Asset;
use crate::report::StageResult;
use crate::stage::{CapabilityError, CapabilityStage, ErrorKind, StageOutcome, StageSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Response returned by an external scoring capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub score: f64,

    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Billed cost; the stage's nominal cost is assumed when absent
    #[serde(default)]
    pub cost: Option<f64>,
}

/// External scoring capability
///
/// The core never knows how the score is computed. Implementations classify
/// their failures instead of swallowing them.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, asset: &Asset) -> Result<ScoreResponse, CapabilityError>;
}

/// Stage backed by a remote scorer
pub struct RemoteStage {
    spec: StageSpec,
    scorer: Arc<dyn Scorer>,
}

impl RemoteStage {
    pub fn new(spec: StageSpec, scorer: Arc<dyn Scorer>) -> Self {
        Self { spec, scorer }
    }
}

#[async_trait]
impl CapabilityStage for RemoteStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn validate_input(&self, asset: &Asset) -> bool {
        asset.is_media() && asset.size > 0
    }

    async fn process(
        &self,
        asset: &Asset,
        prior: &[StageResult],
    ) -> Result<StageOutcome, CapabilityError> {
        debug!(
            "Stage {} scoring {} after {} prior result(s)",
            self.spec.id,
            asset.short_hash(),
            prior.len()
        );

        let response = self.scorer.score(asset).await.map_err(|err| {
            // Timed-out and delivered calls are assumed billed
            if (err.kind == ErrorKind::Timeout || err.delivered) && err.cost == 0.0 {
                err.with_cost(self.spec.cost_per_call)
            } else {
                err
            }
        })?;

        let cost = response
            .cost
            .filter(|c| c.is_finite() && *c >= 0.0)
            .unwrap_or(self.spec.cost_per_call);

        if !response.score.is_finite() {
            return Err(CapabilityError::internal(format!(
                "scorer returned non-finite score {}",
                response.score
            ))
            .with_cost(cost));
        }

        Ok(StageOutcome {
            score: response.score,
            metadata: response.metadata,
            cost,
        })
    }
}
