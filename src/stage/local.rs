//! Free local quality check
//!
//! Scores a file 0-100 from the Shannon entropy of a bounded byte sample.
//! Encoded media sits close to 8 bits per byte; blank frames, silent tracks
//! and truncated generator output fall far below. Runs before anything paid.

use crate::asset::Asset;
use crate::report::StageResult;
use crate::stage::{CapabilityError, CapabilityStage, StageOutcome, StageSpec};
use async_trait::async_trait;
use serde_json::json;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Files smaller than this score zero by default
pub const DEFAULT_MIN_BYTES: u64 = 1024;

/// Bytes read for the entropy estimate by default
pub const DEFAULT_SAMPLE_BYTES: u64 = 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Local entropy-based quality stage
pub struct LocalQualityStage {
    spec: StageSpec,
    min_bytes: u64,
    sample_bytes: u64,
}

impl LocalQualityStage {
    pub fn new(spec: StageSpec) -> Self {
        Self {
            spec,
            min_bytes: DEFAULT_MIN_BYTES,
            sample_bytes: DEFAULT_SAMPLE_BYTES,
        }
    }

    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn with_sample_bytes(mut self, sample_bytes: u64) -> Self {
        self.sample_bytes = sample_bytes.max(1);
        self
    }
}

/// Byte histogram of up to `limit` leading bytes
fn sample_histogram(path: &Path, limit: u64) -> std::io::Result<([u64; 256], u64)> {
    let mut counts = [0u64; 256];
    let mut total = 0u64;
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; READ_CHUNK];

    while total < limit {
        let want = READ_CHUNK.min((limit - total) as usize);
        let read = file.read(&mut buffer[..want])?;
        if read == 0 {
            break;
        }
        for byte in &buffer[..read] {
            counts[*byte as usize] += 1;
        }
        total += read as u64;
    }

    Ok((counts, total))
}

/// Shannon entropy in bits per byte (0.0 to 8.0)
pub fn shannon_entropy(counts: &[u64; 256], total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[async_trait]
impl CapabilityStage for LocalQualityStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn validate_input(&self, asset: &Asset) -> bool {
        asset.is_media()
    }

    async fn process(
        &self,
        asset: &Asset,
        _prior: &[StageResult],
    ) -> Result<StageOutcome, CapabilityError> {
        let mime = asset.media.map(|m| m.mime).unwrap_or("unknown");

        if asset.size < self.min_bytes {
            return Ok(StageOutcome::free(
                0.0,
                json!({
                    "mime": mime,
                    "reason": "truncated",
                    "min_bytes": self.min_bytes,
                }),
            ));
        }

        let path = asset.path.clone();
        let limit = self.sample_bytes;
        let (counts, sampled) = tokio::task::spawn_blocking(move || sample_histogram(&path, limit))
            .await
            .map_err(|e| CapabilityError::internal(format!("sampling task failed: {}", e)))?
            .map_err(|e| {
                CapabilityError::internal(format!("reading {}: {}", asset.path.display(), e))
            })?;

        let entropy = shannon_entropy(&counts, sampled);
        let score = (entropy / 8.0 * 100.0 * 100.0).round() / 100.0;

        Ok(StageOutcome::free(
            score,
            json!({
                "mime": mime,
                "entropy_bits": (entropy * 1000.0).round() / 1000.0,
                "sampled_bytes": sampled,
            }),
        ))
    }
}
