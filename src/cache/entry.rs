//! Cache entry schema and migrations
//!
//! Entries are JSON documents stored at `entries/<hash[0:2]>/<hash>.json`.
//! The `version` field is read first: current entries deserialize directly,
//! version 1 entries are mapped field by field, anything else is a miss.

use crate::report::{StageResult, StageStatus};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 2;

/// Persisted analysis of one content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub content_hash: String,
    pub file_size: u64,
    /// Path at the time of the last write, diagnostic only
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    /// No stage result would change on a re-run
    pub complete: bool,
    /// Results keyed by stage id
    pub stages: BTreeMap<String, StageResult>,
}

impl CacheEntry {
    /// A fresh entry for a content hash
    pub fn new(
        content_hash: &str,
        file_size: u64,
        path: &Path,
        complete: bool,
        results: impl IntoIterator<Item = StageResult>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: SCHEMA_VERSION,
            content_hash: content_hash.to_string(),
            file_size,
            path: path.to_path_buf(),
            created_at: now,
            last_accessed: now,
            access_count: 1,
            complete,
            stages: results
                .into_iter()
                .map(|r| (r.stage_id.clone(), r))
                .collect(),
        }
    }

    /// Recorded result for a stage
    pub fn stage(&self, stage_id: &str) -> Option<&StageResult> {
        self.stages.get(stage_id)
    }
}

/// A successfully decoded entry
#[derive(Debug)]
pub enum Decoded {
    Current(CacheEntry),
    /// Decoded from an older schema; should be rewritten
    Migrated(CacheEntry),
}

impl Decoded {
    pub fn into_entry(self) -> CacheEntry {
        match self {
            Self::Current(entry) | Self::Migrated(entry) => entry,
        }
    }
}

/// Why an entry could not be used
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Unparsable or structurally wrong
    Corrupt(String),
    /// Written by an unknown schema version
    Incompatible(u64),
}

/// Decode entry bytes of any known schema version
pub fn decode(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| DecodeError::Corrupt("missing version".to_string()))?;

    match version {
        2 => serde_json::from_value(value)
            .map(Decoded::Current)
            .map_err(|e| DecodeError::Corrupt(e.to_string())),
        1 => migrate_v1_to_v2(&value)
            .map(Decoded::Migrated)
            .map_err(DecodeError::Corrupt),
        other => Err(DecodeError::Incompatible(other)),
    }
}

/// Map a version 1 entry onto the current schema.
///
/// | v1                      | v2                          |
/// |-------------------------|-----------------------------|
/// | `hash`                  | `content_hash`              |
/// | `size`                  | `file_size`                 |
/// | `path`                  | `path`                      |
/// | `created` (unix secs)   | `created_at` (RFC 3339)     |
/// | `accessed` (unix secs)  | `last_accessed` (RFC 3339)  |
/// | `hits`                  | `access_count`              |
/// | `results[]` by `stage`  | `stages{}` by stage id      |
///
/// Version 1 never recorded why a run ended, so migrated entries are
/// marked incomplete and their scored results are reused on the next run.
pub fn migrate_v1_to_v2(value: &Value) -> Result<CacheEntry, String> {
    let field = |name: &str| value.get(name).ok_or_else(|| format!("v1 entry missing '{}'", name));

    let content_hash = field("hash")?
        .as_str()
        .ok_or("v1 'hash' is not a string")?
        .to_string();
    let file_size = field("size")?.as_u64().ok_or("v1 'size' is not an integer")?;
    let path = PathBuf::from(value.get("path").and_then(Value::as_str).unwrap_or_default());
    let created_at = unix_seconds(field("created")?)?;
    let last_accessed = match value.get("accessed") {
        Some(v) => unix_seconds(v)?,
        None => created_at,
    };
    let access_count = value.get("hits").and_then(Value::as_u64).unwrap_or(1);

    let results = field("results")?
        .as_array()
        .ok_or("v1 'results' is not a list")?;

    let mut stages = BTreeMap::new();
    for item in results {
        let result = migrate_v1_result(item)?;
        stages.insert(result.stage_id.clone(), result);
    }

    Ok(CacheEntry {
        version: SCHEMA_VERSION,
        content_hash,
        file_size,
        path,
        created_at,
        last_accessed,
        access_count,
        complete: false,
        stages,
    })
}

fn migrate_v1_result(item: &Value) -> Result<StageResult, String> {
    let stage_id = item
        .get("stage")
        .and_then(Value::as_str)
        .ok_or("v1 result missing 'stage'")?
        .to_string();
    let error = item.get("error").and_then(Value::as_str).map(str::to_string);
    let passed = item.get("passed").and_then(Value::as_bool).unwrap_or(false);
    let status = match (&error, passed) {
        (Some(_), _) => StageStatus::Errored,
        (None, true) => StageStatus::Passed,
        (None, false) => StageStatus::Failed,
    };
    let score = item.get("score").and_then(Value::as_f64);
    if status.is_scored() && score.is_none() {
        return Err(format!("v1 result for '{}' has no score", stage_id));
    }

    Ok(StageResult {
        stage_id,
        status,
        passed: status == StageStatus::Passed,
        score,
        metadata: item.get("metadata").cloned().unwrap_or(Value::Null),
        cost: item
            .get("cost")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite() && *c >= 0.0)
            .unwrap_or(0.0),
        duration_ms: item.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        error_kind: None,
        error,
    })
}

fn unix_seconds(value: &Value) -> Result<DateTime<Utc>, String> {
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or("v1 timestamp is not a number")?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| format!("v1 timestamp {} out of range", secs))
}
