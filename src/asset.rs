//! Assets flowing through the pipeline
//!
//! An asset is a media file identified by its content hash. The path is kept
//! for reading bytes and for diagnostics only.

use crate::error::{MediagateError, MediagateResult};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Broad media family detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Other,
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Detected media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaType {
    pub mime: &'static str,
    pub extension: &'static str,
    pub category: MediaCategory,
}

impl MediaType {
    fn from_infer(kind: infer::Type) -> Self {
        let category = match kind.matcher_type() {
            infer::MatcherType::Image => MediaCategory::Image,
            infer::MatcherType::Video => MediaCategory::Video,
            infer::MatcherType::Audio => MediaCategory::Audio,
            _ => MediaCategory::Other,
        };
        Self {
            mime: kind.mime_type(),
            extension: kind.extension(),
            category,
        }
    }

    /// Whether this is image, video or audio content
    pub fn is_media(&self) -> bool {
        !matches!(self.category, MediaCategory::Other)
    }
}

/// A file under assessment
#[derive(Debug, Clone)]
pub struct Asset {
    /// Where the bytes live (diagnostic, never identity)
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file bytes
    pub content_hash: String,
    /// File size in bytes
    pub size: u64,
    /// Media type sniffed from the first bytes, if recognised
    pub media: Option<MediaType>,
}

impl Asset {
    /// Build an asset from an already computed identity, sniffing its media type
    pub async fn inspect(path: &Path, content_hash: String, size: u64) -> MediagateResult<Self> {
        let sniff_path = path.to_path_buf();
        let media = tokio::task::spawn_blocking(move || infer::get_from_path(&sniff_path))
            .await
            .map_err(|e| MediagateError::Internal(format!("media sniffing task failed: {}", e)))?
            .map_err(|e| MediagateError::io(format!("sniffing {}", path.display()), e))?
            .map(MediaType::from_infer);

        Ok(Self {
            path: path.to_path_buf(),
            content_hash,
            size,
            media,
        })
    }

    /// Short hash prefix for log lines
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..self.content_hash.len().min(12)]
    }

    /// Whether the asset was recognised as image, video or audio
    pub fn is_media(&self) -> bool {
        self.media.is_some_and(|m| m.is_media())
    }
}
