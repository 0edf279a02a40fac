//! Enrichment wire protocol (JSON, camelCase)

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request body POSTed to a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRequest {
    /// Search query
    pub query: String,
    /// Caller session
    pub session_id: String,
    /// Per-source options
    #[serde(default)]
    pub options: RequestOptions,
}

/// Request options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    /// Maximum items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Sort order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    /// Recency window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,
    /// Source-specific filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_filters: Vec<String>,
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    /// Data present
    Success,
    /// Source-side failure
    Error,
    /// Throttled; see `retryAfterMs`
    RateLimited,
}

/// Response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResponse {
    /// Status
    pub status: ResponseStatus,
    /// Payload for successful responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    /// Response metadata
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

/// Response payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// Items found
    #[serde(default)]
    pub items: Vec<EnrichmentItem>,
    /// Total matches at the source
    #[serde(default)]
    pub total_count: usize,
}

/// Response metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Served from the source's cache
    #[serde(default)]
    pub cached: bool,
    /// Source-side processing time
    #[serde(default)]
    pub duration_ms: u64,
    /// Rate-limit hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One enrichment result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentItem {
    /// Title
    pub title: String,
    /// Link
    #[serde(default)]
    pub url: Option<String>,
    /// Excerpt
    #[serde(default)]
    pub snippet: Option<String>,
    /// Relevance
    #[serde(default)]
    pub score: Option<f64>,
    /// Producing source, filled in by the bridge when absent
    #[serde(default)]
    pub source: Option<String>,
}

impl EnrichmentItem {
    /// Item with only a title
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            snippet: None,
            score: None,
            source: None,
        }
    }
}

impl EnrichmentResponse {
    /// Successful response carrying `items`
    #[must_use]
    pub fn success(items: Vec<EnrichmentItem>) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Some(ResponseData {
                total_count: items.len(),
                items,
            }),
            metadata: ResponseMetadata::default(),
        }
    }

    /// Map the status to items or a classified error
    ///
    /// # Errors
    /// [`SourceError::Remote`] for `error`, [`SourceError::RateLimited`] for
    /// `rateLimited`, [`SourceError::InvalidResponse`] for `success` without
    /// data.
    pub fn into_items(self) -> Result<Vec<EnrichmentItem>, SourceError> {
        match self.status {
            ResponseStatus::Success => self
                .data
                .map(|d| d.items)
                .ok_or_else(|| SourceError::InvalidResponse("success without data".into())),
            ResponseStatus::Error => Err(SourceError::Remote(
                self.metadata
                    .message
                    .unwrap_or_else(|| "unspecified error".to_string()),
            )),
            ResponseStatus::RateLimited => Err(SourceError::RateLimited {
                retry_after: self.metadata.retry_after_ms.map(Duration::from_millis),
            }),
        }
    }
}
