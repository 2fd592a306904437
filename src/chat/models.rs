// Request and response records of the chat pipeline

use serde::{Deserialize, Serialize};

use crate::database::{MetadataFilter, QueryMatch};

/// Per-request sampling overrides; unset fields use the configured defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParametersOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatQueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_filters: Option<MetadataFilter>,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ChatParametersOverride>,
}

impl ChatQueryRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.metadata_filters = Some(filters);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_overrides(mut self, overrides: ChatParametersOverride) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

/// Stage timings in milliseconds plus the token count reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub embedding_ms: f64,
    pub retrieval_ms: f64,
    pub generation_ms: f64,
    /// Wall-clock span of the whole call; not the sum of the stage timers
    pub total_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub conversation_id: String,
    pub answer: String,
    /// Matches used as context, in store order
    pub sources: Vec<QueryMatch>,
    pub usage: UsageMetrics,
    pub request_id: String,
}
