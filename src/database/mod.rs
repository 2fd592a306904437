// Database module
// Vector store capability, the records it exchanges, and the Chroma implementation

pub mod chroma;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::embeddings::EmbeddingVector;
use crate::http::HttpError;

pub use chroma::ChromaStore;

/// Scalar metadata value as stored alongside a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Metadata keys are kept sorted so rendering and filter clauses are deterministic
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Document owned by the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
}

/// One nearest-neighbour hit, in the order the store returned it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Absent when the store did not report a distance
    pub distance: Option<f32>,
}

/// Caller-supplied equality filter over metadata keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, MetadataValue>);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Metadata filter key {key:?} is not allowed (allowed keys: {allowed:?})")]
pub struct FilterError {
    pub key: String,
    pub allowed: Vec<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document {id} has no embedding")]
    MissingEmbedding { id: String },

    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    #[error("Invalid result count {0}: must be at least 1")]
    InvalidLimit(usize),

    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),

    #[error("Vector store unavailable: {0}")]
    Unavailable(#[source] HttpError),

    #[error("Vector store rejected the request: {0}")]
    Rejected(#[source] HttpError),

    #[error("Malformed vector store response: {0}")]
    MalformedResponse(String),
}

impl From<HttpError> for StoreError {
    #[inline]
    fn from(error: HttpError) -> Self {
        if error.is_transient() {
            Self::Unavailable(error)
        } else {
            Self::Rejected(error)
        }
    }
}

/// Remote vector collection capability.
///
/// Every call is an independent round trip; nothing is cached or batched locally.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a document; its embedding is required
    async fn upsert(&self, document: &StoredDocument) -> Result<(), StoreError>;

    /// Nearest neighbours of `vector`, best match first
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryMatch>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, StoreError>;
}

impl MetadataValue {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::from(*value),
            Self::Int(value) => serde_json::Value::from(*value),
            Self::Float(value) => serde_json::Value::from(*value),
            Self::Text(value) => serde_json::Value::from(value.as_str()),
        }
    }
}

impl fmt::Display for MetadataValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
        }
    }
}

/// Parses command-line style values: booleans, then integers, then floats, else text
impl FromStr for MetadataValue {
    type Err = Infallible;

    #[inline]
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<bool>() {
            return Ok(Self::Bool(value));
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Ok(Self::Int(value));
        }
        if let Some(value) = trimmed.parse::<f64>().ok().filter(|v| v.is_finite()) {
            return Ok(Self::Float(value));
        }
        Ok(Self::Text(trimmed.to_string()))
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetadataValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl MetadataFilter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Every key must be in `allowed`; the first offending key (in key order) is reported
    #[inline]
    pub fn validate(&self, allowed: &[String]) -> Result<(), FilterError> {
        self.0
            .keys()
            .find(|key| !allowed.contains(key))
            .map_or(Ok(()), |key| {
                Err(FilterError {
                    key: key.clone(),
                    allowed: allowed.to_vec(),
                })
            })
    }
}

impl FromIterator<(String, MetadataValue)> for MetadataFilter {
    #[inline]
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
