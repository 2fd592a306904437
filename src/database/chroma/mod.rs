
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Metadata, MetadataFilter, QueryMatch, StoreError, StoredDocument, VectorStore,
};
use crate::config::ChromaConfig;
use crate::http::HttpClient;

const API_PREFIX: &str = "/api/v1";
const QUERY_INCLUDE: [&str; 3] = ["documents", "metadatas", "distances"];
const GET_INCLUDE: [&str; 3] = ["documents", "metadatas", "embeddings"];

/// Chroma collection accessed over its REST API
#[derive(Debug, Clone)]
pub struct ChromaStore {
    http: HttpClient,
    base_url: Url,
    collection_name: String,
    collection_id: String,
    allowed_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    ids: [&'a str; 1],
    embeddings: [&'a [f32]; 1],
    documents: [&'a str; 1],
    metadatas: [Option<&'a Metadata>; 1],
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_clause: Option<Value>,
    include: [&'static str; 3],
}

#[derive(Debug, Serialize)]
struct IdsRequest<'a> {
    ids: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    include: Option<[&'static str; 3]>,
}

/// Query results are nested one level per query embedding
#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Metadata>>>,
    #[serde(default)]
    embeddings: Option<Vec<Option<Vec<f32>>>>,
}

/// Translate an equality filter into a Chroma `where` clause.
///
/// A single key is sent as-is; several keys are combined with `$and`.
#[inline]
pub fn where_clause(filter: &MetadataFilter) -> Option<Value> {
    let mut conditions: Vec<Value> = filter
        .iter()
        .map(|(key, value)| json!({ key.as_str(): { "$eq": value.to_json() } }))
        .collect();

    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(json!({ "$and": conditions })),
    }
}

/// Element `index` of an optional column, tolerating short or missing columns
fn column_value<T: Clone>(column: Option<&Vec<Option<T>>>, index: usize) -> Option<T> {
    column.and_then(|values| values.get(index)).cloned().flatten()
}

impl ChromaStore {
    /// Connect to Chroma and resolve (creating if needed) the configured collection
    #[inline]
    pub async fn connect(
        config: &ChromaConfig,
        allowed_keys: &[String],
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = config
            .base_url()
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;

        let mut http = HttpClient::new(timeout);
        if let Some(token) = config.auth_token.as_deref() {
            http = http.with_header("Authorization", &format!("Bearer {}", token));
        }

        let mut url = join(&base_url, &format!("{}/collections", API_PREFIX))?;
        url.query_pairs_mut()
            .append_pair("tenant", &config.tenant)
            .append_pair("database", &config.database);

        debug!("Resolving Chroma collection {}", config.collection_name);
        let response_text = http
            .post_json(
                &url,
                &CreateCollectionRequest {
                    name: &config.collection_name,
                    get_or_create: true,
                },
            )
            .await?;

        let collection: CollectionResponse = serde_json::from_str(&response_text)
            .map_err(|e| StoreError::MalformedResponse(e.to_string()))?;

        info!(
            "Connected to Chroma collection {} ({})",
            collection.name, collection.id
        );

        Ok(Self {
            http,
            base_url,
            collection_name: collection.name,
            collection_id: collection.id,
            allowed_keys: allowed_keys.to_vec(),
        })
    }

    #[inline]
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    #[inline]
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Check that the server answers at all
    #[inline]
    pub async fn heartbeat(&self) -> Result<(), StoreError> {
        let url = join(&self.base_url, &format!("{}/heartbeat", API_PREFIX))?;
        self.http.get(&url).await?;
        debug!("Chroma heartbeat ok");
        Ok(())
    }

    /// Number of records in the collection
    #[inline]
    pub async fn count(&self) -> Result<usize, StoreError> {
        let url = self.collection_url("count")?;
        let response_text = self.http.get(&url).await?;
        serde_json::from_str(response_text.trim())
            .map_err(|e| StoreError::MalformedResponse(e.to_string()))
    }

    fn collection_url(&self, operation: &str) -> Result<Url, StoreError> {
        join(
            &self.base_url,
            &format!(
                "{}/collections/{}/{}",
                API_PREFIX, self.collection_id, operation
            ),
        )
    }

    fn matches_from_response(response: QueryResponse) -> Vec<QueryMatch> {
        let Some(ids) = response.ids.into_iter().next() else {
            return Vec::new();
        };
        let documents = response.documents.and_then(|rows| rows.into_iter().next());
        let metadatas = response.metadatas.and_then(|rows| rows.into_iter().next());
        let distances = response.distances.and_then(|rows| rows.into_iter().next());

        ids.into_iter()
            .enumerate()
            .map(|(index, id)| QueryMatch {
                id,
                text: column_value(documents.as_ref(), index).unwrap_or_default(),
                metadata: column_value(metadatas.as_ref(), index).unwrap_or_default(),
                distance: column_value(distances.as_ref(), index)
                    .filter(|d| d.is_finite() && *d >= 0.0),
            })
            .collect()
    }
}

fn join(base: &Url, route: &str) -> Result<Url, StoreError> {
    base.join(route)
        .map_err(|_| StoreError::InvalidUrl(format!("{}{}", base, route)))
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn upsert(&self, document: &StoredDocument) -> Result<(), StoreError> {
        let Some(embedding) = document.embedding.as_deref() else {
            return Err(StoreError::MissingEmbedding {
                id: document.id.clone(),
            });
        };

        let request = UpsertRequest {
            ids: [&document.id],
            embeddings: [embedding],
            documents: [&document.text],
            metadatas: [(!document.metadata.is_empty()).then_some(&document.metadata)],
        };

        self.http
            .post_json(&self.collection_url("upsert")?, &request)
            .await?;
        debug!("Upserted document {}", document.id);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryMatch>, StoreError> {
        if k == 0 {
            return Err(StoreError::InvalidLimit(k));
        }
        filter.validate(&self.allowed_keys)?;

        let request = QueryRequest {
            query_embeddings: [vector],
            n_results: k,
            where_clause: where_clause(filter),
            include: QUERY_INCLUDE,
        };

        debug!(
            "Querying {} for {} neighbours ({} filter keys)",
            self.collection_name,
            k,
            filter.len()
        );

        let response_text = self
            .http
            .post_json(&self.collection_url("query")?, &request)
            .await
            .map_err(|e| {
                warn!("Chroma query failed: {}", e);
                StoreError::from(e)
            })?;

        let response: QueryResponse = serde_json::from_str(&response_text)
            .map_err(|e| StoreError::MalformedResponse(e.to_string()))?;

        let matches = Self::matches_from_response(response);
        debug!("Chroma returned {} matches", matches.len());
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let request = IdsRequest {
            ids: [id],
            include: None,
        };
        self.http
            .post_json(&self.collection_url("delete")?, &request)
            .await?;
        debug!("Deleted document {}", id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let request = IdsRequest {
            ids: [id],
            include: Some(GET_INCLUDE),
        };
        let response_text = self
            .http
            .post_json(&self.collection_url("get")?, &request)
            .await?;

        let response: GetResponse = serde_json::from_str(&response_text)
            .map_err(|e| StoreError::MalformedResponse(e.to_string()))?;

        let Some(index) = response.ids.iter().position(|found| found == id) else {
            return Ok(None);
        };

        Ok(Some(StoredDocument {
            id: id.to_string(),
            text: column_value(response.documents.as_ref(), index).unwrap_or_default(),
            metadata: column_value(response.metadatas.as_ref(), index).unwrap_or_default(),
            embedding: column_value(response.embeddings.as_ref(), index),
        }))
    }
}
