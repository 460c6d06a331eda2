//! Chroma-backed context store.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;

use super::{rank, ContextPassage, ContextStore, EmbeddingClient, RetrievalError};

/// Queries one Chroma collection. The collection id is resolved on first use.
pub struct ChromaStore {
    client: Client,
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
    embedder: EmbeddingClient,
}

#[derive(Debug, Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<serde_json::Map<String, serde_json::Value>>>>,
    #[serde(default)]
    distances: Vec<Vec<Option<f32>>>,
}

impl ChromaStore {
    pub fn new(base_url: &str, collection: impl Into<String>, embedder: EmbeddingClient) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            collection_id: OnceCell::new(),
            embedder,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn collection_id(&self) -> Result<&str, RetrievalError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = self.api_url(&format!("/collections/{}", self.collection));
                let res = self.client.get(&url).send().await?;
                if !res.status().is_success() {
                    let status = res.status();
                    let body = res.text().await.unwrap_or_default();
                    return Err(RetrievalError::Store(format!(
                        "collection {} lookup failed: {} {}",
                        self.collection, status, body
                    )));
                }
                let c: ChromaCollection = res.json().await?;
                Ok(c.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl ContextStore for ChromaStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ContextPassage>, RetrievalError> {
        let embedding = self.embedder.embed(query).await?;
        let id = self.collection_id().await?;
        let url = self.api_url(&format!("/collections/{}/query", id));
        let body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RetrievalError::Store(format!("query failed: {} {}", status, body)));
        }
        let data: QueryResponse = res.json().await?;
        Ok(rank(passages_from_response(data), k))
    }
}

fn flatten_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Chroma returns one row per query embedding; we only ever send one.
fn passages_from_response(data: QueryResponse) -> Vec<ContextPassage> {
    let docs = data.documents.into_iter().next().unwrap_or_default();
    let mut metas = data.metadatas.into_iter().next().unwrap_or_default().into_iter();
    let mut dists = data.distances.into_iter().next().unwrap_or_default().into_iter();
    docs.into_iter()
        .filter_map(|doc| {
            let meta = metas.next().flatten();
            let dist = dists.next().flatten();
            let content = doc?;
            let metadata: BTreeMap<String, String> = meta
                .map(|m| m.iter().map(|(k, v)| (k.clone(), flatten_value(v))).collect())
                .unwrap_or_default();
            Some(ContextPassage {
                content,
                metadata,
                score: dist.map(|d| 1.0 - d).unwrap_or(0.0),
            })
        })
        .collect()
}
