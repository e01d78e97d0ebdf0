use crate::embeddings::{Embedder, NgramHashEmbedder};
use crate::error::StoreError;
use crate::models::{DocumentChunk, DocumentMetadata};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    embedder: NgramHashEmbedder,
}

impl QdrantStore {
    pub fn new(endpoint: &str, collection: impl Into<String>) -> Result<Self, StoreError> {
        let parsed = Url::parse(endpoint)?;
        Ok(Self {
            endpoint: parsed.to_string().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            embedder: NgramHashEmbedder::default(),
        })
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let collection_url = format!("{}/collections/{}", self.endpoint, self.collection);

        let response = self.client.get(&collection_url).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(&collection_url)
            .json(&json!({
                "vectors": {
                    "size": self.embedder.dimensions(),
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "qdrant collection setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn save_chunks(
        &self,
        metadata: &DocumentMetadata,
        chunks: &[DocumentChunk],
    ) -> Result<(), StoreError> {
        let points = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": point_id(&metadata.title, chunk),
                    "vector": self.embedder.embed(&chunk.content),
                    "payload": {
                        "title": metadata.title,
                        "content": chunk.content,
                        "page_number": chunk.page,
                        "chunk_number": chunk.chunk,
                        "tags": metadata.tags,
                        "file_path": metadata.file_path,
                    },
                })
            })
            .collect::<Vec<_>>();

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn remove_documents(&self, metadata: &DocumentMetadata) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/delete?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "title", "match": { "value": metadata.title } }
                    ]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

/// Deterministic point id: the same (title, page, chunk) triple always maps
/// to the same UUID, so re-saving a document upserts instead of duplicating.
fn point_id(title: &str, chunk: &DocumentChunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(chunk.page.to_le_bytes());
    hasher.update(chunk.chunk.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(page: u32, number: u64) -> DocumentChunk {
        DocumentChunk {
            content: "some chunk content".to_string(),
            page,
            chunk: number,
        }
    }

    #[test]
    fn point_ids_are_stable_per_title_page_chunk() {
        assert_eq!(point_id("manual", &chunk(1, 0)), point_id("manual", &chunk(1, 0)));
        assert_ne!(point_id("manual", &chunk(1, 0)), point_id("manual", &chunk(1, 1)));
        assert_ne!(point_id("manual", &chunk(1, 0)), point_id("other", &chunk(1, 0)));
    }

    #[test]
    fn point_id_is_uuid_shaped() {
        let id = point_id("manual", &chunk(2, 7));
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[0].len(), 8);
        assert_eq!(groups[4].len(), 12);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(QdrantStore::new("not a url", "documents").is_err());
    }
}
