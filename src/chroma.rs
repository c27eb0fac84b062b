//! Minimal Chroma HTTP client.
//!
//! Covers exactly the surface the corpus needs: get-or-create a collection,
//! add embedded documents, read them back, count them, and query by
//! embedding. Similarity search itself stays on the Chroma side; this is
//! plumbing, not a vector engine.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::models::CorpusEntry;

/// One stored document with its metadata, as Chroma returns it.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
}

pub struct ChromaClient {
    http: reqwest::Client,
    base_url: String,
    collection_name: String,
    /// Collection id, resolved lazily on first use.
    collection_id: Mutex<Option<String>>,
}

impl ChromaClient {
    pub fn new(base_url: &str, collection_name: &str, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_name: collection_name.to_string(),
            collection_id: Mutex::new(None),
        })
    }

    async fn collection_id(&self) -> Result<String> {
        let mut cached = self.collection_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let url = format!("{}/api/v1/collections", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "name": self.collection_name,
                "get_or_create": true,
            }))
            .send()
            .await
            .context("Chroma collection request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chroma API error {status}: {body}"));
        }

        let json: serde_json::Value = response.json().await?;
        let id = json
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Chroma collection response missing id"))?
            .to_string();
        *cached = Some(id.clone());
        Ok(id)
    }

    async fn post(&self, op: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/{}", self.base_url, id, op);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Chroma {op} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chroma API error {status}: {body_text}"));
        }
        Ok(response.json().await?)
    }

    /// Upsert one embedded document. Chroma treats a repeated id as an
    /// upsert, which makes identical-content re-inserts stable.
    pub async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        self.post(
            "upsert",
            &serde_json::json!({
                "ids": [id],
                "embeddings": [embedding],
                "documents": [document],
                "metadatas": [metadata],
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/count", self.base_url, id);
        let response = self.http.get(&url).send().await.context("Chroma count request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chroma API error {status}: {body}"));
        }
        let json: serde_json::Value = response.json().await?;
        json.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| anyhow!("Chroma count response is not a number"))
    }

    /// All stored documents with metadata.
    pub async fn get_all(&self) -> Result<Vec<StoredDocument>> {
        let json = self
            .post(
                "get",
                &serde_json::json!({ "include": ["documents", "metadatas"] }),
            )
            .await?;
        parse_documents(
            json.get("ids"),
            json.get("documents"),
            json.get("metadatas"),
        )
    }

    /// Nearest neighbours of one query embedding.
    pub async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<StoredDocument>> {
        let json = self
            .post(
                "query",
                &serde_json::json!({
                    "query_embeddings": [embedding],
                    "n_results": n_results,
                    "include": ["documents", "metadatas"],
                }),
            )
            .await?;
        // Query results are nested one level deeper: one list per query.
        parse_documents(
            json.pointer("/ids/0"),
            json.pointer("/documents/0"),
            json.pointer("/metadatas/0"),
        )
    }
}

fn parse_documents(
    ids: Option<&serde_json::Value>,
    documents: Option<&serde_json::Value>,
    metadatas: Option<&serde_json::Value>,
) -> Result<Vec<StoredDocument>> {
    let ids = ids
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Chroma response missing ids"))?;
    let documents = documents
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Chroma response missing documents"))?;
    let metadatas = metadatas
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Chroma response missing metadatas"))?;

    let mut result = Vec::with_capacity(ids.len());
    for i in 0..ids.len() {
        let id = ids[i]
            .as_str()
            .ok_or_else(|| anyhow!("Chroma id is not a string"))?;
        let document = documents
            .get(i)
            .and_then(|d| d.as_str())
            .unwrap_or_default();
        let metadata = metadatas.get(i).cloned().unwrap_or(serde_json::Value::Null);
        result.push(StoredDocument {
            id: id.to_string(),
            document: document.to_string(),
            metadata,
        });
    }
    Ok(result)
}

/// Metadata stored alongside a corpus entry.
pub fn entry_metadata(entry: &CorpusEntry) -> serde_json::Value {
    match entry {
        CorpusEntry::Schema { .. } | CorpusEntry::Doc { .. } => {
            serde_json::json!({ "kind": entry.kind() })
        }
        CorpusEntry::Example { question, sql } => serde_json::json!({
            "kind": entry.kind(),
            "question": question,
            "sql": sql,
        }),
    }
}

/// Rebuild a corpus entry from a stored document. Unknown kinds come back
/// as docs so foreign data in the collection cannot break retrieval.
pub fn entry_from_stored(stored: &StoredDocument) -> CorpusEntry {
    let kind = stored
        .metadata
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or("doc");
    match kind {
        "schema" => CorpusEntry::Schema {
            ddl: stored.document.clone(),
        },
        "example" => {
            let question = stored
                .metadata
                .get("question")
                .and_then(|q| q.as_str())
                .unwrap_or_default()
                .to_string();
            let sql = stored
                .metadata
                .get("sql")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string();
            CorpusEntry::Example { question, sql }
        }
        _ => CorpusEntry::Doc {
            text: stored.document.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_metadata_example_carries_pair() {
        let entry = CorpusEntry::Example {
            question: "how many?".to_string(),
            sql: "select count(*) from t".to_string(),
        };
        let meta = entry_metadata(&entry);
        assert_eq!(meta["kind"], "example");
        assert_eq!(meta["question"], "how many?");
    }

    #[test]
    fn test_entry_round_trip_through_store_shape() {
        let entry = CorpusEntry::Schema {
            ddl: "create table t (id int64)".to_string(),
        };
        let stored = StoredDocument {
            id: entry.content_key(),
            document: entry.document(),
            metadata: entry_metadata(&entry),
        };
        assert_eq!(entry_from_stored(&stored), entry);
    }

    #[test]
    fn test_unknown_kind_degrades_to_doc() {
        let stored = StoredDocument {
            id: "x".to_string(),
            document: "free text".to_string(),
            metadata: serde_json::json!({ "kind": "mystery" }),
        };
        assert!(matches!(
            entry_from_stored(&stored),
            CorpusEntry::Doc { .. }
        ));
    }

    #[test]
    fn test_parse_documents_mismatched_lengths_tolerated() {
        let ids = serde_json::json!(["a", "b"]);
        let docs = serde_json::json!(["only one"]);
        let metas = serde_json::json!([{"kind": "doc"}, {"kind": "doc"}]);
        let parsed = parse_documents(Some(&ids), Some(&docs), Some(&metas)).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].document, "");
    }
}
