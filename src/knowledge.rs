//! The vector-retrieval client: training-data storage plus
//! retrieval-augmented SQL generation.
//!
//! [`KnowledgeClient`] is the trait seam the bootstrapper and orchestrator
//! work against. [`ChromaKnowledge`] is the production implementation:
//! Gemini embeddings for vectors, Chroma for nearest-neighbour retrieval,
//! and Gemini chat for the actual text-to-SQL call, with the retrieved
//! corpus (schema first, then docs, then example pairs) in the prompt.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::chroma::{entry_from_stored, entry_metadata, ChromaClient};
use crate::error::{CorpusError, ModelError};
use crate::model::{strip_code_fence, GeminiClient, NO_QUERY_TOKEN};
use crate::models::CorpusEntry;

/// The vector-retrieval collaborator: stores training data and generates
/// SQL grounded in it.
#[async_trait]
pub trait KnowledgeClient: Send + Sync {
    /// Insert one corpus entry.
    async fn train(&self, entry: &CorpusEntry) -> Result<(), CorpusError>;

    /// Everything currently in the corpus.
    async fn training_data(&self) -> Result<Vec<CorpusEntry>, CorpusError>;

    /// Corpus size. The bootstrapper's idempotence guard reads this
    /// immediately before writing.
    async fn count(&self) -> Result<usize, CorpusError>;

    /// Generate SQL for a question. `None` means the model declined — a
    /// user-visible outcome, not an error.
    async fn generate_sql(&self, question: &str) -> Result<Option<String>, ModelError>;
}

/// Chroma-backed knowledge client with Gemini embeddings and generation.
pub struct ChromaKnowledge {
    chroma: ChromaClient,
    model: Arc<GeminiClient>,
    project_id: String,
    dataset: String,
    top_k: usize,
}

impl ChromaKnowledge {
    pub fn new(
        chroma: ChromaClient,
        model: Arc<GeminiClient>,
        project_id: &str,
        dataset: &str,
        top_k: usize,
    ) -> Self {
        Self {
            chroma,
            model,
            project_id: project_id.to_string(),
            dataset: dataset.to_string(),
            top_k,
        }
    }

    fn corpus_err(entry: &CorpusEntry, e: impl std::fmt::Display) -> CorpusError {
        CorpusError {
            entry: entry.content_key(),
            detail: e.to_string(),
        }
    }
}

#[async_trait]
impl KnowledgeClient for ChromaKnowledge {
    async fn train(&self, entry: &CorpusEntry) -> Result<(), CorpusError> {
        let document = entry.document();
        let embedding = self
            .model
            .embed(&document)
            .await
            .map_err(|e| Self::corpus_err(entry, e))?;
        self.chroma
            .add(
                &entry.content_key(),
                &embedding,
                &document,
                &entry_metadata(entry),
            )
            .await
            .map_err(|e| Self::corpus_err(entry, e))
    }

    async fn training_data(&self) -> Result<Vec<CorpusEntry>, CorpusError> {
        let stored = self.chroma.get_all().await.map_err(|e| CorpusError {
            entry: "corpus".to_string(),
            detail: e.to_string(),
        })?;
        Ok(stored.iter().map(entry_from_stored).collect())
    }

    async fn count(&self) -> Result<usize, CorpusError> {
        self.chroma.count().await.map_err(|e| CorpusError {
            entry: "corpus".to_string(),
            detail: e.to_string(),
        })
    }

    async fn generate_sql(&self, question: &str) -> Result<Option<String>, ModelError> {
        let embedding = self.model.embed(question).await?;
        let neighbours = self
            .chroma
            .query(&embedding, self.top_k)
            .await
            .map_err(|e| ModelError::Retrieval(e.to_string()))?;

        let mut context: Vec<CorpusEntry> = neighbours.iter().map(entry_from_stored).collect();
        // Schema before docs before examples, regardless of similarity
        // order: examples refer to names the schema introduces.
        context.sort_by_key(CorpusEntry::seed_rank);
        debug!(
            question,
            retrieved = context.len(),
            "assembling generation prompt"
        );

        let system = format!(
            "You translate natural-language questions about the BigQuery dataset \
             `{}.{}` into BigQuery Standard SQL. Use only tables and columns that appear \
             in the provided schema. Reply with the SQL statement only, no explanation. \
             If the question cannot be answered with a SQL query over this dataset, \
             reply with the single token {NO_QUERY_TOKEN}.",
            self.project_id, self.dataset
        );
        let user = build_generation_prompt(&context, question);

        let reply = self.model.generate(&system, &user).await?;
        Ok(extract_sql(&reply))
    }
}

/// Assemble the retrieval context into prompt sections.
fn build_generation_prompt(context: &[CorpusEntry], question: &str) -> String {
    let mut sections = String::new();

    let schema: Vec<&CorpusEntry> = context.iter().filter(|e| e.kind() == "schema").collect();
    if !schema.is_empty() {
        sections.push_str("=== Schema ===\n");
        for entry in schema {
            sections.push_str(&entry.document());
            sections.push('\n');
        }
    }

    let docs: Vec<&CorpusEntry> = context.iter().filter(|e| e.kind() == "doc").collect();
    if !docs.is_empty() {
        sections.push_str("\n=== Documentation ===\n");
        for entry in docs {
            sections.push_str(&entry.document());
            sections.push('\n');
        }
    }

    let examples: Vec<&CorpusEntry> = context.iter().filter(|e| e.kind() == "example").collect();
    if !examples.is_empty() {
        sections.push_str("\n=== Examples ===\n");
        for entry in examples {
            sections.push_str(&entry.document());
            sections.push_str("\n\n");
        }
    }

    format!("{sections}\n=== Question ===\n{question}")
}

/// Turn a model reply into the generated-SQL outcome. The decline token and
/// empty replies are the `None` outcome; fenced replies are unwrapped.
pub(crate) fn extract_sql(reply: &str) -> Option<String> {
    if reply.contains(NO_QUERY_TOKEN) {
        return None;
    }
    let sql = strip_code_fence(reply);
    if sql.is_empty() {
        None
    } else {
        Some(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_sql_unwraps_fence() {
        let reply = "```sql\nSELECT count(*) FROM allocations\n```";
        assert_eq!(
            extract_sql(reply),
            Some("SELECT count(*) FROM allocations".to_string())
        );
    }

    #[test]
    fn test_extract_sql_decline_token() {
        assert_eq!(extract_sql("NO_QUERY"), None);
        assert_eq!(extract_sql("I must answer NO_QUERY here."), None);
    }

    #[test]
    fn test_extract_sql_empty_reply() {
        assert_eq!(extract_sql("   \n"), None);
    }

    #[test]
    fn test_generation_prompt_orders_sections() {
        let context = vec![
            CorpusEntry::Example {
                question: "how many?".to_string(),
                sql: "select count(*) from t".to_string(),
            },
            CorpusEntry::Schema {
                ddl: "create table t (id int64)".to_string(),
            },
            CorpusEntry::Doc {
                text: "t holds things".to_string(),
            },
        ];
        let prompt = build_generation_prompt(&context, "how many things?");

        let schema_pos = prompt.find("=== Schema ===").unwrap();
        let docs_pos = prompt.find("=== Documentation ===").unwrap();
        let examples_pos = prompt.find("=== Examples ===").unwrap();
        let question_pos = prompt.find("=== Question ===").unwrap();
        assert!(schema_pos < docs_pos && docs_pos < examples_pos && examples_pos < question_pos);
    }

    #[test]
    fn test_generation_prompt_skips_empty_sections() {
        let prompt = build_generation_prompt(&[], "anything?");
        assert!(!prompt.contains("=== Schema ==="));
        assert!(prompt.contains("=== Question ==="));
    }
}
