//! Core data types flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One knowledge-corpus entry used to ground SQL generation.
///
/// Identity is the sha256 of the content ([`CorpusEntry::content_key`]), so
/// inserting identical content twice is stable at the store level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorpusEntry {
    /// DDL text describing the table (names, columns, types, relationships).
    Schema { ddl: String },
    /// Free-text documentation about business terminology.
    Doc { text: String },
    /// A known-good question/SQL pair.
    Example { question: String, sql: String },
}

impl CorpusEntry {
    /// Short kind tag, used in store metadata and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "schema",
            Self::Doc { .. } => "doc",
            Self::Example { .. } => "example",
        }
    }

    /// Seeding rank. Schema entries must land before docs, docs before
    /// example pairs: retrieval quality depends on the schema being present
    /// before examples reference it.
    pub fn seed_rank(&self) -> u8 {
        match self {
            Self::Schema { .. } => 0,
            Self::Doc { .. } => 1,
            Self::Example { .. } => 2,
        }
    }

    /// The text stored and embedded for this entry.
    pub fn document(&self) -> String {
        match self {
            Self::Schema { ddl } => ddl.clone(),
            Self::Doc { text } => text.clone(),
            Self::Example { question, sql } => format!("Q: {question}\nSQL: {sql}"),
        }
    }

    /// Content-hash identity: `{kind}-{sha256(document)}`.
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.document().as_bytes());
        format!("{}-{:x}", self.kind(), hasher.finalize())
    }
}

/// Outcome of a corpus bootstrap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    /// Entries inserted in this run.
    pub inserted: usize,
    /// True when the corpus was already populated and seeding was skipped.
    pub skipped: bool,
    /// Entries that failed to insert (logged per entry, never rolled back).
    pub failed: usize,
}

impl SeedResult {
    pub fn skipped() -> Self {
        Self {
            inserted: 0,
            skipped: true,
            failed: 0,
        }
    }
}

/// One result row: column name → JSON value, in warehouse schema order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// An ordered result set.
pub type Rows = Vec<Row>;

/// The raw product of executing one generated statement. Owned by the
/// `answer` call that produced it; never shared across questions.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub sql: String,
    pub rows: Rows,
    pub generated_at: DateTime<Utc>,
}

/// How far the pipeline got for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerStatus {
    /// SQL was generated, validated, and executed.
    Answered,
    /// The model could not produce a query. A user-visible outcome, not an
    /// error.
    NoQueryGenerated,
    /// The model service itself failed while generating.
    GenerationFailed { message: String },
    /// Generated SQL failed the read-only policy; carries the statement
    /// verbatim. Execution was withheld.
    Rejected { sql: String },
    /// The warehouse call failed.
    ExecutionFailed {
        message: String,
        hint: Option<String>,
    },
}

/// Aggregate result of one question-answering run.
///
/// Later stages are filled independently of earlier-stage failures wherever
/// they do not depend on the failed stage's output, so a bundle can carry a
/// summary without a chart, or follow-ups without rows.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerBundle {
    pub question: String,
    pub status: AnswerStatus,
    pub sql: Option<String>,
    pub rows: Rows,
    pub chart: Option<crate::chart::ChartSpec>,
    pub summary: Option<String>,
    pub followups: Vec<String>,
}

impl AnswerBundle {
    /// Empty bundle in the given terminal state.
    pub fn unanswered(question: &str, status: AnswerStatus) -> Self {
        Self {
            question: question.to_string(),
            status,
            sql: None,
            rows: Vec::new(),
            chart: None,
            summary: None,
            followups: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_stable_across_clones() {
        let a = CorpusEntry::Doc {
            text: "allocations hold active placements".to_string(),
        };
        assert_eq!(a.content_key(), a.clone().content_key());
        assert!(a.content_key().starts_with("doc-"));
    }

    #[test]
    fn test_content_key_distinguishes_kinds() {
        let doc = CorpusEntry::Doc {
            text: "same".to_string(),
        };
        let ddl = CorpusEntry::Schema {
            ddl: "same".to_string(),
        };
        assert_ne!(doc.content_key(), ddl.content_key());
    }

    #[test]
    fn test_seed_rank_orders_schema_first() {
        let mut entries = vec![
            CorpusEntry::Example {
                question: "q".to_string(),
                sql: "select 1".to_string(),
            },
            CorpusEntry::Doc {
                text: "d".to_string(),
            },
            CorpusEntry::Schema {
                ddl: "create table t (id int64)".to_string(),
            },
        ];
        entries.sort_by_key(CorpusEntry::seed_rank);
        assert_eq!(entries[0].kind(), "schema");
        assert_eq!(entries[2].kind(), "example");
    }
}
