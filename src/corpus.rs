//! Corpus bootstrap.
//!
//! Seeds the retrieval corpus exactly once: schema entries first, then
//! documentation, then example Q/A pairs. The guard is deliberately coarse —
//! "is the corpus non-empty" — checked immediately before writing, so two
//! instances starting cold race only within a small window and the loser's
//! inserts are content-keyed upserts anyway.
//!
//! Known limitation: because the guard checks emptiness, not membership,
//! changing the configured entry set against an already-seeded corpus is a
//! no-op. Re-seeding is an explicit operator decision via `force`
//! (`ttq seed --force`), never guessed.

use tracing::{debug, info, warn};

use crate::error::CorpusError;
use crate::knowledge::KnowledgeClient;
use crate::models::{CorpusEntry, SeedResult};

/// Idempotently seed the corpus.
///
/// Insertion failures are per-entry: each is logged and counted, nothing is
/// rolled back, and the remaining entries still get their chance. Only a
/// failing existence check is an error, because then nothing can be said
/// about the corpus at all.
pub async fn ensure_seeded(
    kb: &dyn KnowledgeClient,
    entries: &[CorpusEntry],
    force: bool,
) -> Result<SeedResult, CorpusError> {
    if !force {
        let existing = kb.count().await?;
        if existing > 0 {
            info!(existing, "corpus already seeded; skipping");
            return Ok(SeedResult::skipped());
        }
    }

    let mut ordered: Vec<&CorpusEntry> = entries.iter().collect();
    // Stable sort: entries of equal rank keep their configured order.
    ordered.sort_by_key(|e| e.seed_rank());

    let mut inserted = 0;
    let mut failed = 0;
    for entry in ordered {
        match kb.train(entry).await {
            Ok(()) => {
                debug!(kind = entry.kind(), key = %entry.content_key(), "seeded entry");
                inserted += 1;
            }
            Err(e) => {
                warn!(kind = entry.kind(), error = %e, "entry failed to seed; continuing");
                failed += 1;
            }
        }
    }

    info!(inserted, failed, force, "corpus bootstrap finished");
    Ok(SeedResult {
        inserted,
        skipped: false,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory knowledge double; entries whose document contains
    /// `fail_marker` refuse to insert.
    struct MemoryKnowledge {
        entries: Mutex<Vec<CorpusEntry>>,
        fail_marker: Option<String>,
    }

    impl MemoryKnowledge {
        fn empty() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail_marker: None,
            }
        }

        fn failing_on(marker: &str) -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail_marker: Some(marker.to_string()),
            }
        }
    }

    #[async_trait]
    impl KnowledgeClient for MemoryKnowledge {
        async fn train(&self, entry: &CorpusEntry) -> Result<(), CorpusError> {
            if let Some(marker) = &self.fail_marker {
                if entry.document().contains(marker.as_str()) {
                    return Err(CorpusError {
                        entry: entry.content_key(),
                        detail: "refused".to_string(),
                    });
                }
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn training_data(&self) -> Result<Vec<CorpusEntry>, CorpusError> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn count(&self) -> Result<usize, CorpusError> {
            Ok(self.entries.lock().unwrap().len())
        }

        async fn generate_sql(&self, _question: &str) -> Result<Option<String>, ModelError> {
            Ok(None)
        }
    }

    fn sample_entries() -> Vec<CorpusEntry> {
        vec![
            CorpusEntry::Example {
                question: "how many?".to_string(),
                sql: "select count(*) from allocations".to_string(),
            },
            CorpusEntry::Schema {
                ddl: "create table allocations (id int64)".to_string(),
            },
            CorpusEntry::Doc {
                text: "allocations hold active placements".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_seeding_twice_is_idempotent() {
        let kb = MemoryKnowledge::empty();
        let entries = sample_entries();

        let first = ensure_seeded(&kb, &entries, false).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert!(!first.skipped);

        let second = ensure_seeded(&kb, &entries, false).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert!(second.skipped);

        assert_eq!(kb.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_schema_inserted_before_examples() {
        let kb = MemoryKnowledge::empty();
        ensure_seeded(&kb, &sample_entries(), false).await.unwrap();

        let stored = kb.training_data().await.unwrap();
        assert_eq!(stored[0].kind(), "schema");
        assert_eq!(stored[1].kind(), "doc");
        assert_eq!(stored[2].kind(), "example");
    }

    #[tokio::test]
    async fn test_failing_entry_does_not_roll_back_or_abort() {
        let kb = MemoryKnowledge::failing_on("placements");
        let result = ensure_seeded(&kb, &sample_entries(), false).await.unwrap();

        assert_eq!(result.inserted, 2);
        assert_eq!(result.failed, 1);
        assert!(!result.skipped);
        // The schema (inserted before the failing doc) stays.
        assert_eq!(kb.training_data().await.unwrap()[0].kind(), "schema");
    }

    #[tokio::test]
    async fn test_force_reseeds_populated_corpus() {
        let kb = MemoryKnowledge::empty();
        let entries = sample_entries();
        ensure_seeded(&kb, &entries, false).await.unwrap();

        let forced = ensure_seeded(&kb, &entries, true).await.unwrap();
        assert_eq!(forced.inserted, 3);
        assert!(!forced.skipped);
    }
}
