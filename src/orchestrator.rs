//! The question-answering pipeline.
//!
//! One [`QueryOrchestrator`] per process/session, built over the immutable
//! [`Configuration`] and the three collaborator seams. A question flows
//! through: generate SQL → read-only validation → warehouse execution →
//! optional visualization → summary → follow-ups.
//!
//! Error policy: every stage failure is converted into a user-visible
//! partial [`AnswerBundle`] here, at the stage boundary. Stages that do not
//! depend on a failed stage's output still run — a broken chart never
//! blocks the summary, and follow-ups survive a failed execution.
//!
//! Caching: stage results are cached by their input key (question text for
//! generation, SQL text for execution), successes only, so re-invoking
//! after a failure actually retries.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::chart::{execute_plot_code, ChartSpec};
use crate::credentials::Configuration;
use crate::error::{ExecutionError, ModelError, ValidationRejection};
use crate::knowledge::KnowledgeClient;
use crate::model::ModelClient;
use crate::models::{AnswerBundle, AnswerStatus, QueryResult, Rows};
use crate::warehouse::Warehouse;

/// Fixed sentinel returned for an empty result set instead of asking the
/// model to summarize nothing.
pub const NO_DATA_SUMMARY: &str = "No data was returned for this question.";

/// Default bound on sandboxed plot-code execution. On expiry the await
/// stops and the chart degrades to none; there is no transaction to unwind.
const DEFAULT_PLOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort read-only policy: the statement must contain a selection
/// clause and none of the mutation keywords, as plain case-insensitive
/// substrings. A safety net against an over-eager model, not a security
/// boundary — the warehouse credential should be read-only too.
pub fn is_read_only(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    if !lower.contains("select") {
        return false;
    }
    const DENYLIST: [&str; 5] = ["insert", "update", "delete", "drop", "alter"];
    !DENYLIST.iter().any(|keyword| lower.contains(keyword))
}

pub struct QueryOrchestrator {
    configuration: Arc<Configuration>,
    knowledge: Arc<dyn KnowledgeClient>,
    model: Arc<dyn ModelClient>,
    warehouse: Arc<dyn Warehouse>,
    sql_cache: Mutex<HashMap<String, String>>,
    result_cache: Mutex<HashMap<String, QueryResult>>,
    plot_timeout: Duration,
}

impl QueryOrchestrator {
    pub fn new(
        configuration: Arc<Configuration>,
        knowledge: Arc<dyn KnowledgeClient>,
        model: Arc<dyn ModelClient>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            configuration,
            knowledge,
            model,
            warehouse,
            sql_cache: Mutex::new(HashMap::new()),
            result_cache: Mutex::new(HashMap::new()),
            plot_timeout: DEFAULT_PLOT_TIMEOUT,
        }
    }

    /// Override the plot-code execution bound.
    pub fn with_plot_timeout(mut self, timeout: Duration) -> Self {
        self.plot_timeout = timeout;
        self
    }

    /// Run the full pipeline for one question.
    pub async fn answer(&self, question: &str) -> AnswerBundle {
        debug!(
            question,
            dataset = %self.configuration.dataset_id,
            "answering question"
        );

        let sql = match self.generate_sql(question).await {
            Ok(Some(sql)) => sql,
            Ok(None) => {
                return AnswerBundle::unanswered(question, AnswerStatus::NoQueryGenerated);
            }
            Err(e) => {
                warn!(error = %e, "SQL generation failed");
                return AnswerBundle::unanswered(
                    question,
                    AnswerStatus::GenerationFailed {
                        message: e.to_string(),
                    },
                );
            }
        };

        if let Err(rejection) = self.validate(&sql) {
            warn!(sql = %rejection.sql, "statement rejected by read-only policy");
            let mut bundle = AnswerBundle::unanswered(
                question,
                AnswerStatus::Rejected {
                    sql: rejection.sql.clone(),
                },
            );
            bundle.sql = Some(rejection.sql);
            return bundle;
        }

        let result = match self.execute(&sql).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "warehouse execution failed");
                let mut bundle = AnswerBundle::unanswered(
                    question,
                    AnswerStatus::ExecutionFailed {
                        message: e.message.clone(),
                        hint: e.hint.map(str::to_string),
                    },
                );
                bundle.sql = Some(sql.clone());
                // Follow-ups do not depend on rows; they tolerate an empty
                // row-set placeholder.
                bundle.followups = self.suggest_followups(question, &sql, &Vec::new()).await;
                return bundle;
            }
        };

        let chart = if result.rows.is_empty() {
            None
        } else {
            self.maybe_visualize(question, &sql, &result.rows).await
        };
        let summary = self.summarize(question, &result.rows).await;
        let followups = self.suggest_followups(question, &sql, &result.rows).await;

        AnswerBundle {
            question: question.to_string(),
            status: AnswerStatus::Answered,
            sql: Some(result.sql),
            rows: result.rows,
            chart,
            summary,
            followups,
        }
    }

    /// Stage 1: retrieval-augmented SQL generation, cached by question.
    /// `Ok(None)` is the "no query generated" outcome.
    pub async fn generate_sql(&self, question: &str) -> Result<Option<String>, ModelError> {
        if let Ok(cache) = self.sql_cache.lock() {
            if let Some(sql) = cache.get(question) {
                debug!(question, "generation cache hit");
                return Ok(Some(sql.clone()));
            }
        }

        let generated = self.knowledge.generate_sql(question).await?;
        if let Some(sql) = &generated {
            if let Ok(mut cache) = self.sql_cache.lock() {
                cache.insert(question.to_string(), sql.clone());
            }
        }
        Ok(generated)
    }

    /// Stage 2: the read-only policy, surfacing the statement verbatim on
    /// rejection.
    pub fn validate(&self, sql: &str) -> Result<(), ValidationRejection> {
        if is_read_only(sql) {
            Ok(())
        } else {
            Err(ValidationRejection {
                sql: sql.to_string(),
            })
        }
    }

    /// Stage 3: warehouse execution, cached by SQL text. A cached result
    /// keeps its original `generated_at`.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult, ExecutionError> {
        if let Ok(cache) = self.result_cache.lock() {
            if let Some(result) = cache.get(sql) {
                debug!("execution cache hit");
                return Ok(result.clone());
            }
        }

        let rows = self.warehouse.run(sql).await?;
        let result = QueryResult {
            sql: sql.to_string(),
            rows,
            generated_at: Utc::now(),
        };
        if let Ok(mut cache) = self.result_cache.lock() {
            cache.insert(sql.to_string(), result.clone());
        }
        Ok(result)
    }

    /// Stage 4: gated, sandboxed visualization. Every failure path degrades
    /// to `None`.
    async fn maybe_visualize(&self, question: &str, sql: &str, rows: &Rows) -> Option<ChartSpec> {
        match self.model.should_visualize(question, sql, rows).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("model declined visualization");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "visualize gate failed; skipping chart");
                return None;
            }
        }

        let code = match self.model.generate_plot_code(question, sql, rows).await {
            Ok(Some(code)) => code,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "plot-code generation failed; skipping chart");
                return None;
            }
        };

        let rows = rows.clone();
        let sandboxed =
            tokio::task::spawn_blocking(move || execute_plot_code(&code, &rows));
        match tokio::time::timeout(self.plot_timeout, sandboxed).await {
            Ok(Ok(Ok(spec))) => spec,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "sandboxed plot code failed; skipping chart");
                None
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "plot task failed; skipping chart");
                None
            }
            Err(_) => {
                warn!("plot code timed out; skipping chart");
                None
            }
        }
    }

    /// Stage 5: summary. Empty rows short-circuit to the fixed sentinel —
    /// the model is not consulted.
    pub async fn summarize(&self, question: &str, rows: &Rows) -> Option<String> {
        if rows.is_empty() {
            return Some(NO_DATA_SUMMARY.to_string());
        }
        match self.model.summarize(question, rows).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "summary failed; continuing without one");
                None
            }
        }
    }

    /// Stage 6: follow-up suggestions. Failures degrade to an empty list.
    pub async fn suggest_followups(&self, question: &str, sql: &str, rows: &Rows) -> Vec<String> {
        match self.model.suggest_followups(question, sql, rows).await {
            Ok(followups) => followups,
            Err(e) => {
                warn!(error = %e, "follow-up suggestion failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_plain_select() {
        assert!(is_read_only(
            "SELECT count(*) FROM allocations WHERE end_at >= CURRENT_DATE"
        ));
    }

    #[test]
    fn test_mutation_keywords_rejected_case_insensitive() {
        assert!(!is_read_only("DROP TABLE allocations"));
        assert!(!is_read_only("select * from t; dRoP table t"));
        assert!(!is_read_only("DELETE FROM t WHERE id = 1"));
        assert!(!is_read_only("select 1; update t set a = 2"));
        assert!(!is_read_only("INSERT INTO t VALUES (1)"));
        assert!(!is_read_only("ALTER TABLE t ADD COLUMN c INT64"));
    }

    #[test]
    fn test_missing_select_rejected() {
        assert!(!is_read_only("SHOW TABLES"));
        assert!(!is_read_only(""));
    }

    #[test]
    fn test_denylist_wins_over_surrounding_select() {
        // Substring policy by design: even a column named like a mutation
        // keyword trips the net.
        assert!(!is_read_only("select updated_at from t"));
    }
}
