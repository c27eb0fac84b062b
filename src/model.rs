//! Gemini chat client and the model-facing presentation operations.
//!
//! [`GeminiClient`] wraps the `generateContent` and `embedContent` endpoints
//! with a bounded timeout and retry/backoff. [`ModelClient`] is the trait
//! seam the orchestrator calls for the presentation stages (visualize
//! gating, plot code, summary, follow-ups); SQL generation lives in
//! [`crate::knowledge`] because it is retrieval-augmented.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::models::Rows;

/// Sentinel the SQL-generation prompt asks for when no query is possible.
pub const NO_QUERY_TOKEN: &str = "NO_QUERY";
/// Sentinel the plot-code prompt asks for when no chart makes sense.
pub const NO_CHART_TOKEN: &str = "NO_CHART";

/// Model operations the orchestrator needs beyond SQL generation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Whether a chart is worth generating for this result at all.
    async fn should_visualize(
        &self,
        question: &str,
        sql: &str,
        rows: &Rows,
    ) -> Result<bool, ModelError>;

    /// Lua plot code for the sandbox, or `None` when the model declines.
    async fn generate_plot_code(
        &self,
        question: &str,
        sql: &str,
        rows: &Rows,
    ) -> Result<Option<String>, ModelError>;

    /// Natural-language summary of the rows, or `None` for an empty reply.
    async fn summarize(&self, question: &str, rows: &Rows) -> Result<Option<String>, ModelError>;

    /// Follow-up questions the user might ask next. Tolerant of empty rows.
    async fn suggest_followups(
        &self,
        question: &str,
        sql: &str,
        rows: &Rows,
    ) -> Result<Vec<String>, ModelError>;
}

/// Gemini API client (chat + embeddings) over plain HTTP.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: &str, model: &str) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            embedding_model: config.embedding_model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// One chat turn: system instruction + user prompt → reply text.
    pub async fn generate(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
        });

        let json = self.post_with_retry(&url, &body).await?;
        extract_reply_text(&json)
    }

    /// Embed a single text with the configured embedding model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.embedding_model, self.api_key
        );
        let body = serde_json::json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });

        let json = self.post_with_retry(&url, &body).await?;
        let values = json
            .pointer("/embedding/values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ModelError::Decode("missing embedding.values".to_string()))?;
        Ok(values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.http.post(url).json(body).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        debug!(status = status.as_u16(), attempt, "model API error; retrying");
                        last_err = Some(ModelError::Api {
                            status: status.as_u16(),
                            body: body_text,
                        });
                        continue;
                    }

                    return Err(ModelError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ModelError::Decode("model call failed after retries".to_string())))
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn should_visualize(
        &self,
        question: &str,
        sql: &str,
        rows: &Rows,
    ) -> Result<bool, ModelError> {
        let system = "You decide whether a small tabular query result is worth charting. \
                      Answer with exactly one word: yes or no.";
        let user = format!(
            "Question: {question}\nSQL: {sql}\nFirst rows:\n{}",
            rows_preview(rows, 5)
        );
        let reply = self.generate(system, &user).await?;
        Ok(reply.trim().to_lowercase().starts_with("yes"))
    }

    async fn generate_plot_code(
        &self,
        question: &str,
        sql: &str,
        rows: &Rows,
    ) -> Result<Option<String>, ModelError> {
        let system = format!(
            "You write Lua code that builds one chart from query rows. \
             The environment provides exactly two globals: `rows` (an array of row tables) \
             and `plot` with functions plot.bar{{...}}, plot.line{{...}}, plot.scatter{{...}}, \
             plot.pie{{...}}, each taking a table with `title`, `x` (array) and `y` (array). \
             Nothing else is available: no os, io, require, print. \
             Reply with the Lua code only, or with the single token {NO_CHART_TOKEN} \
             if no chart makes sense."
        );
        let user = format!(
            "Question: {question}\nSQL: {sql}\nFirst rows:\n{}",
            rows_preview(rows, 10)
        );
        let reply = self.generate(&system, &user).await?;
        if reply.contains(NO_CHART_TOKEN) {
            return Ok(None);
        }
        let code = strip_code_fence(&reply);
        if code.is_empty() {
            Ok(None)
        } else {
            Ok(Some(code))
        }
    }

    async fn summarize(&self, question: &str, rows: &Rows) -> Result<Option<String>, ModelError> {
        let system = "You summarize a SQL query result for a business user in one or two \
                      sentences, in the language the question was asked in. State only what \
                      the rows show.";
        let user = format!(
            "Question: {question}\nRows:\n{}",
            rows_preview(rows, 20)
        );
        let reply = self.generate(system, &user).await?;
        let summary = reply.trim();
        if summary.is_empty() {
            Ok(None)
        } else {
            Ok(Some(summary.to_string()))
        }
    }

    async fn suggest_followups(
        &self,
        question: &str,
        sql: &str,
        rows: &Rows,
    ) -> Result<Vec<String>, ModelError> {
        let system = "You suggest up to five follow-up questions a user might ask next about \
                      the same table. Reply with one question per line, no numbering.";
        let user = format!(
            "Question: {question}\nSQL: {sql}\nRows:\n{}",
            rows_preview(rows, 10)
        );
        let reply = self.generate(system, &user).await?;
        Ok(parse_followups(&reply))
    }
}

/// Join the text parts of the first candidate.
fn extract_reply_text(json: &serde_json::Value) -> Result<String, ModelError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ModelError::Decode("missing candidates[0].content.parts".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(ModelError::Decode("model returned no text parts".to_string()));
    }
    Ok(text)
}

/// JSON preview of the first `limit` rows, `[]` for an empty result set.
/// Empty rows still produce a valid placeholder so follow-up prompts can be
/// sent without special-casing.
pub(crate) fn rows_preview(rows: &Rows, limit: usize) -> String {
    let preview: Vec<&crate::models::Row> = rows.iter().take(limit).collect();
    serde_json::to_string(&preview).unwrap_or_else(|_| "[]".to_string())
}

/// Unwrap a Markdown code fence, tolerating a language tag on the opening
/// line. Returns the trimmed inner text.
pub(crate) fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let without_open = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return String::new(),
    };
    let inner = without_open
        .rfind("```")
        .map(|idx| &without_open[..idx])
        .unwrap_or(without_open);
    inner.trim().to_string()
}

fn parse_followups(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(strip_numbering)
        .filter(|line| !line.is_empty())
        .take(5)
        .map(str::to_string)
        .collect()
}

/// Strip a list-numbering prefix: `1.`, `2)`, a bullet dash or asterisk.
/// Bare digits stay, so a question starting with a year survives intact.
fn strip_numbering(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
        return rest.trim();
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence_with_language_tag() {
        let fenced = "```lua\nplot.bar{ x = {1}, y = {2} }\n```";
        assert_eq!(strip_code_fence(fenced), "plot.bar{ x = {1}, y = {2} }");
    }

    #[test]
    fn test_strip_code_fence_plain_text_untouched() {
        assert_eq!(strip_code_fence("  select 1  "), "select 1");
    }

    #[test]
    fn test_strip_code_fence_unterminated() {
        let fenced = "```sql\nselect 1";
        assert_eq!(strip_code_fence(fenced), "select 1");
    }

    #[test]
    fn test_parse_followups_strips_numbering() {
        let reply = "1. How many started in April?\n2) What is the average fee?\n- Which client?\n\n";
        let followups = parse_followups(reply);
        assert_eq!(
            followups,
            vec![
                "How many started in April?",
                "What is the average fee?",
                "Which client?"
            ]
        );
    }

    #[test]
    fn test_parse_followups_keeps_leading_year() {
        let reply = "2025 revenue by client?\n1. 2024 revenue by client?";
        assert_eq!(
            parse_followups(reply),
            vec!["2025 revenue by client?", "2024 revenue by client?"]
        );
    }

    #[test]
    fn test_parse_followups_caps_at_five() {
        let reply = "a\nb\nc\nd\ne\nf\ng";
        assert_eq!(parse_followups(reply).len(), 5);
    }

    #[test]
    fn test_extract_reply_text_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "SELECT" }, { "text": " 1" }] }
            }]
        });
        assert_eq!(extract_reply_text(&json).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_extract_reply_text_missing_candidates() {
        let json = serde_json::json!({ "promptFeedback": {} });
        assert!(extract_reply_text(&json).is_err());
    }

    #[test]
    fn test_rows_preview_empty_rows_is_placeholder() {
        assert_eq!(rows_preview(&Vec::new(), 5), "[]");
    }
}
