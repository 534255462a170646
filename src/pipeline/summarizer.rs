use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{CompletionBackend, CompletionRequest, LlmError};
use crate::pipeline::shaper::{bound_context, truncate_chars, FullData, ShapedResult};

const STAT_CHARS: usize = 500;
const FULL_DATA_CHARS: usize = 2000;
const SAMPLE_HALF_CHARS: usize = FULL_DATA_CHARS / 2;

const SYSTEM_PROMPT: &str = "You are an expert data analyst working in the construction industry.
Your task is to analyze SQL query results and provide a clear, concise explanation in natural language.

GUIDELINES:
1. Provide a conversational summary of the data that addresses the original question.
2. Highlight key insights, trends, or patterns in the data.
3. If dealing with a sampled dataset, acknowledge this fact and note that your analysis is based on a sample.
4. Use construction industry terminology appropriately.
5. If the data is empty or shows no results, explain what that might mean.
6. Keep your explanation concise but informative (2-4 paragraphs maximum).
7. Do not include all data values in your explanation, focus on highlights and summaries.
8. If statistical data is available (min, max, average), include relevant statistics that help answer the question.
";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SummarizationError {
    #[error("Azure OpenAI API credentials are missing")]
    MissingCredentials,
    #[error("LLM API request timed out after {0} seconds; try a smaller result or check the network")]
    Timeout(u64),
    #[error("LLM API request failed: {0}")]
    UpstreamError(String),
    #[error("received unexpected response format from the LLM API")]
    UnexpectedFormat,
}

impl From<LlmError> for SummarizationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MissingCredentials => SummarizationError::MissingCredentials,
            LlmError::Timeout(secs) => SummarizationError::Timeout(secs),
            LlmError::UnexpectedFormat => SummarizationError::UnexpectedFormat,
            other => SummarizationError::UpstreamError(other.to_string()),
        }
    }
}

/// Explains a shaped result in prose through a second completion call.
pub struct ResultSummarizer {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl ResultSummarizer {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    fn request(&self, question: &str, sql: &str, shaped: &ShapedResult) -> CompletionRequest {
        let context = query_context(question, sql, shaped);
        log::info!("Summary context size: {} characters", context.chars().count());
        CompletionRequest::new(SYSTEM_PROMPT, context)
            .max_tokens(800)
            .temperature(0.5)
            .top_p(0.95)
    }

    pub async fn summarize(
        &self,
        question: &str,
        sql: &str,
        shaped: &ShapedResult,
    ) -> Result<String, SummarizationError> {
        if !self.backend.has_credentials() {
            return Err(SummarizationError::MissingCredentials);
        }
        let request = self.request(question, sql, shaped);
        let explanation = self.backend.complete(&request, self.timeout).await?;
        finish(explanation)
    }

    /// Like [`summarize`](Self::summarize), handing each text increment to
    /// `sink` as it arrives.
    pub async fn summarize_stream(
        &self,
        question: &str,
        sql: &str,
        shaped: &ShapedResult,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, SummarizationError> {
        if !self.backend.has_credentials() {
            return Err(SummarizationError::MissingCredentials);
        }
        let request = self.request(question, sql, shaped);
        let explanation = self
            .backend
            .complete_stream(&request, self.timeout, sink)
            .await?;
        finish(explanation)
    }
}

fn finish(explanation: String) -> Result<String, SummarizationError> {
    let explanation = explanation.trim();
    if explanation.is_empty() {
        return Err(SummarizationError::UnexpectedFormat);
    }
    log::info!("Generated explanation ({} chars)", explanation.len());
    Ok(explanation.to_string())
}

/// The user message for a summary request, never longer than the context
/// ceiling. Falls back to counts only if the detailed form cannot be built.
pub fn query_context(question: &str, sql: &str, shaped: &ShapedResult) -> String {
    let context = match format_query_context(question, sql, shaped) {
        Ok(context) => context,
        Err(e) => {
            log::error!("Error formatting query context: {:#}", e);
            minimal_context(question, sql, shaped)
        }
    };
    bound_context(context)
}

fn format_query_context(question: &str, sql: &str, shaped: &ShapedResult) -> anyhow::Result<String> {
    let mut context = String::new();
    writeln!(context, "ORIGINAL QUESTION: {}\n", question)?;
    writeln!(context, "SQL QUERY EXECUTED:\n{}\n", sql)?;
    writeln!(context, "RESULT SUMMARY:")?;
    writeln!(context, "- Total rows: {}", shaped.row_count)?;
    writeln!(context, "- Columns: {}\n", shaped.columns.join(", "))?;

    if !shaped.summary_stats.is_empty() {
        writeln!(context, "STATISTICAL SUMMARY:")?;
        for (column, stats) in &shaped.summary_stats {
            writeln!(context, "- {}:", column)?;
            if let serde_json::Value::Object(fields) = serde_json::to_value(stats)? {
                for (name, value) in fields {
                    let rendered = match value {
                        serde_json::Value::String(s) => s,
                        other => serde_json::to_string(&other)?,
                    };
                    writeln!(context, "  - {}: {}", name, truncate_chars(&rendered, STAT_CHARS))?;
                }
            }
        }
        context.push('\n');
    }

    if let Some(sample) = &shaped.sample_data {
        writeln!(context, "DATA SAMPLE (partial dataset - too large to show completely):")?;
        writeln!(context, "First rows:")?;
        let first = serde_json::to_string_pretty(&sample.first_rows)?;
        context.push_str(truncate_chars(&first, SAMPLE_HALF_CHARS));
        context.push_str("\n\nLast rows:\n");
        let last = serde_json::to_string_pretty(&sample.last_rows)?;
        context.push_str(truncate_chars(&last, SAMPLE_HALF_CHARS));
    } else {
        match &shaped.full_data {
            Some(FullData::Marker(marker)) => {
                write!(context, "DATA: {}", truncate_chars(marker, FULL_DATA_CHARS))?;
            }
            Some(FullData::Rows(rows)) => {
                writeln!(context, "COMPLETE DATASET (truncated for API limit):")?;
                let data = serde_json::to_string_pretty(rows)?;
                context.push_str(truncate_chars(&data, FULL_DATA_CHARS));
            }
            None => context.push_str("Sample data not available."),
        }
    }

    Ok(context)
}

fn minimal_context(question: &str, sql: &str, shaped: &ShapedResult) -> String {
    format!(
        "ORIGINAL QUESTION: {}\n\nSQL QUERY EXECUTED:\n{}\n\n\
         DATA SUMMARY: The query returned {} rows and {} columns: {}\n\
         Error creating detailed context. Please analyze based on this basic information.",
        question,
        sql,
        shaped.row_count,
        shaped.column_count,
        shaped.columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{CellValue, Table};
    use crate::pipeline::shaper::{ResultShaper, MAX_CONTEXT_CHARS, TRUNCATION_MARKER};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Streaming {
        credentials: bool,
        chunks: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for Streaming {
        fn has_credentials(&self) -> bool {
            self.credentials
        }
        async fn complete(
            &self,
            _request: &CompletionRequest,
            _timeout: Duration,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.chunks.concat())
        }
        async fn complete_stream(
            &self,
            _request: &CompletionRequest,
            _timeout: Duration,
            sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for chunk in &self.chunks {
                sink(chunk);
            }
            Ok(self.chunks.concat())
        }
    }

    fn progress_table(rows: usize) -> Table {
        Table::new(
            vec!["Activity Name".into(), "Progress".into(), "Status".into()],
            (0..rows)
                .map(|i| {
                    vec![
                        CellValue::Text(format!("Pour slab section {} on level {}", i, i % 7)),
                        CellValue::Int((i % 100) as i64),
                        CellValue::Text(if i % 3 == 0 { "Complete" } else { "In Progress" }.into()),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn test_full_context_layout() {
        let shaped = ResultShaper::with_seed(0).shape(&progress_table(3));
        let context = query_context("How far along are we?", "SELECT 1", &shaped);
        assert!(context.starts_with("ORIGINAL QUESTION: How far along are we?\n\n"));
        assert!(context.contains("SQL QUERY EXECUTED:\nSELECT 1\n"));
        assert!(context.contains("- Total rows: 3"));
        assert!(context.contains("STATISTICAL SUMMARY:"));
        assert!(context.contains("  - min: 0"));
        assert!(context.contains("COMPLETE DATASET"));
        assert!(!context.contains("DATA SAMPLE"));
    }

    #[test]
    fn test_empty_result_context() {
        let shaped = ResultShaper::with_seed(0).shape(&progress_table(0));
        let context = query_context("q", "SELECT 1", &shaped);
        assert!(context.ends_with("DATA: No data found."));
        assert!(!context.contains("STATISTICAL SUMMARY"));
    }

    #[test]
    fn test_sampled_context_is_bounded() {
        let shaped = ResultShaper::with_seed(7).shape(&progress_table(500));
        let context = query_context("Show all activities", "SELECT * FROM activities", &shaped);
        assert!(context.contains("DATA SAMPLE (partial dataset"));
        assert!(context.contains("First rows:"));
        assert!(context.contains("Last rows:"));
        assert!(context.chars().count() <= MAX_CONTEXT_CHARS);
    }

    #[test]
    fn test_oversized_question_hits_ceiling() {
        let shaped = ResultShaper::with_seed(7).shape(&progress_table(500));
        let question = "why ".repeat(5000);
        let context = query_context(&question, "SELECT 1", &shaped);
        assert_eq!(context.chars().count(), MAX_CONTEXT_CHARS);
        assert!(context.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_minimal_context() {
        let shaped = ResultShaper::with_seed(0).shape(&progress_table(2));
        let context = minimal_context("q", "SELECT 1", &shaped);
        assert!(context.contains("returned 2 rows and 3 columns: Activity Name, Progress, Status"));
    }

    #[tokio::test]
    async fn test_missing_credentials_makes_no_call() {
        let backend = Arc::new(Streaming {
            credentials: false,
            chunks: vec!["x"],
            calls: AtomicUsize::new(0),
        });
        let summarizer = ResultSummarizer::new(backend.clone(), Duration::from_secs(1));
        let shaped = ResultShaper::with_seed(0).shape(&progress_table(2));
        let err = summarizer.summarize("q", "SELECT 1", &shaped).await.unwrap_err();
        assert_eq!(err, SummarizationError::MissingCredentials);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_concatenation_matches_result() {
        let backend = Arc::new(Streaming {
            credentials: true,
            chunks: vec!["Two ", "activities ", "exceed 75%."],
            calls: AtomicUsize::new(0),
        });
        let summarizer = ResultSummarizer::new(backend, Duration::from_secs(1));
        let shaped = ResultShaper::with_seed(0).shape(&progress_table(2));

        let mut seen = String::new();
        let mut sink = |chunk: &str| seen.push_str(chunk);
        let explanation = summarizer
            .summarize_stream("q", "SELECT 1", &shaped, &mut sink)
            .await
            .unwrap();
        assert_eq!(explanation, "Two activities exceed 75%.");
        assert_eq!(seen, explanation);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            SummarizationError::from(LlmError::Timeout(30)),
            SummarizationError::Timeout(30)
        );
        assert!(matches!(
            SummarizationError::from(LlmError::Http {
                status: 429,
                body: "rate limited".into()
            }),
            SummarizationError::UpstreamError(msg) if msg.contains("429")
        ));
    }
}
