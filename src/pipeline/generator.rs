use std::sync::Arc;
use std::time::Duration;

use crate::db::schema::SchemaInfo;
use crate::llm::{CompletionBackend, CompletionRequest, LlmError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Azure OpenAI API credentials are missing")]
    MissingCredentials,
    #[error("please provide a natural language question")]
    EmptyQuestion,
    #[error("error generating SQL query: {0}")]
    UpstreamError(String),
    #[error("received unexpected response format from the LLM API")]
    UnexpectedFormat,
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MissingCredentials => GenerationError::MissingCredentials,
            LlmError::UnexpectedFormat => GenerationError::UnexpectedFormat,
            other => GenerationError::UpstreamError(other.to_string()),
        }
    }
}

/// Turns a natural-language question into one SQL statement, using the full
/// schema as prompt context.
pub struct SqlGenerator {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaInfo,
    ) -> Result<String, GenerationError> {
        if !self.backend.has_credentials() {
            return Err(GenerationError::MissingCredentials);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(GenerationError::EmptyQuestion);
        }

        let system = system_prompt(schema)
            .map_err(|e| GenerationError::UpstreamError(format!("schema serialization: {}", e)))?;
        let request = CompletionRequest::new(system, format!("Generate a SQL query for: {}", question))
            .max_tokens(500)
            .temperature(0.1)
            .top_p(0.95);

        let raw = self.backend.complete(&request, self.timeout).await?;
        let sql = strip_code_fences(&raw);
        if sql.is_empty() {
            return Err(GenerationError::UnexpectedFormat);
        }

        log::info!("Generated SQL ({} chars) for question: {}", sql.len(), question);
        Ok(sql)
    }
}

fn system_prompt(schema: &SchemaInfo) -> serde_json::Result<String> {
    let schema_json = schema.to_prompt_json()?;
    Ok(format!(
        "You are an expert SQL query generator for a construction project management database.
Your task is to convert natural language questions into valid SQL queries.

DATABASE SCHEMA:
{schema_json}

IMPORTANT GUIDELINES:
1. Focus primarily on the 'activities' table.
2. Generate only the SQL query without explanations.
3. Use proper SQL syntax for SQL Server.
4. WBS parent items have no Status; actual activities have one. Exclude the parent items from results.
5. Enclose column names in square brackets when they contain spaces or special characters.
6. For date operations, use proper SQL Server date functions.
7. If the query involves filtering by WBS levels, make appropriate comparisons considering data types.
8. Return only the SQL query, nothing else.
"
    ))
}

/// Remove a Markdown code fence (```sql or bare ```) around a completion and
/// trim whitespace.
pub fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (`sql`, `tsql`, ...) up to the first newline.
        text = match rest.find('\n') {
            Some(pos) if !rest[..pos].trim().contains(' ') => &rest[pos + 1..],
            _ => strip_language_tag(rest),
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim().to_string()
}

/// Info strings a model puts on the same line as the SQL (```` ```sql SELECT 1``` ````).
const LANGUAGE_TAGS: &[&str] = &["sql", "tsql", "t-sql", "mssql", "sqlite"];

fn strip_language_tag(text: &str) -> &str {
    let Some((tag, rest)) = text.split_once(char::is_whitespace) else {
        return text;
    };
    if LANGUAGE_TAGS.iter().any(|t| tag.eq_ignore_ascii_case(t)) {
        rest
    } else {
        text
    }
}
