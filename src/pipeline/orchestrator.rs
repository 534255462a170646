use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmSettings, PipelineOptions};
use crate::db::connectors::DatabaseEngine;
use crate::db::catalog::{SchemaCatalog, SchemaUnavailable};
use crate::db::gateway::{DatabaseGateway, ExecutionError};
use crate::db::import::{self, ImportData};
use crate::db::schema::{ExecutionOutcome, SchemaInfo};
use crate::llm::CompletionBackend;
use crate::pipeline::generator::{GenerationError, SqlGenerator};
use crate::pipeline::shaper::ResultShaper;
use crate::pipeline::summarizer::{ResultSummarizer, SummarizationError};
use crate::security::ensure_read_only;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Generating,
    Executing,
    Ready,
    Summarizing,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaUnavailable),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Summarization(#[from] SummarizationError),
    #[error("there is no result table to summarize")]
    NothingToSummarize,
}

/// Explanation slot of a turn: the prose, or the error shown in its place.
#[derive(Debug, Clone, PartialEq)]
pub enum Explanation {
    Text(String),
    Failed(String),
}

/// The single current question/SQL/result/explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTurn {
    pub question: String,
    pub sql: String,
    pub outcome: Option<Result<ExecutionOutcome, ExecutionError>>,
    pub explanation: Option<Explanation>,
}

impl QueryTurn {
    fn new(question: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sql: sql.into(),
            outcome: None,
            explanation: None,
        }
    }
}

/// Health of both upstream dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub llm: Result<(), String>,
    pub database: Result<(), String>,
    pub schema_tables: Option<usize>,
}

/// Sequences generate -> execute -> shape -> summarize and holds the current
/// turn. Every action runs to completion before the next one starts.
pub struct Pipeline {
    gateway: DatabaseGateway,
    catalog: SchemaCatalog,
    generator: SqlGenerator,
    shaper: ResultShaper,
    summarizer: ResultSummarizer,
    backend: Arc<dyn CompletionBackend>,
    health_check_timeout: Duration,
    options: PipelineOptions,
    state: PipelineState,
    turn: Option<QueryTurn>,
}

impl Pipeline {
    pub fn new(
        gateway: DatabaseGateway,
        backend: Arc<dyn CompletionBackend>,
        llm: &LlmSettings,
        options: PipelineOptions,
    ) -> Self {
        Self {
            gateway,
            catalog: SchemaCatalog::new(),
            generator: SqlGenerator::new(backend.clone(), llm.generation_timeout()),
            shaper: ResultShaper::new(),
            summarizer: ResultSummarizer::new(backend.clone(), llm.summary_timeout()),
            backend,
            health_check_timeout: llm.health_check_timeout(),
            options,
            state: PipelineState::Idle,
            turn: None,
        }
    }

    pub fn with_shaper(mut self, shaper: ResultShaper) -> Self {
        self.shaper = shaper;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn current_turn(&self) -> Option<&QueryTurn> {
        self.turn.as_ref()
    }

    pub fn engine(&self) -> DatabaseEngine {
        self.gateway.engine()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("Pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// New natural-language turn. The previous turn is discarded up front; a
    /// generation failure leaves the pipeline idle with no SQL to show.
    pub async fn submit(&mut self, question: &str) -> Result<&QueryTurn, PipelineError> {
        let sql = self.generate(question).await?;
        Ok(self.run_turn(QueryTurn::new(question.trim(), sql)).await)
    }

    /// Generate SQL for a question without running it, so it can be reviewed
    /// or edited first.
    pub async fn generate_sql(&mut self, question: &str) -> Result<String, PipelineError> {
        let sql = self.generate(question).await?;
        self.turn = Some(QueryTurn::new(question.trim(), sql.clone()));
        self.transition(PipelineState::Ready);
        Ok(sql)
    }

    async fn generate(&mut self, question: &str) -> Result<String, PipelineError> {
        self.turn = None;
        self.transition(PipelineState::Generating);

        let result = match self.catalog.load(&mut self.gateway, false).await {
            Ok(schema) => self
                .generator
                .generate(question, schema)
                .await
                .map_err(PipelineError::from),
            Err(e) => Err(PipelineError::from(e)),
        };

        if let Err(e) = &result {
            log::warn!("SQL generation failed: {}", e);
            self.transition(PipelineState::Idle);
        }
        result
    }

    /// Run caller-supplied SQL as the current turn's statement, bypassing
    /// generation. The question is kept; any previous result and explanation
    /// are replaced.
    pub async fn execute_sql(&mut self, sql: &str) -> &QueryTurn {
        let question = self.turn.take().map(|t| t.question).unwrap_or_default();
        self.run_turn(QueryTurn::new(question, sql.trim())).await
    }

    /// Run SQL as a fresh turn under its own question, e.g. a table preview.
    pub async fn execute_as(&mut self, question: &str, sql: &str) -> &QueryTurn {
        self.turn = None;
        self.run_turn(QueryTurn::new(question.trim(), sql.trim())).await
    }

    /// Executing always ends in Ready; the outcome carries success or failure.
    async fn run_turn(&mut self, mut turn: QueryTurn) -> &QueryTurn {
        self.transition(PipelineState::Executing);

        let guard = if self.options.read_only {
            ensure_read_only(&turn.sql).map_err(|e| ExecutionError::new(format!("Refused: {}", e)))
        } else {
            Ok(())
        };
        let outcome = match guard {
            Ok(()) => self.gateway.execute(&turn.sql, None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            log::warn!("Execution failed: {}", e);
        }

        turn.outcome = Some(outcome);
        turn.explanation = None;
        self.transition(PipelineState::Ready);
        self.turn.insert(turn)
    }

    /// Explain the current result table. A failure is also recorded in the
    /// turn in place of the explanation; the result itself is kept.
    pub async fn summarize(&mut self) -> Result<&str, PipelineError> {
        self.summarize_with(None).await
    }

    pub async fn summarize_stream(
        &mut self,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<&str, PipelineError> {
        self.summarize_with(Some(sink)).await
    }

    async fn summarize_with(
        &mut self,
        sink: Option<&mut (dyn for<'s> FnMut(&'s str) + Send)>,
    ) -> Result<&str, PipelineError> {
        let Some(turn) = self.turn.as_ref() else {
            return Err(PipelineError::NothingToSummarize);
        };
        let Some(Ok(ExecutionOutcome::Rows(table))) = &turn.outcome else {
            return Err(PipelineError::NothingToSummarize);
        };

        log::debug!("Pipeline state {:?} -> Summarizing", self.state);
        self.state = PipelineState::Summarizing;

        let shaped = self.shaper.shape(table);
        let result = match sink {
            Some(sink) => {
                self.summarizer
                    .summarize_stream(&turn.question, &turn.sql, &shaped, sink)
                    .await
            }
            None => {
                self.summarizer
                    .summarize(&turn.question, &turn.sql, &shaped)
                    .await
            }
        };

        self.transition(PipelineState::Ready);
        let Some(turn) = self.turn.as_mut() else {
            return Err(PipelineError::NothingToSummarize);
        };
        match result {
            Ok(text) => {
                turn.explanation = Some(Explanation::Text(text));
                match &turn.explanation {
                    Some(Explanation::Text(text)) => Ok(text.as_str()),
                    _ => Err(PipelineError::NothingToSummarize),
                }
            }
            Err(e) => {
                log::warn!("Summarization failed: {}", e);
                turn.explanation = Some(Explanation::Failed(e.to_string()));
                Err(PipelineError::Summarization(e))
            }
        }
    }

    /// Replace `table_name` with imported rows and drop the cached schema.
    pub async fn import_table(
        &mut self,
        table_name: &str,
        data: &ImportData,
    ) -> Result<u64, ExecutionError> {
        if self.options.read_only {
            return Err(ExecutionError::new(
                "Refused: imports are disabled in read-only mode",
            ));
        }
        let written = import::import_table(&mut self.gateway, table_name, data).await?;
        self.catalog.invalidate();
        Ok(written)
    }

    pub async fn schema(&mut self) -> Result<&SchemaInfo, PipelineError> {
        Ok(self.catalog.load(&mut self.gateway, false).await?)
    }

    pub async fn refresh_schema(&mut self) -> Result<&SchemaInfo, PipelineError> {
        log::info!("Refreshing schema");
        Ok(self.catalog.load(&mut self.gateway, true).await?)
    }

    /// Check the completion endpoint and the database connection.
    pub async fn status(&mut self) -> PipelineStatus {
        let llm = if self.backend.has_credentials() {
            self.backend
                .health_check(self.health_check_timeout)
                .await
                .map_err(|e| e.to_string())
        } else {
            Err("credentials are not configured".to_string())
        };
        let database = self
            .gateway
            .test_connection()
            .await
            .map_err(|e| e.to_string());
        PipelineStatus {
            llm,
            database,
            schema_tables: self.catalog.cached().map(SchemaInfo::table_count),
        }
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.gateway.disconnect().await {
            log::warn!("Error closing database connection: {}", e);
        }
    }
}
