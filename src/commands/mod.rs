pub mod render;

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::db::connectors::DatabaseEngine;
use crate::db::import;
use crate::db::schema::ExecutionOutcome;
use crate::pipeline::{Pipeline, QueryTurn};
use crate::security::quote_table_name;
use crate::transcript::{TranscriptEntry, TranscriptStore};

const PEEK_ROWS: usize = 20;
const DEFAULT_HISTORY: usize = 10;
const DEFAULT_IMPORT_TABLE: &str = "activities";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Sql(String),
    Regen,
    Summarize,
    Refresh,
    Schema,
    Peek(String),
    Status,
    Export(PathBuf),
    Import(PathBuf, String),
    History(usize),
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Ask(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let require = |what: &str| -> Result<String, String> {
        if arg.is_empty() {
            Err(format!(":{} needs {}", name, what))
        } else {
            Ok(arg.to_string())
        }
    };

    match name.to_lowercase().as_str() {
        "sql" => require("a SQL statement").map(Command::Sql),
        "regen" => Ok(Command::Regen),
        "summarize" | "explain" => Ok(Command::Summarize),
        "refresh" => Ok(Command::Refresh),
        "schema" => Ok(Command::Schema),
        "peek" => require("a table name").map(Command::Peek),
        "status" => Ok(Command::Status),
        "export" => require("a file path").map(|p| Command::Export(PathBuf::from(p))),
        "import" => {
            let arg = require("a CSV file path")?;
            let (path, table) = match arg.rsplit_once(char::is_whitespace) {
                Some((path, table)) if !table.to_lowercase().ends_with(".csv") => {
                    (path.trim(), table)
                }
                _ => (arg.as_str(), DEFAULT_IMPORT_TABLE),
            };
            Ok(Command::Import(PathBuf::from(path), table.to_string()))
        }
        "history" if arg.is_empty() => Ok(Command::History(DEFAULT_HISTORY)),
        "history" => arg
            .parse()
            .map(Command::History)
            .map_err(|_| format!("invalid history count: {}", arg)),
        "help" | "h" | "?" => Ok(Command::Help),
        "quit" | "q" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command :{} (try :help)", other)),
    }
}

/// Sample query for one table in the engine's dialect.
pub fn peek_sql(engine: DatabaseEngine, table: &str) -> String {
    let quoted = quote_table_name(engine, table);
    match engine {
        DatabaseEngine::SqlServer => format!("SELECT TOP {} * FROM {}", PEEK_ROWS, quoted),
        DatabaseEngine::Sqlite => format!("SELECT * FROM {} LIMIT {}", quoted, PEEK_ROWS),
    }
}

/// Interactive session: the pipeline, the optional transcript and where
/// output goes.
pub struct Session<W: Write + Send> {
    pipeline: Pipeline,
    transcript: Option<TranscriptStore>,
    out: W,
    /// Transcript row of the current turn, rewritten when the turn changes.
    last_entry: Option<TranscriptEntry>,
}

impl<W: Write + Send> Session<W> {
    pub fn new(pipeline: Pipeline, transcript: Option<TranscriptStore>, out: W) -> Self {
        Self {
            pipeline,
            transcript,
            out,
            last_entry: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub async fn shutdown(&mut self) {
        self.pipeline.shutdown().await;
    }

    /// Parse and run one input line.
    pub async fn handle_line(&mut self, line: &str) -> std::io::Result<Flow> {
        match parse_command(line) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                writeln!(self.out, "{}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    pub async fn handle(&mut self, command: Command) -> std::io::Result<Flow> {
        let limit = self.pipeline.options().display_row_limit;
        match command {
            Command::Empty => {}
            Command::Quit => return Ok(Flow::Quit),
            Command::Help => write!(self.out, "{}", render::HELP)?,

            Command::Ask(question) => match self.pipeline.submit(&question).await {
                Ok(turn) => {
                    write!(self.out, "{}", render::render_turn(turn, limit))?;
                    let entry = TranscriptEntry::from_turn(turn);
                    self.record(entry, true).await;
                }
                Err(e) => writeln!(self.out, "Error: {}", e)?,
            },

            Command::Sql(sql) => {
                let turn = self.pipeline.execute_sql(&sql).await;
                write!(self.out, "{}", render::render_turn(turn, limit))?;
                let entry = TranscriptEntry::from_turn(turn);
                self.record(entry, true).await;
            }

            Command::Peek(table) => {
                let sql = peek_sql(self.pipeline.engine(), &table);
                let question = format!("Sample rows from {}", table);
                let turn = self.pipeline.execute_as(&question, &sql).await;
                write!(self.out, "{}", render::render_turn(turn, limit))?;
                let entry = TranscriptEntry::from_turn(turn);
                self.record(entry, true).await;
            }

            Command::Regen => {
                let question = match self.pipeline.current_turn() {
                    Some(turn) if !turn.question.is_empty() => turn.question.clone(),
                    _ => {
                        writeln!(self.out, "No question to regenerate SQL for.")?;
                        return Ok(Flow::Continue);
                    }
                };
                match self.pipeline.generate_sql(&question).await {
                    Ok(sql) => {
                        writeln!(
                            self.out,
                            "SQL:\n{}\n\n(not executed; edit and run it with :sql)",
                            sql
                        )?;
                        if let Some(turn) = self.pipeline.current_turn() {
                            let entry = TranscriptEntry::from_turn(turn);
                            self.record(entry, true).await;
                        }
                    }
                    Err(e) => writeln!(self.out, "Error: {}", e)?,
                }
            }

            Command::Summarize => {
                let out = &mut self.out;
                let mut sink = |chunk: &str| {
                    if let Err(e) = out.write_all(chunk.as_bytes()).and_then(|_| out.flush()) {
                        log::warn!("Failed to write explanation output: {}", e);
                    }
                };
                let result = self.pipeline.summarize_stream(&mut sink).await.map(|_| ());
                match result {
                    Ok(()) => writeln!(self.out)?,
                    Err(e) => writeln!(self.out, "Could not generate an explanation: {}", e)?,
                }
                // Only a turn that was actually explained changes its row.
                if let Some(turn) = self.pipeline.current_turn() {
                    if turn.explanation.is_some() {
                        let entry = TranscriptEntry::from_turn(turn);
                        self.record(entry, false).await;
                    }
                }
            }

            Command::Refresh => match self.pipeline.refresh_schema().await {
                Ok(schema) => writeln!(
                    self.out,
                    "Schema refreshed: {} tables, {} relationships.",
                    schema.table_count(),
                    schema.relationships.len()
                )?,
                Err(e) => writeln!(self.out, "Error: {}", e)?,
            },

            Command::Schema => match self.pipeline.schema().await {
                Ok(schema) => write!(self.out, "{}", render::render_schema(schema))?,
                Err(e) => writeln!(self.out, "Error: {}", e)?,
            },

            Command::Status => {
                let status = self.pipeline.status().await;
                write!(self.out, "{}", render::render_status(&status))?;
            }

            Command::Export(path) => self.export(&path)?,

            Command::Import(path, table) => self.import(&path, &table).await?,

            Command::History(limit) => self.history(limit).await?,
        }
        Ok(Flow::Continue)
    }

    fn export(&mut self, path: &Path) -> std::io::Result<()> {
        let table = match self.pipeline.current_turn().and_then(|t| t.outcome.as_ref()) {
            Some(Ok(ExecutionOutcome::Rows(table))) => table,
            _ => return writeln!(self.out, "No result table to export."),
        };
        match std::fs::write(path, table.to_csv()) {
            Ok(()) => {
                log::info!("Exported {} rows to {:?}", table.row_count(), path);
                writeln!(self.out, "Wrote {} rows to {}", table.row_count(), path.display())
            }
            Err(e) => writeln!(self.out, "Export failed: {}", e),
        }
    }

    async fn import(&mut self, path: &Path, table: &str) -> std::io::Result<()> {
        let data = match import::read_csv(path) {
            Ok(data) => data,
            Err(e) => return writeln!(self.out, "Import failed: {:#}", e),
        };
        match self.pipeline.import_table(table, &data).await {
            Ok(written) => writeln!(
                self.out,
                "Imported {} rows x {} columns into {}.",
                written,
                data.table.column_count(),
                table
            ),
            Err(e) => writeln!(self.out, "Import failed: {}", e),
        }
    }

    async fn history(&mut self, limit: usize) -> std::io::Result<()> {
        let Some(store) = &self.transcript else {
            return writeln!(self.out, "Transcript is disabled (start with --transcript <path>).");
        };
        match store.recent(limit).await {
            Ok(entries) if entries.is_empty() => writeln!(self.out, "Transcript is empty."),
            Ok(entries) => {
                for entry in entries {
                    writeln!(self.out, "[{}] {}", entry.recorded_at, entry.question)?;
                    writeln!(self.out, "  {}", entry.sql.replace('\n', " "))?;
                    writeln!(self.out, "  -> {}", entry.outcome)?;
                }
                Ok(())
            }
            Err(e) => writeln!(self.out, "Error: {}", e),
        }
    }

    /// Write the current turn to the transcript. A summary updates the row of
    /// the turn it explains instead of adding a new one; the row is only
    /// reused when it holds the same question and SQL.
    async fn record(&mut self, mut entry: TranscriptEntry, new_turn: bool) {
        let Some(store) = &self.transcript else {
            return;
        };
        if !new_turn {
            if let Some(previous) = &self.last_entry {
                if previous.question == entry.question && previous.sql == entry.sql {
                    entry.id = previous.id.clone();
                    entry.recorded_at = previous.recorded_at.clone();
                }
            }
        }
        if let Err(e) = store.record(entry.clone()).await {
            log::warn!("{}", e);
        }
        self.last_entry = Some(entry);
    }
}

/// Whether a turn produced rows worth offering a summary for.
pub fn has_rows(turn: &QueryTurn) -> bool {
    matches!(&turn.outcome, Some(Ok(ExecutionOutcome::Rows(t))) if !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question() {
        assert_eq!(
            parse_command("  Show delayed activities  "),
            Ok(Command::Ask("Show delayed activities".into()))
        );
        assert_eq!(parse_command("   "), Ok(Command::Empty));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command(":sql SELECT * FROM activities"),
            Ok(Command::Sql("SELECT * FROM activities".into()))
        );
        assert_eq!(parse_command(":SUMMARIZE"), Ok(Command::Summarize));
        assert_eq!(parse_command(":history"), Ok(Command::History(10)));
        assert_eq!(parse_command(":history 3"), Ok(Command::History(3)));
        assert_eq!(
            parse_command(":export out/result.csv"),
            Ok(Command::Export(PathBuf::from("out/result.csv")))
        );
        assert_eq!(
            parse_command(":peek Project Activities"),
            Ok(Command::Peek("Project Activities".into()))
        );
        assert_eq!(parse_command(":q"), Ok(Command::Quit));
        assert_eq!(
            parse_command(":import data/schedule.csv"),
            Ok(Command::Import(PathBuf::from("data/schedule.csv"), "activities".into()))
        );
        assert_eq!(
            parse_command(":import data/schedule.csv tasks"),
            Ok(Command::Import(PathBuf::from("data/schedule.csv"), "tasks".into()))
        );
        assert_eq!(
            parse_command(":import My Schedule.csv"),
            Ok(Command::Import(PathBuf::from("My Schedule.csv"), "activities".into()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command(":sql").unwrap_err().contains("needs a SQL statement"));
        assert!(parse_command(":history many").is_err());
        assert!(parse_command(":import").unwrap_err().contains("needs a CSV file path"));
        assert!(parse_command(":drop").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn test_peek_sql_quotes_identifiers() {
        assert_eq!(
            peek_sql(DatabaseEngine::SqlServer, "Project Activities"),
            "SELECT TOP 20 * FROM [Project Activities]"
        );
        assert_eq!(
            peek_sql(DatabaseEngine::Sqlite, "odd\"name"),
            "SELECT * FROM \"odd\"\"name\" LIMIT 20"
        );
        assert_eq!(
            peek_sql(DatabaseEngine::SqlServer, "planning.activities"),
            "SELECT TOP 20 * FROM [planning].[activities]"
        );
    }
}
