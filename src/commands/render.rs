use std::fmt::Write as _;

use crate::db::schema::{ExecutionOutcome, SchemaInfo, Table};
use crate::pipeline::{Explanation, PipelineStatus, QueryTurn};
use crate::security::sanitize_for_display;

const MAX_CELL_WIDTH: usize = 40;

fn clip(text: &str) -> String {
    let text = sanitize_for_display(text).replace(['\n', '\r', '\t'], " ");
    if text.chars().count() <= MAX_CELL_WIDTH {
        return text;
    }
    let mut clipped: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
    clipped.push('…');
    clipped
}

/// Aligned text grid of at most `limit` rows, followed by the total count and
/// a notice when rows were left out.
pub fn render_table(table: &Table, limit: usize) -> String {
    let shown = table.row_count().min(limit);
    let header: Vec<String> = table.columns.iter().map(|c| clip(c)).collect();
    let body: Vec<Vec<String>> = table.rows[..shown]
        .iter()
        .map(|row| {
            (0..table.column_count())
                .map(|i| row.get(i).map(|v| clip(&v.to_string())).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", line(&header));
    let _ = writeln!(
        out,
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &body {
        let _ = writeln!(out, "{}", line(row));
    }

    if shown < table.row_count() {
        let _ = writeln!(
            out,
            "({} rows, showing the first {})",
            table.row_count(),
            shown
        );
    } else {
        let _ = writeln!(out, "({} rows)", table.row_count());
    }
    out
}

/// SQL plus its outcome. A failed execution still shows the attempted SQL.
pub fn render_turn(turn: &QueryTurn, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "SQL:\n{}\n", turn.sql);
    match &turn.outcome {
        None => out.push_str("(not executed; use :sql to run it)\n"),
        Some(Ok(ExecutionOutcome::Rows(table))) if table.is_empty() => {
            out.push_str("No data found.\n")
        }
        Some(Ok(ExecutionOutcome::Rows(table))) => out.push_str(&render_table(table, limit)),
        Some(Ok(ExecutionOutcome::Affected(n))) => {
            let _ = writeln!(out, "Query executed successfully. {} rows affected.", n);
        }
        Some(Err(e)) => {
            let _ = writeln!(out, "Error executing query: {}", e);
        }
    }
    if let Some(explanation) = &turn.explanation {
        out.push('\n');
        out.push_str(&render_explanation(explanation));
    }
    out
}

pub fn render_explanation(explanation: &Explanation) -> String {
    match explanation {
        Explanation::Text(text) => format!("{}\n", text),
        Explanation::Failed(err) => format!("Could not generate an explanation: {}\n", err),
    }
}

pub fn render_schema(schema: &SchemaInfo) -> String {
    let mut out = String::new();
    for (name, table) in &schema.tables {
        let _ = writeln!(out, "{} ({} columns)", name, table.columns.len());
        for column in &table.columns {
            let length = column
                .max_length
                .map(|n| format!("({})", n))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {} {}{}{}",
                column.name,
                column.data_type,
                length,
                if column.nullable { "" } else { " NOT NULL" }
            );
        }
    }
    if !schema.relationships.is_empty() {
        out.push_str("\nRelationships:\n");
        for rel in &schema.relationships {
            let _ = writeln!(
                out,
                "  {}: {}.{} -> {}.{}",
                rel.fk_name,
                rel.parent_table,
                rel.parent_column,
                rel.referenced_table,
                rel.referenced_column
            );
        }
    }
    out
}

pub fn render_status(status: &PipelineStatus) -> String {
    fn line(label: &str, result: &Result<(), String>) -> String {
        match result {
            Ok(()) => format!("{}: connected\n", label),
            Err(e) => format!("{}: unavailable ({})\n", label, e),
        }
    }
    let mut out = line("LLM API", &status.llm);
    out.push_str(&line("Database", &status.database));
    match status.schema_tables {
        Some(n) => {
            let _ = writeln!(out, "Schema: {} tables cached", n);
        }
        None => out.push_str("Schema: not loaded\n"),
    }
    out
}

pub const HELP: &str = "\
Type a question to generate and run SQL, or one of:
  :sql <statement>   run (edited) SQL for the current question
  :regen             regenerate SQL for the current question without running it
  :summarize         explain the current result
  :refresh           reload the database schema
  :schema            show tables, columns and relationships
  :peek <table>      run a sample query against one table
  :status            check the LLM API and database connections
  :export <path>     write the current result as CSV
  :import <csv> [t]  replace table t (default activities) with a CSV file
  :history [n]       show recent transcript entries
  :help              show this help
  :quit              exit
";
