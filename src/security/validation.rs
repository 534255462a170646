use std::fmt;

use crate::db::connectors::DatabaseEngine;

/// Errors raised by statement and identifier validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyInput,
    NullBytes,
    ReadOnlyViolation(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyInput => write!(f, "Input must not be empty"),
            ValidationError::NullBytes => write!(f, "Input contains null bytes"),
            ValidationError::ReadOnlyViolation(keyword) => write!(
                f,
                "{} statements are not allowed in read-only mode",
                keyword
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Whether a SQL batch only reads data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    /// Carries the keyword that made the batch a write.
    Write(String),
}

/// Leading keywords of statements that never modify data.
const READ_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "EXPLAIN"];

/// Keywords that turn an otherwise-reading statement into a write
/// (`WITH ... DELETE`, `SELECT ... INTO`).
const WRITE_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "MERGE", "INTO", "DROP"];

/// Blank out comments, string literals and quoted identifiers so keyword
/// scanning only sees code. Statement separators are preserved.
fn strip_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            '\'' | '"' | '[' | '`' => {
                let close = if c == '[' { ']' } else { c };
                while let Some(next) = chars.next() {
                    if next == close {
                        // doubled quote is an escaped quote
                        if chars.peek() == Some(&close) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Classify a SQL batch. A batch is `Read` only if every statement in it is.
pub fn classify_statement(sql: &str) -> StatementKind {
    let code = strip_literals(sql);

    for statement in code.split(';') {
        let words: Vec<String> = statement
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_uppercase())
            .collect();

        let Some(first) = words.first() else {
            continue;
        };

        if !READ_KEYWORDS.contains(&first.as_str()) {
            return StatementKind::Write(first.clone());
        }

        if let Some(write) = words[1..]
            .iter()
            .find(|w| WRITE_KEYWORDS.contains(&w.as_str()))
        {
            return StatementKind::Write(format!("{} ... {}", first, write));
        }
    }

    StatementKind::Read
}

/// The first `n` keywords of a batch, uppercased, ignoring comments and literals.
pub fn leading_keywords(sql: &str, n: usize) -> Vec<String> {
    strip_literals(sql)
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .take(n)
        .map(|w| w.to_uppercase())
        .collect()
}

/// Reject anything that is not a pure read.
pub fn ensure_read_only(sql: &str) -> Result<(), ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if sql.contains('\0') {
        return Err(ValidationError::NullBytes);
    }
    match classify_statement(sql) {
        StatementKind::Read => Ok(()),
        StatementKind::Write(keyword) => Err(ValidationError::ReadOnlyViolation(keyword)),
    }
}

/// Quote a table name as listed by the catalog. SQL Server lists tables
/// outside `dbo` as `schema.table`; each part is quoted on its own.
pub fn quote_table_name(engine: DatabaseEngine, name: &str) -> String {
    match (engine, name.split_once('.')) {
        (DatabaseEngine::SqlServer, Some((schema, table)))
            if !schema.is_empty() && !table.is_empty() =>
        {
            format!(
                "{}.{}",
                quote_identifier(engine, schema),
                quote_identifier(engine, table)
            )
        }
        _ => quote_identifier(engine, name),
    }
}

/// Quote an identifier for the engine's dialect, e.g. `[Activity Id]` on SQL Server.
pub fn quote_identifier(engine: DatabaseEngine, name: &str) -> String {
    match engine {
        DatabaseEngine::SqlServer => format!("[{}]", name.replace(']', "]]")),
        DatabaseEngine::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Strip control characters from a string for safe display.
/// Preserves newlines, carriage returns, and tabs.
pub fn sanitize_for_display(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\r' || *c == '\t')
        .collect()
}

/// Keep the first `keep` characters of a secret-bearing value for logs.
pub fn redact(value: &str, keep: usize) -> String {
    if value.chars().count() <= keep {
        return value.to_string();
    }
    let prefix: String = value.chars().take(keep).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- classify_statement tests ---

    #[test]
    fn test_select_is_read() {
        assert_eq!(
            classify_statement("SELECT * FROM activities WHERE Progress > 75"),
            StatementKind::Read
        );
        assert_eq!(
            classify_statement("  \n select [Activity Id] from activities;"),
            StatementKind::Read
        );
    }

    #[test]
    fn test_cte_select_is_read() {
        let sql = "WITH late AS (SELECT * FROM activities WHERE EndDate < GETDATE()) \
                   SELECT COUNT(*) FROM late";
        assert_eq!(classify_statement(sql), StatementKind::Read);
    }

    #[test]
    fn test_cte_delete_is_write() {
        let sql = "WITH done AS (SELECT * FROM activities WHERE Progress = 100) DELETE FROM done";
        assert_eq!(
            classify_statement(sql),
            StatementKind::Write("WITH ... DELETE".to_string())
        );
    }

    #[test]
    fn test_dml_is_write() {
        assert_eq!(
            classify_statement("UPDATE activities SET Progress = 100"),
            StatementKind::Write("UPDATE".to_string())
        );
        assert_eq!(
            classify_statement("drop table activities"),
            StatementKind::Write("DROP".to_string())
        );
    }

    #[test]
    fn test_select_into_is_write() {
        assert!(matches!(
            classify_statement("SELECT * INTO backup FROM activities"),
            StatementKind::Write(_)
        ));
    }

    #[test]
    fn test_batch_with_trailing_write_is_write() {
        assert!(matches!(
            classify_statement("SELECT 1; DELETE FROM activities"),
            StatementKind::Write(_)
        ));
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        let sql = "SELECT * FROM activities WHERE WBS1 = 'DELETE; DROP' AND [Update Note] IS NULL";
        assert_eq!(classify_statement(sql), StatementKind::Read);
    }

    #[test]
    fn test_comments_are_skipped() {
        let sql = "-- DELETE everything\n/* DROP TABLE x; */ SELECT 1";
        assert_eq!(classify_statement(sql), StatementKind::Read);
        assert!(matches!(
            classify_statement("/* read */ DELETE FROM activities"),
            StatementKind::Write(_)
        ));
    }

    #[test]
    fn test_escaped_quotes() {
        let sql = "SELECT * FROM activities WHERE Trade_Partners = 'O''Neil; DELETE'";
        assert_eq!(classify_statement(sql), StatementKind::Read);
    }

    // --- ensure_read_only tests ---

    #[test]
    fn test_ensure_read_only() {
        assert!(ensure_read_only("SELECT 1").is_ok());
        assert_eq!(ensure_read_only("   "), Err(ValidationError::EmptyInput));
        assert_eq!(
            ensure_read_only("INSERT INTO t VALUES (1)"),
            Err(ValidationError::ReadOnlyViolation("INSERT".to_string()))
        );
        assert_eq!(ensure_read_only("SELECT 1\0"), Err(ValidationError::NullBytes));
    }

    // --- quote_identifier tests ---

    #[test]
    fn test_quote_identifier() {
        assert_eq!(
            quote_identifier(DatabaseEngine::SqlServer, "Activity Id"),
            "[Activity Id]"
        );
        assert_eq!(quote_identifier(DatabaseEngine::SqlServer, "a]b"), "[a]]b]");
        assert_eq!(
            quote_identifier(DatabaseEngine::Sqlite, "Activity \"Id\""),
            "\"Activity \"\"Id\"\"\""
        );
    }

    #[test]
    fn test_quote_table_name_splits_sql_server_schema() {
        assert_eq!(
            quote_table_name(DatabaseEngine::SqlServer, "planning.activities"),
            "[planning].[activities]"
        );
        assert_eq!(
            quote_table_name(DatabaseEngine::SqlServer, "Project Activities"),
            "[Project Activities]"
        );
        // SQLite lists bare names only, so a dot is part of the name.
        assert_eq!(
            quote_table_name(DatabaseEngine::Sqlite, "odd.name"),
            "\"odd.name\""
        );
    }

    #[test]
    fn test_leading_keywords() {
        assert_eq!(
            leading_keywords("-- build\n/* v2 */ create or alter VIEW late AS SELECT 1", 4),
            vec!["CREATE", "OR", "ALTER", "VIEW"]
        );
        assert_eq!(leading_keywords("  ", 2), Vec::<String>::new());
    }

    // --- sanitize_for_display tests ---

    #[test]
    fn test_sanitize_preserves_whitespace() {
        assert_eq!(
            sanitize_for_display("hello\tworld\nfoo\r\nbar"),
            "hello\tworld\nfoo\r\nbar"
        );
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_display("hello\x07world"), "helloworld");
        assert_eq!(sanitize_for_display("\x1b[31mred"), "[31mred");
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("https://example.openai.azure.com/x", 8), "https://...");
        assert_eq!(redact("short", 8), "short");
    }
}
