pub mod validation;

// Re-export key types and functions for convenient access
pub use validation::{
    classify_statement, ensure_read_only, leading_keywords, quote_identifier, quote_table_name,
    redact, sanitize_for_display,
    StatementKind, ValidationError,
};
