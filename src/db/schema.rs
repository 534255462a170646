use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Snapshot of the connected database: every base table with its ordered
/// columns, plus all foreign-key edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: IndexMap<String, TableSchema>,
    pub relationships: Vec<Relationship>,
}

impl SchemaInfo {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Pretty JSON rendering embedded verbatim in the generation prompt.
    pub fn to_prompt_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
}

/// Column metadata as reported by the information schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub max_length: Option<i32>,
    pub default: Option<String>,
}

/// Directed foreign-key edge `parent_table.parent_column -> referenced_table.referenced_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub fk_name: String,
    pub parent_table: String,
    pub parent_column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// A single value read from a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Anything without a primitive mapping (binary, guid, money...), kept as its textual form.
    Other(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    /// Serializable form: primitives stay primitive, NaN becomes null and
    /// everything else is coerced to its string representation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(v) => serde_json::Value::Bool(*v),
            CellValue::Int(v) => serde_json::json!(v),
            CellValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(v) | CellValue::Other(v) => serde_json::Value::String(v.clone()),
            CellValue::Date(_) | CellValue::DateTime(_) => {
                serde_json::Value::String(self.to_string())
            }
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(v) | CellValue::Other(v) => f.write_str(v),
            CellValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            CellValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Named statement parameters. SQLite binds them as `:name`, SQL Server as `@name`.
pub type QueryParams = IndexMap<String, CellValue>;

/// Ordered result set: column names plus rows in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom. Short rows yield `Null`.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(index).unwrap_or(&CellValue::Null))
    }

    /// One row as a column-name keyed JSON record.
    pub fn record(&self, row_index: usize) -> IndexMap<String, serde_json::Value> {
        let mut record = IndexMap::with_capacity(self.columns.len());
        if let Some(row) = self.rows.get(row_index) {
            for (i, name) in self.columns.iter().enumerate() {
                let value = row.get(i).map(CellValue::to_json).unwrap_or_default();
                record.insert(name.clone(), value);
            }
        }
        record
    }

    /// RFC 4180 style CSV with a header line.
    pub fn to_csv(&self) -> String {
        fn escape(field: &str) -> String {
            if field.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.to_string()
            }
        }

        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| escape(c)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(|v| escape(&v.to_string())).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

/// What running a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(Table),
    Affected(u64),
}

impl ExecutionOutcome {
    pub fn table(&self) -> Option<&Table> {
        match self {
            ExecutionOutcome::Rows(table) => Some(table),
            ExecutionOutcome::Affected(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::new(
            vec!["Activity Id".into(), "Progress".into(), "Note".into()],
            vec![
                vec![
                    CellValue::Text("A100".into()),
                    CellValue::Int(80),
                    CellValue::Text("pour, cure".into()),
                ],
                vec![CellValue::Text("A200".into()), CellValue::Null, CellValue::Null],
            ],
        )
    }

    #[test]
    fn test_cell_to_json_primitives() {
        assert_eq!(CellValue::Null.to_json(), serde_json::Value::Null);
        assert_eq!(CellValue::Int(5).to_json(), serde_json::json!(5));
        assert_eq!(CellValue::Bool(true).to_json(), serde_json::json!(true));
        assert_eq!(CellValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_cell_to_json_coerces_temporal_to_string() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            CellValue::DateTime(dt).to_json(),
            serde_json::json!("2024-03-01 08:30:00")
        );
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(CellValue::Date(d).to_json(), serde_json::json!("2024-03-01"));
    }

    #[test]
    fn test_record_keeps_column_order() {
        let table = sample_table();
        let record = table.record(0);
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, vec!["Activity Id", "Progress", "Note"]);
        assert_eq!(record["Progress"], serde_json::json!(80));
    }

    #[test]
    fn test_column_values_pads_short_rows() {
        let table = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![CellValue::Int(1)]],
        );
        let values: Vec<&CellValue> = table.column_values(1).collect();
        assert_eq!(values, vec![&CellValue::Null]);
    }

    #[test]
    fn test_to_csv_quotes_fields() {
        let csv = sample_table().to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Activity Id,Progress,Note");
        assert_eq!(lines[1], "A100,80,\"pour, cure\"");
        assert_eq!(lines[2], "A200,,");
    }

    #[test]
    fn test_schema_prompt_json_uses_type_key() {
        let mut schema = SchemaInfo::default();
        schema.tables.insert(
            "activities".into(),
            TableSchema {
                columns: vec![ColumnInfo {
                    name: "Progress".into(),
                    data_type: "int".into(),
                    nullable: true,
                    max_length: None,
                    default: None,
                }],
            },
        );
        let json = schema.to_prompt_json().unwrap();
        assert!(json.contains("\"type\": \"int\""));
        assert!(json.contains("\"relationships\": []"));
    }
}
