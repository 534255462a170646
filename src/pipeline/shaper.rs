use chrono::NaiveDateTime;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::db::schema::{CellValue, Table};

/// Results at or below this many rows are forwarded in full.
pub const FULL_CONTEXT_THRESHOLD: usize = 100;
pub const NO_DATA_MARKER: &str = "No data found.";
pub const MAX_CONTEXT_CHARS: usize = 8000;
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated due to size limitations]";

const FIRST_ROWS: usize = 10;
const LAST_ROWS: usize = 5;
const MIDDLE_SAMPLE: usize = 5;
const TOP_VALUES: usize = 5;

/// One row keyed by column name, values already reduced to JSON primitives.
pub type Record = IndexMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnStats {
    Numeric {
        min: f64,
        max: f64,
        mean: f64,
        median: f64,
    },
    Temporal {
        min: String,
        max: String,
    },
    Textual {
        unique_values: usize,
        most_common: IndexMap<String, usize>,
    },
    Unavailable {
        note: String,
    },
}

impl ColumnStats {
    fn unavailable() -> Self {
        ColumnStats::Unavailable {
            note: "unavailable".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleData {
    pub first_rows: Vec<Record>,
    pub middle_sample: Vec<Record>,
    pub last_rows: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FullData {
    Marker(String),
    Rows(Vec<Record>),
}

/// Size-bounded view of a result table handed to the summarizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapedResult {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    pub is_summarized: bool,
    pub summary_stats: IndexMap<String, ColumnStats>,
    pub full_data: Option<FullData>,
    pub sample_data: Option<SampleData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Numeric,
    Temporal,
    Textual,
}

#[derive(Debug)]
struct StatsError(String);

fn kind_of(value: &CellValue) -> Option<ColumnKind> {
    match value {
        CellValue::Null => None,
        CellValue::Float(f) if f.is_nan() => None,
        // Flags count as numbers (true = 1), so their mean is the share set.
        CellValue::Bool(_) | CellValue::Int(_) | CellValue::Float(_) => Some(ColumnKind::Numeric),
        CellValue::Date(_) | CellValue::DateTime(_) => Some(ColumnKind::Temporal),
        CellValue::Text(_) | CellValue::Other(_) => Some(ColumnKind::Textual),
    }
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a CellValue>) -> Result<ColumnKind, StatsError> {
    let mut kind = None;
    for value in values {
        match (kind, kind_of(value)) {
            (_, None) => {}
            (None, Some(k)) => kind = Some(k),
            (Some(a), Some(b)) if a != b => {
                return Err(StatsError(format!("mixed {:?} and {:?} values", a, b)))
            }
            _ => {}
        }
    }
    kind.ok_or_else(|| StatsError("no non-null values".to_string()))
}

fn numeric_stats(values: &[&CellValue]) -> Result<ColumnStats, StatsError> {
    let mut nums: Vec<f64> = values
        .iter()
        .filter_map(|v| match v {
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        })
        .collect();
    if nums.is_empty() {
        return Err(StatsError("no numeric values".to_string()));
    }
    nums.sort_by(|a, b| a.total_cmp(b));

    let n = nums.len();
    let median = if n % 2 == 1 {
        nums[n / 2]
    } else {
        (nums[n / 2 - 1] + nums[n / 2]) / 2.0
    };
    Ok(ColumnStats::Numeric {
        min: nums[0],
        max: nums[n - 1],
        mean: nums.iter().sum::<f64>() / n as f64,
        median,
    })
}

fn temporal_stats(values: &[&CellValue]) -> Result<ColumnStats, StatsError> {
    let mut points: Vec<(NaiveDateTime, String)> = Vec::new();
    for value in values {
        match value {
            CellValue::Date(d) => {
                if let Some(at) = d.and_hms_opt(0, 0, 0) {
                    points.push((at, value.to_string()));
                }
            }
            CellValue::DateTime(dt) => points.push((*dt, value.to_string())),
            _ => {}
        }
    }
    let min = points.iter().min_by_key(|(at, _)| *at);
    let max = points.iter().max_by_key(|(at, _)| *at);
    match (min, max) {
        (Some((_, min)), Some((_, max))) => Ok(ColumnStats::Temporal {
            min: min.clone(),
            max: max.clone(),
        }),
        _ => Err(StatsError("no temporal values".to_string())),
    }
}

fn textual_stats(values: &[&CellValue]) -> ColumnStats {
    // Insertion order doubles as first-appearance tie-break.
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for value in values.iter().filter(|v| !v.is_null()) {
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    let unique_values = counts.len();

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ColumnStats::Textual {
        unique_values,
        most_common: ranked.into_iter().take(TOP_VALUES).collect(),
    }
}

fn column_stats(table: &Table, index: usize) -> Result<ColumnStats, StatsError> {
    let values: Vec<&CellValue> = table.column_values(index).collect();
    match infer_kind(values.iter().copied())? {
        ColumnKind::Numeric => numeric_stats(&values),
        ColumnKind::Temporal => temporal_stats(&values),
        ColumnKind::Textual => Ok(textual_stats(&values)),
    }
}

/// Build per-column statistics. A column that cannot be described is marked
/// unavailable; the others are unaffected.
pub fn summary_stats(table: &Table) -> IndexMap<String, ColumnStats> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let stats = column_stats(table, i).unwrap_or_else(|e| {
                log::warn!("Could not calculate statistics for column {}: {}", name, e.0);
                ColumnStats::unavailable()
            });
            (name.clone(), stats)
        })
        .collect()
}

/// Decides between forwarding a result in full or as a representative sample.
pub struct ResultShaper {
    rng: StdRng,
}

impl Default for ResultShaper {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultShaper {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic interior sampling.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn shape(&mut self, table: &Table) -> ShapedResult {
        let row_count = table.row_count();
        let mut shaped = ShapedResult {
            row_count,
            column_count: table.column_count(),
            columns: table.columns.clone(),
            is_summarized: false,
            summary_stats: IndexMap::new(),
            full_data: None,
            sample_data: None,
        };

        if row_count == 0 {
            shaped.full_data = Some(FullData::Marker(NO_DATA_MARKER.to_string()));
            return shaped;
        }

        shaped.summary_stats = summary_stats(table);

        if row_count <= FULL_CONTEXT_THRESHOLD {
            log::info!("Including full data ({} rows)", row_count);
            shaped.full_data = Some(FullData::Rows((0..row_count).map(|i| table.record(i)).collect()));
            return shaped;
        }

        log::info!("Sampling data for large result ({} rows)", row_count);
        shaped.is_summarized = true;
        shaped.sample_data = Some(self.sample(table));
        shaped
    }

    fn sample(&mut self, table: &Table) -> SampleData {
        let n = table.row_count();
        let first = FIRST_ROWS.min(n);
        let last = LAST_ROWS.min(n - first);
        let interior = first..n - last;

        let mut middle: Vec<usize> = if interior.is_empty() {
            Vec::new()
        } else {
            let picks = MIDDLE_SAMPLE.min(interior.len());
            rand::seq::index::sample(&mut self.rng, interior.len(), picks)
                .into_iter()
                .map(|i| interior.start + i)
                .collect()
        };
        middle.sort_unstable();

        SampleData {
            first_rows: (0..first).map(|i| table.record(i)).collect(),
            middle_sample: middle.into_iter().map(|i| table.record(i)).collect(),
            last_rows: (n - last..n).map(|i| table.record(i)).collect(),
        }
    }
}

/// At most `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Apply the overall context ceiling. The marker counts toward the limit.
pub fn bound_context(context: String) -> String {
    let len = context.chars().count();
    if len <= MAX_CONTEXT_CHARS {
        return context;
    }
    log::warn!("Context is very large: {} characters. Truncating.", len);
    let keep = MAX_CONTEXT_CHARS - TRUNCATION_MARKER.chars().count();
    let mut bounded = truncate_chars(&context, keep).to_string();
    bounded.push_str(TRUNCATION_MARKER);
    bounded
}
