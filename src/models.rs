use std::fmt::{Display, Formatter};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SOURCE_URL: &str = "https://chartink.com/dashboard/208896";
pub const DEFAULT_SPREADSHEET_NAME: &str = "Chartink_Multi_Log";
pub const DEFAULT_KV_BINDING: &str = "SHEETS";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Leading column owned by the synchronizer; never part of a row's identity.
pub const TIMESTAMP_COLUMN: &str = "Scraped_At_IST";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const YEAR_COLUMN: &str = "Year";
pub const SCORE_COLUMN: &str = "Score";

pub const HISTORY_TABLE_NAME: &str = "History_Log";
pub const SCANNER_TABLE_NAME: &str = "Stock_Scanner";

/// First data row of every sheet; row 1 holds the header.
pub const FIRST_DATA_ROW: usize = 2;

/// Parsed HTML table. `rows[0]` is the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn header(&self) -> &[String] {
        self.rows.first().map_or(&[], Vec::as_slice)
    }

    pub fn data_rows(&self) -> &[Vec<String>] {
        self.rows.get(1..).unwrap_or_default()
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Empty | Self::Text(_) => None,
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(value) => write!(f, "{}", format_number(*value)),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    History,
    Scanner,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalTable {
    pub name: String,
    pub kind: TableKind,
    pub key_column: String,
    pub columns: Vec<String>,
}

impl LogicalTable {
    pub fn key_index(&self) -> usize {
        self.columns
            .iter()
            .position(|column| *column == self.key_column)
            .unwrap_or(0)
    }

    /// Header as persisted: the timestamp column followed by the data columns.
    pub fn persisted_header(&self) -> Vec<String> {
        std::iter::once(TIMESTAMP_COLUMN.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }
}

/// One normalized row; `values` is aligned with `LogicalTable::columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub captured_at: DateTime<FixedOffset>,
    pub values: Vec<Cell>,
}

impl Row {
    pub fn key(&self, table: &LogicalTable) -> String {
        self.values
            .get(table.key_index())
            .map(|cell| cell.to_string().trim().to_string())
            .unwrap_or_default()
    }

    pub fn get<'a>(&'a self, table: &LogicalTable, column: &str) -> Option<&'a Cell> {
        let index = table.columns.iter().position(|name| name == column)?;
        self.values.get(index)
    }

    /// Cells as written to the store, timestamp first.
    pub fn to_persisted(&self) -> Vec<String> {
        std::iter::once(self.captured_at.format(TIMESTAMP_FORMAT).to_string())
            .chain(self.values.iter().map(ToString::to_string))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub table: LogicalTable,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetState {
    Absent,
    Bootstrapped,
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum FormattingOutcome {
    Skipped,
    Applied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub table: String,
    pub kind: TableKind,
    pub state: SheetState,
    pub header_rewritten: bool,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub formatting: FormattingOutcome,
}

impl MutationReport {
    pub fn new(table: &LogicalTable, state: SheetState) -> Self {
        Self {
            table: table.name.clone(),
            kind: table.kind,
            state,
            header_rewritten: false,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            formatting: FormattingOutcome::Skipped,
        }
    }

    pub fn mutated(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub table: String,
    pub message: String,
    /// Mutations that went through before the failure; they are not rolled back.
    pub partial: Option<MutationReport>,
}

impl Display for SyncFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sync of {} failed: {}", self.table, self.message)
    }
}

impl std::error::Error for SyncFailure {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TableOutcome {
    Synced(MutationReport),
    Failed(SyncFailure),
}

impl TableOutcome {
    pub fn table(&self) -> &str {
        match self {
            Self::Synced(report) => &report.table,
            Self::Failed(failure) => &failure.table,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failure,
}

impl RunStatus {
    pub fn from_outcomes(outcomes: &[TableOutcome]) -> Self {
        let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
        if failed == 0 {
            Self::Success
        } else if failed == outcomes.len() {
            Self::Failure
        } else {
            Self::PartialFailure
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub captured_at: String,
    pub status: RunStatus,
    pub tables: Vec<TableOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
