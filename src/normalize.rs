use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use regex::Regex;

use crate::indicators::{has_indicator_columns, momentum_score};
use crate::models::{
    Cell, HISTORY_TABLE_NAME, LogicalTable, NormalizedTable, RawTable, Row, SCANNER_TABLE_NAME,
    SCORE_COLUMN, TableKind, YEAR_COLUMN,
};

const NO_DATA_SENTINEL: &str = "no data";
const SORT_MARKERS: [&str; 2] = ["_Sort", " Sort"];
const DATE_TOKENS: [&str; 3] = ["date", "day", "period"];
const IDENTITY_TOKENS: [&str; 3] = ["symbol", "stock", "script"];

/// Evaluated in order; the first rule with a matching column decides the kind.
const KIND_RULES: [(TableKind, &[&str]); 2] = [
    (TableKind::History, &DATE_TOKENS),
    (TableKind::Scanner, &IDENTITY_TOKENS),
];

const DATED_FORMATS: [&str; 6] = [
    "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%d %b %Y", "%d-%b-%Y", "%b %d %Y",
];
const YEARLESS_FORMATS: [&str; 2] = ["%d %b %Y", "%b %d %Y"];
pub const RESOLVED_DATE_FORMAT: &str = "%Y-%m-%d";

static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("hardcoded ordinal regex is valid")
});
static DATE_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-/,.]+").expect("hardcoded separator regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// How far past "today" a year-less date may land before it is moved to
    /// the previous year.
    pub future_tolerance_days: i64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            future_tolerance_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDate {
    Resolved(NaiveDate),
    Passthrough(String),
}

impl ResolvedDate {
    pub fn year(&self) -> Option<i32> {
        match self {
            Self::Resolved(date) => Some(date.year()),
            Self::Passthrough(_) => None,
        }
    }

    pub fn into_cell(self) -> Cell {
        match self {
            Self::Resolved(date) => Cell::Text(date.format(RESOLVED_DATE_FORMAT).to_string()),
            Self::Passthrough(raw) if raw.is_empty() => Cell::Empty,
            Self::Passthrough(raw) => Cell::Text(raw),
        }
    }
}

pub fn normalize(
    raw_tables: &[RawTable],
    captured_at: DateTime<FixedOffset>,
    options: &NormalizeOptions,
) -> Vec<NormalizedTable> {
    let mut named_kinds = HashSet::new();

    let tables = raw_tables
        .iter()
        .filter(|raw| {
            let keep = is_data_table(raw);
            if !keep {
                tracing::debug!(rows = raw.rows.len(), "skipping empty-state table");
            }
            keep
        })
        .enumerate()
        .map(|(index, raw)| normalize_table(raw, index + 1, captured_at, options, &mut named_kinds))
        .collect::<Vec<_>>();

    tracing::info!(
        parsed = raw_tables.len(),
        kept = tables.len(),
        "normalized dashboard tables"
    );
    tables
}

pub fn is_data_table(raw: &RawTable) -> bool {
    if raw.data_rows().len() <= 1 || raw.column_count() <= 1 {
        return false;
    }

    let first_cell = raw
        .data_rows()
        .first()
        .and_then(|row| row.first())
        .map(|cell| cell.to_lowercase())
        .unwrap_or_default();
    !first_cell.contains(NO_DATA_SENTINEL)
}

fn normalize_table(
    raw: &RawTable,
    position: usize,
    captured_at: DateTime<FixedOffset>,
    options: &NormalizeOptions,
    named_kinds: &mut HashSet<TableKind>,
) -> NormalizedTable {
    let width = raw.column_count();
    let source_columns = clean_columns(raw.header(), width);
    let (kind, key_index) = infer_kind(&source_columns);

    let name = match kind {
        TableKind::History if named_kinds.insert(kind) => HISTORY_TABLE_NAME.to_string(),
        TableKind::Scanner if named_kinds.insert(kind) => SCANNER_TABLE_NAME.to_string(),
        _ => format!("Table_{position}"),
    };

    let add_year = kind == TableKind::History && !source_columns.iter().any(|c| c == YEAR_COLUMN);
    let add_score = kind == TableKind::History
        && has_indicator_columns(&source_columns)
        && !source_columns.iter().any(|c| c == SCORE_COLUMN);

    let today = captured_at.date_naive();
    let rows = raw
        .data_rows()
        .iter()
        .map(|cells| {
            let mut values = (0..width)
                .map(|index| coerce(cells.get(index).map_or("", String::as_str)))
                .collect::<Vec<_>>();

            let mut year = None;
            if kind == TableKind::History {
                let raw_date = cells.get(key_index).map_or("", String::as_str);
                let resolved = resolve_date(raw_date, today, options.future_tolerance_days);
                year = resolved.year();
                values[key_index] = resolved.into_cell();
            }

            let score = add_score.then(|| momentum_score(&source_columns, &values));
            if add_year {
                values.push(Cell::Number(f64::from(year.unwrap_or_else(|| today.year()))));
            }
            if let Some(score) = score {
                values.push(Cell::Number(f64::from(score)));
            }

            Row {
                captured_at,
                values,
            }
        })
        .collect::<Vec<_>>();

    let key_column = source_columns[key_index].clone();
    let mut columns = source_columns;
    if add_year {
        columns.push(YEAR_COLUMN.to_string());
    }
    if add_score {
        columns.push(SCORE_COLUMN.to_string());
    }

    tracing::debug!(table = %name, ?kind, key = %key_column, rows = rows.len(), "table normalized");

    NormalizedTable {
        table: LogicalTable {
            name,
            kind,
            key_column,
            columns,
        },
        rows,
    }
}

/// Cuts the sort-control text the dashboard embeds in header cells and trims
/// separator noise. Idempotent.
pub fn clean_header(raw: &str) -> String {
    let cut = SORT_MARKERS
        .iter()
        .filter_map(|marker| raw.find(marker))
        .min()
        .map_or(raw, |index| &raw[..index]);

    cut.trim_matches(|c: char| c.is_whitespace() || matches!(c, '_' | '.' | '-' | ':'))
        .to_string()
}

/// Cleaned, non-empty, unique column names for a table `width` cells wide.
pub fn clean_columns(header: &[String], width: usize) -> Vec<String> {
    let mut seen = HashSet::new();

    (0..width)
        .map(|index| {
            let mut name = header
                .get(index)
                .map(|raw| clean_header(raw))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("Column_{}", index + 1));

            let base = name.clone();
            let mut suffix = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            name
        })
        .collect()
}

/// Kind and key column index. Tables matching no rule are `Unknown`, keyed on
/// their first column.
pub fn infer_kind(columns: &[String]) -> (TableKind, usize) {
    for (kind, tokens) in KIND_RULES {
        let matched = columns.iter().position(|column| {
            let lowered = column.to_lowercase();
            tokens.iter().any(|token| lowered.contains(token))
        });
        if let Some(index) = matched {
            return (kind, index);
        }
    }

    (TableKind::Unknown, 0)
}

pub fn coerce(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Empty;
    }

    let without_separators = trimmed.replace(',', "");
    let candidate = without_separators
        .strip_suffix('%')
        .unwrap_or(&without_separators)
        .trim();

    let looks_numeric = candidate.chars().any(|c| c.is_ascii_digit())
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if looks_numeric {
        if let Ok(value) = candidate.parse::<f64>() {
            if value.is_finite() {
                return Cell::Number(value);
            }
        }
    }

    Cell::Text(trimmed.to_string())
}

/// Resolves a dashboard date such as `29th Dec` to a calendar date. Year-less
/// dates take the current year unless that puts them more than
/// `tolerance_days` ahead of `today`, in which case they belong to last year.
pub fn resolve_date(raw: &str, today: NaiveDate, tolerance_days: i64) -> ResolvedDate {
    let trimmed = raw.trim();
    let without_ordinals = ORDINAL_RE.replace_all(trimmed, "$1");
    let cleaned = without_ordinals.split_whitespace().collect::<Vec<_>>().join(" ");

    for format in DATED_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return ResolvedDate::Resolved(date);
        }
    }

    let yearless = DATE_SEPARATOR_RE.replace_all(&cleaned, " ");
    let year = today.year();
    let Some(candidate) = YEARLESS_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(&format!("{} {year}", yearless.trim()), format).ok()
    }) else {
        return ResolvedDate::Passthrough(trimmed.to_string());
    };

    let horizon = today
        .checked_add_signed(Duration::days(tolerance_days))
        .unwrap_or(today);
    if candidate <= horizon {
        return ResolvedDate::Resolved(candidate);
    }

    candidate
        .with_year(year - 1)
        .map_or_else(|| ResolvedDate::Passthrough(trimmed.to_string()), ResolvedDate::Resolved)
}
