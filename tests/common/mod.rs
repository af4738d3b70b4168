#![allow(dead_code)]

use chrono::{DateTime, FixedOffset};
use screener_sheet_worker::models::{Cell, LogicalTable, NormalizedTable, Row, TableKind};

pub fn at(timestamp: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(timestamp).expect("valid timestamp")
}

pub fn strings(cells: &[&str]) -> Vec<String> {
    cells.iter().map(ToString::to_string).collect()
}

pub fn scanner(symbols: &[&str], captured_at: &str) -> NormalizedTable {
    let table = LogicalTable {
        name: "Stock_Scanner".to_string(),
        kind: TableKind::Scanner,
        key_column: "Symbol".to_string(),
        columns: strings(&["Sr", "Symbol"]),
    };
    let rows = symbols
        .iter()
        .zip(1..)
        .map(|(symbol, rank)| Row {
            captured_at: at(captured_at),
            values: vec![Cell::Number(f64::from(rank)), Cell::Text((*symbol).to_string())],
        })
        .collect();

    NormalizedTable { table, rows }
}

pub fn history(entries: &[(&str, f64)], captured_at: &str) -> NormalizedTable {
    let table = LogicalTable {
        name: "History_Log".to_string(),
        kind: TableKind::History,
        key_column: "Date".to_string(),
        columns: strings(&["Date", "rsi"]),
    };
    let rows = entries
        .iter()
        .map(|(date, rsi)| Row {
            captured_at: at(captured_at),
            values: vec![Cell::Text((*date).to_string()), Cell::Number(*rsi)],
        })
        .collect();

    NormalizedTable { table, rows }
}
