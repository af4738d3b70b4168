mod common;

use pretty_assertions::assert_eq;

use screener_sheet_worker::html_tables::parse_tables;
use screener_sheet_worker::models::{Cell, RawTable, TableKind};
use screener_sheet_worker::normalize::{NormalizeOptions, is_data_table, normalize};
use screener_sheet_worker::routes::authorize;

use common::{at, strings};

fn raw(rows: &[&[&str]]) -> RawTable {
    RawTable {
        rows: rows.iter().map(|row| strings(row)).collect(),
    }
}

#[test]
fn empty_state_tables_are_dropped() {
    let no_data = raw(&[&["Symbol", "Price"], &["No data found", ""], &["x", "y"]]);
    let single_row = raw(&[&["Symbol", "Price"], &["TCS", "1"]]);
    let single_column = raw(&[&["Symbol"], &["TCS"], &["INFY"]]);
    let real = raw(&[&["Symbol", "Price"], &["TCS", "1"], &["INFY", "2"]]);

    assert!(!is_data_table(&no_data));
    assert!(!is_data_table(&single_row));
    assert!(!is_data_table(&single_column));
    assert!(is_data_table(&real));

    let tables = normalize(
        &[no_data, single_row, single_column, real],
        at("2026-01-05T10:00:00+05:30"),
        &NormalizeOptions::default(),
    );
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table.name, "Stock_Scanner");
}

#[test]
fn unknown_and_repeated_kinds_get_positional_names() {
    let scanner = raw(&[&["Sr", "Stock"], &["1", "TCS"], &["2", "INFY"]]);
    let unknown = raw(&[&["Open", "Close"], &["1", "2"], &["3", "4"]]);

    let tables = normalize(
        &[scanner.clone(), unknown, scanner],
        at("2026-01-05T10:00:00+05:30"),
        &NormalizeOptions::default(),
    );

    let described = tables
        .iter()
        .map(|table| (table.table.name.as_str(), table.table.kind, table.table.key_column.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        described,
        vec![
            ("Stock_Scanner", TableKind::Scanner, "Stock"),
            ("Table_2", TableKind::Unknown, "Open"),
            ("Table_3", TableKind::Scanner, "Stock"),
        ]
    );
}

#[test]
fn malformed_history_dates_pass_through() {
    let history = raw(&[
        &["Period", "Breadth"],
        &["Week 1", "12"],
        &["29th Dec", "n/a"],
    ]);

    let tables = normalize(
        &[history],
        at("2026-01-05T10:00:00+05:30"),
        &NormalizeOptions::default(),
    );
    let table = &tables[0];

    assert_eq!(table.table.kind, TableKind::History);
    assert_eq!(table.table.columns, strings(&["Period", "Breadth", "Year"]));
    assert_eq!(
        table.rows[0].values,
        vec![
            Cell::Text("Week 1".to_string()),
            Cell::Number(12.0),
            Cell::Number(2026.0),
        ]
    );
    assert_eq!(
        table.rows[1].values,
        vec![
            Cell::Text("2025-12-29".to_string()),
            Cell::Text("n/a".to_string()),
            Cell::Number(2025.0),
        ]
    );
    assert_eq!(table.rows[1].key(&table.table), "2025-12-29");
}

#[test]
fn parsed_page_feeds_the_normalizer() {
    let html = r#"
        <table>
          <tr><th>Stock Name Sort table by Stock Name</th><th>% Chg_Sort</th></tr>
          <tr><td>TCS</td><td>1.5%</td></tr>
          <tr><td>INFY</td><td>-2%</td></tr>
        </table>
    "#;

    let tables = normalize(
        &parse_tables(html),
        at("2026-01-05T10:00:00+05:30"),
        &NormalizeOptions::default(),
    );

    assert_eq!(tables[0].table.columns, strings(&["Stock Name", "% Chg"]));
    assert_eq!(tables[0].table.persisted_header()[0], "Scraped_At_IST");
    assert_eq!(
        tables[0].rows[1].to_persisted(),
        strings(&["2026-01-05 10:00:00", "INFY", "-2"])
    );
}

#[test]
fn manual_sync_requires_the_configured_token() {
    assert!(authorize(Some("Bearer s3cret"), Some("s3cret")).is_ok());
    assert!(authorize(Some("Bearer wrong"), Some("s3cret")).is_err());
    assert!(authorize(None, Some("s3cret")).is_err());
    assert!(authorize(Some("Bearer s3cret"), None).is_err());
}
