mod common;

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;

use screener_sheet_worker::config::PipelineConfig;
use screener_sheet_worker::memory_store::{MemoryStore, StoreOperation};
use screener_sheet_worker::models::{RunStatus, TableOutcome};
use screener_sheet_worker::pipeline::process_html;

use common::strings;

const DASHBOARD: &str = r#"
<html><body>
  <table class="table">
    <thead><tr>
      <th>Date <span>Sort table by Date</span></th><th>4.5r_Sort_desc</th><th>20chg</th><th>50r</th>
    </tr></thead>
    <tbody>
      <tr><td>2nd Jan</td><td>250</td><td>25.5%</td><td>90</td></tr>
      <tr><td>1st Jan</td><td>120</td><td>5</td><td>70</td></tr>
      <tr><td>29th Dec</td><td>40</td><td>-22</td><td>55</td></tr>
    </tbody>
  </table>
  <table class="table">
    <tr><th>Sr.</th><th>Symbol</th><th>Price</th></tr>
    <tr><td>1</td><td>TCS</td><td>3,450.50</td></tr>
    <tr><td>2</td><td>INFY</td><td>1,610</td></tr>
  </table>
  <table class="table">
    <tr><th>Symbol</th><th>Price</th></tr>
    <tr><td>No data found</td><td></td></tr>
    <tr><td>x</td><td>y</td></tr>
  </table>
</body></html>
"#;

fn now(timestamp: &str) -> DateTime<Utc> {
    timestamp.parse().expect("valid datetime")
}

#[tokio::test]
async fn dashboard_tables_land_in_their_tabs() {
    let store = MemoryStore::new();
    let config = PipelineConfig::default();

    let report = process_html(&config, &store, DASHBOARD, now("2026-01-05T04:30:00Z"))
        .await
        .expect("run");

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.captured_at, "2026-01-05 10:00:00");
    let names = report.tables.iter().map(TableOutcome::table).collect::<Vec<_>>();
    assert_eq!(names, vec!["History_Log", "Stock_Scanner"]);

    let history = store.sheet("History_Log").expect("history tab");
    assert_eq!(
        history.header,
        strings(&["Scraped_At_IST", "Date", "4.5r", "20chg", "50r", "Year", "Score"])
    );
    assert_eq!(
        history.rows,
        vec![
            strings(&["2026-01-05 10:00:00", "2026-01-02", "250", "25.5", "90", "2026", "3"]),
            strings(&["2026-01-05 10:00:00", "2026-01-01", "120", "5", "70", "2026", "0"]),
            strings(&["2026-01-05 10:00:00", "2025-12-29", "40", "-22", "55", "2025", "-3"]),
        ]
    );
    assert!(!history.formatting.is_empty());

    let scanner = store.sheet("Stock_Scanner").expect("scanner tab");
    assert_eq!(scanner.header, strings(&["Scraped_At_IST", "Sr", "Symbol", "Price"]));
    assert_eq!(scanner.rows[0], strings(&["2026-01-05 10:00:00", "1", "TCS", "3450.5"]));
    assert!(store.sheet("Table_3").is_none());
}

#[tokio::test]
async fn rerunning_the_same_page_changes_nothing() {
    let store = MemoryStore::new();
    let config = PipelineConfig::default();

    process_html(&config, &store, DASHBOARD, now("2026-01-05T04:30:00Z"))
        .await
        .expect("first run");
    let history = store.sheet("History_Log");
    let scanner = store.sheet("Stock_Scanner");

    let report = process_html(&config, &store, DASHBOARD, now("2026-01-05T04:45:00Z"))
        .await
        .expect("second run");

    assert_eq!(report.status, RunStatus::Success);
    for outcome in &report.tables {
        let TableOutcome::Synced(table) = outcome else {
            panic!("{} failed", outcome.table());
        };
        assert!(!table.mutated(), "{} mutated", table.table);
    }
    assert_eq!(store.sheet("History_Log"), history);
    assert_eq!(store.sheet("Stock_Scanner"), scanner);
}

#[tokio::test]
async fn failing_table_does_not_stop_the_next_one() {
    let store = MemoryStore::new();
    store.fail_on("History_Log", StoreOperation::Insert);

    let report = process_html(
        &PipelineConfig::default(),
        &store,
        DASHBOARD,
        now("2026-01-05T04:30:00Z"),
    )
    .await
    .expect("run");

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert!(matches!(&report.tables[0], TableOutcome::Failed(failure) if failure.table == "History_Log"));
    assert!(matches!(&report.tables[1], TableOutcome::Synced(synced) if synced.inserted == 2));
    assert_eq!(store.sheet("Stock_Scanner").expect("scanner tab").rows.len(), 2);
}

#[tokio::test]
async fn every_table_failing_is_a_failed_run() {
    let store = MemoryStore::new();
    store.fail_on("History_Log", StoreOperation::Open);
    store.fail_on("Stock_Scanner", StoreOperation::ReadHeader);

    let report = process_html(
        &PipelineConfig::default(),
        &store,
        DASHBOARD,
        now("2026-01-05T04:30:00Z"),
    )
    .await
    .expect("run");

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(report.tables.len(), 2);
}

#[tokio::test]
async fn page_without_tables_is_an_empty_success() {
    let store = MemoryStore::new();

    let report = process_html(
        &PipelineConfig::default(),
        &store,
        "<html><body>Loading…</body></html>",
        now("2026-01-05T04:30:00Z"),
    )
    .await
    .expect("run");

    assert_eq!(report.status, RunStatus::Success);
    assert!(report.tables.is_empty());
    assert!(store.sheet("History_Log").is_none());
}
