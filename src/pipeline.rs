use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extractor;
use crate::html_tables::parse_tables;
use crate::models::{NormalizedTable, RunReport, RunStatus, TIMESTAMP_FORMAT, TableOutcome};
use crate::normalize::normalize;
use crate::store::SheetStore;
use crate::sync::{SyncOptions, sync_table};

/// One scheduled pass: fetch the dashboard, then `process_html`.
///
/// A fetch failure aborts the pass; per-table sync failures are reported in
/// the returned `RunReport`.
pub async fn run<S>(
    config: &PipelineConfig,
    store: &S,
    now: DateTime<Utc>,
) -> Result<RunReport, PipelineError>
where
    S: SheetStore + ?Sized,
{
    tracing::info!(url = %config.source_url, "extract: fetching dashboard");
    let html = extractor::fetch_dashboard_html(&config.source_url, &config.fetch).await?;
    process_html(config, store, &html, now).await
}

pub async fn process_html<S>(
    config: &PipelineConfig,
    store: &S,
    html: &str,
    now: DateTime<Utc>,
) -> Result<RunReport, PipelineError>
where
    S: SheetStore + ?Sized,
{
    let captured_at = now.with_timezone(&config.offset()?);

    let raw_tables = parse_tables(html);
    let tables = normalize(&raw_tables, captured_at, &config.normalize_options());
    if tables.is_empty() {
        tracing::warn!(parsed = raw_tables.len(), "no data tables on the dashboard");
    }

    let tables = sync_tables(store, &tables, &config.sync_options()).await;
    let report = RunReport {
        captured_at: captured_at.format(TIMESTAMP_FORMAT).to_string(),
        status: RunStatus::from_outcomes(&tables),
        tables,
    };

    tracing::info!(status = ?report.status, tables = report.tables.len(), "load: run finished");
    Ok(report)
}

/// Syncs tables one after another. A failing table is recorded and the next
/// one still runs.
pub async fn sync_tables<S>(
    store: &S,
    tables: &[NormalizedTable],
    options: &SyncOptions,
) -> Vec<TableOutcome>
where
    S: SheetStore + ?Sized,
{
    let mut outcomes = Vec::with_capacity(tables.len());

    for table in tables {
        match sync_table(store, table, options).await {
            Ok(report) => outcomes.push(TableOutcome::Synced(report)),
            Err(failure) => {
                tracing::error!(table = %failure.table, message = %failure.message, "table sync failed");
                outcomes.push(TableOutcome::Failed(failure));
            }
        }
    }

    outcomes
}
