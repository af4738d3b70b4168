use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::PipelineError;
use crate::formatting::rules_for;
use crate::models::{
    FIRST_DATA_ROW, FormattingOutcome, LogicalTable, MutationReport, NormalizedTable, Row,
    SheetState, SyncFailure, TableKind,
};
use crate::store::{SheetStore, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Rows per `batch_update` call.
    pub update_chunk_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            update_chunk_size: 200,
        }
    }
}

/// Mutations needed to fold a batch of history rows into persisted rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPlan {
    /// New keys, in incoming order, to go on top of the data region.
    pub inserts: Vec<Vec<String>>,
    /// Row index (before insertion) and the full replacement row.
    pub updates: Vec<(usize, Vec<String>)>,
    pub unchanged: usize,
}

/// Reconciles one table against its tab, then commits the tab once.
/// Mutations that succeeded before a failure are kept and reported in
/// `SyncFailure::partial`; a failed commit loses them all.
pub async fn sync_table<S>(
    store: &S,
    incoming: &NormalizedTable,
    options: &SyncOptions,
) -> Result<MutationReport, SyncFailure>
where
    S: SheetStore + ?Sized,
{
    let table = &incoming.table;
    let handle = store
        .open_or_create(&table.name)
        .await
        .map_err(|error| failure(table, &error, None))?;

    let (report, errors) = reconcile(store, &handle, incoming, options).await;

    if let Err(error) = store.commit(&handle).await {
        tracing::error!(table = %table.name, %error, "commit failed, run mutations lost");
        return Err(failure(table, &error, None));
    }

    tracing::info!(
        table = %table.name,
        state = ?report.state,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        "table synchronized"
    );

    match errors.first() {
        None => Ok(report),
        Some(first) => {
            let mut failure = failure(table, first, Some(&report));
            if errors.len() > 1 {
                failure.message = format!("{} (and {} more)", failure.message, errors.len() - 1);
            }
            Err(failure)
        }
    }
}

async fn reconcile<S>(
    store: &S,
    handle: &StoreHandle,
    incoming: &NormalizedTable,
    options: &SyncOptions,
) -> (MutationReport, Vec<PipelineError>)
where
    S: SheetStore + ?Sized,
{
    let table = &incoming.table;
    let initial_state = if handle.created {
        SheetState::Absent
    } else {
        SheetState::Reconciled
    };
    let mut report = MutationReport::new(table, initial_state);

    let header = table.persisted_header();
    match ensure_header(store, handle, &header).await {
        Ok(rewritten) => report.header_rewritten = rewritten,
        Err(error) => return (report, vec![error]),
    }

    if incoming.rows.is_empty() {
        return (report, Vec::new());
    }

    let errors = match table.kind {
        TableKind::History => reconcile_history(store, handle, incoming, options, &mut report).await,
        TableKind::Scanner | TableKind::Unknown => {
            reconcile_snapshot(store, handle, incoming, &mut report).await
        }
    };

    if report.mutated() {
        report.formatting = refresh_formatting(store, handle, &header).await;
    }

    (report, errors)
}

async fn ensure_header<S>(
    store: &S,
    handle: &StoreHandle,
    expected: &[String],
) -> Result<bool, PipelineError>
where
    S: SheetStore + ?Sized,
{
    let current = store.read_header(handle).await?;
    if current == expected {
        return Ok(false);
    }

    tracing::info!(table = %handle.table_name, ?current, "rewriting header");
    store.write_header(handle, expected).await?;
    Ok(true)
}

async fn reconcile_history<S>(
    store: &S,
    handle: &StoreHandle,
    incoming: &NormalizedTable,
    options: &SyncOptions,
    report: &mut MutationReport,
) -> Vec<PipelineError>
where
    S: SheetStore + ?Sized,
{
    let persisted = match store.read_all_rows(handle).await {
        Ok(rows) => rows,
        Err(error) => return vec![error],
    };

    if persisted.is_empty() {
        return bootstrap(store, handle, &incoming.rows, report).await;
    }

    let plan = plan_history(&incoming.table, &incoming.rows, &persisted);
    report.unchanged = plan.unchanged;

    if !plan.inserts.is_empty() {
        if let Err(error) = store.insert_rows_at(handle, FIRST_DATA_ROW, &plan.inserts).await {
            return vec![error];
        }
        report.inserted = plan.inserts.len();
    }

    // Existing rows moved down by the insertion above.
    let shift = plan.inserts.len();
    let mut errors = Vec::new();
    for chunk in plan.updates.chunks(options.update_chunk_size.max(1)) {
        let shifted = chunk
            .iter()
            .map(|(row_index, values)| (row_index + shift, values.clone()))
            .collect::<Vec<_>>();

        match store.batch_update(handle, &shifted).await {
            Ok(()) => report.updated += chunk.len(),
            Err(error) => {
                tracing::warn!(table = %handle.table_name, rows = chunk.len(), %error, "update chunk failed");
                errors.push(error);
            }
        }
    }

    errors
}

async fn reconcile_snapshot<S>(
    store: &S,
    handle: &StoreHandle,
    incoming: &NormalizedTable,
    report: &mut MutationReport,
) -> Vec<PipelineError>
where
    S: SheetStore + ?Sized,
{
    let persisted_top = match store
        .read_row_range(handle, FIRST_DATA_ROW, incoming.rows.len())
        .await
    {
        Ok(rows) => rows,
        Err(error) => return vec![error],
    };

    if persisted_top.is_empty() {
        return bootstrap(store, handle, &incoming.rows, report).await;
    }

    if !snapshot_changed(&incoming.table, &incoming.rows, &persisted_top) {
        report.unchanged = incoming.rows.len();
        return Vec::new();
    }

    let rows = incoming.rows.iter().map(Row::to_persisted).collect::<Vec<_>>();
    match store.insert_rows_at(handle, FIRST_DATA_ROW, &rows).await {
        Ok(()) => {
            report.inserted = rows.len();
            Vec::new()
        }
        Err(error) => vec![error],
    }
}

async fn bootstrap<S>(
    store: &S,
    handle: &StoreHandle,
    rows: &[Row],
    report: &mut MutationReport,
) -> Vec<PipelineError>
where
    S: SheetStore + ?Sized,
{
    if report.state != SheetState::Absent {
        report.state = SheetState::Bootstrapped;
    }

    let rows = rows.iter().map(Row::to_persisted).collect::<Vec<_>>();
    match store.insert_rows_at(handle, FIRST_DATA_ROW, &rows).await {
        Ok(()) => {
            report.inserted = rows.len();
            Vec::new()
        }
        Err(error) => vec![error],
    }
}

async fn refresh_formatting<S>(store: &S, handle: &StoreHandle, header: &[String]) -> FormattingOutcome
where
    S: SheetStore + ?Sized,
{
    let rules = rules_for(header);
    match store.apply_formatting(handle, &rules).await {
        Ok(()) => FormattingOutcome::Applied,
        Err(error) => {
            tracing::warn!(table = %handle.table_name, %error, "formatting refresh failed");
            FormattingOutcome::Failed(error.to_string())
        }
    }
}

/// Upsert plan keyed on the table's key column. Persisted keys map to their
/// topmost row; a blank key is a key like any other. When the incoming batch
/// repeats a key, the last row wins.
pub fn plan_history(
    table: &LogicalTable,
    incoming: &[Row],
    persisted: &[(usize, Vec<String>)],
) -> HistoryPlan {
    let key_offset = table.key_index() + 1;

    let mut positions: HashMap<&str, (usize, &[String])> = HashMap::new();
    for (row_index, cells) in persisted {
        let key = cells.get(key_offset).map_or("", |key| key.trim());
        positions.entry(key).or_insert((*row_index, cells.as_slice()));
    }

    let mut updates = BTreeMap::new();
    let mut matched = BTreeSet::new();
    let mut inserts: Vec<Vec<String>> = Vec::new();
    let mut insert_slots: HashMap<String, usize> = HashMap::new();

    for row in incoming {
        let key = row.key(table);
        let values = row.to_persisted();

        if let Some(&(row_index, existing)) = positions.get(key.as_str()) {
            matched.insert(row_index);
            if fields_differ(existing, &values) {
                updates.insert(row_index, values);
            } else {
                updates.remove(&row_index);
            }
        } else if let Some(&slot) = insert_slots.get(&key) {
            inserts[slot] = values;
        } else {
            insert_slots.insert(key, inserts.len());
            inserts.push(values);
        }
    }

    HistoryPlan {
        unchanged: matched.len() - updates.len(),
        updates: updates.into_iter().collect(),
        inserts,
    }
}

/// Ordered comparison of incoming keys with the keys heading the tab.
pub fn snapshot_changed(table: &LogicalTable, incoming: &[Row], persisted_top: &[Vec<String>]) -> bool {
    let key_offset = table.key_index() + 1;
    let new_keys = incoming.iter().map(|row| row.key(table));
    let old_keys = persisted_top
        .iter()
        .map(|cells| cells.get(key_offset).map_or("", |key| key.trim()).to_string());

    !new_keys.eq(old_keys)
}

/// Compares every column after the timestamp as trimmed text; cells missing
/// from a short persisted row count as empty.
fn fields_differ(existing: &[String], incoming: &[String]) -> bool {
    let width = existing.len().max(incoming.len());
    (1..width).any(|index| {
        let old = existing.get(index).map_or("", |cell| cell.trim());
        let new = incoming.get(index).map_or("", |cell| cell.trim());
        old != new
    })
}

fn failure(table: &LogicalTable, error: &PipelineError, partial: Option<&MutationReport>) -> SyncFailure {
    SyncFailure {
        table: table.name.clone(),
        message: error.to_string(),
        partial: partial.cloned(),
    }
}
