use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::formatting::FormatRule;
use crate::store::{SheetDocument, SheetStore, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Open,
    ReadHeader,
    WriteHeader,
    ReadRows,
    Insert,
    Update,
    Format,
    Commit,
}

/// Single-isolate store holding tabs in memory. Used for local runs and tests;
/// failures can be injected per table and operation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: RefCell<BTreeMap<String, SheetDocument>>,
    failures: RefCell<HashSet<(String, StoreOperation)>>,
    rejected_rows: RefCell<HashSet<(String, usize)>>,
    commits: RefCell<BTreeMap<String, usize>>,
    /// Maximum rows per `batch_update` call; larger batches are rejected.
    batch_limit: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    pub fn seed(&self, table_name: &str, document: SheetDocument) {
        self.sheets
            .borrow_mut()
            .insert(table_name.to_string(), document);
    }

    pub fn sheet(&self, table_name: &str) -> Option<SheetDocument> {
        self.sheets.borrow().get(table_name).cloned()
    }

    /// How many times `commit` succeeded for `table_name`.
    pub fn commits(&self, table_name: &str) -> usize {
        self.commits.borrow().get(table_name).copied().unwrap_or_default()
    }

    pub fn fail_on(&self, table_name: &str, operation: StoreOperation) {
        self.failures
            .borrow_mut()
            .insert((table_name.to_string(), operation));
    }

    /// Any `batch_update` touching `row_index` of `table_name` fails as a whole.
    pub fn reject_row_updates(&self, table_name: &str, row_index: usize) {
        self.rejected_rows
            .borrow_mut()
            .insert((table_name.to_string(), row_index));
    }

    pub fn clear_failures(&self) {
        self.failures.borrow_mut().clear();
        self.rejected_rows.borrow_mut().clear();
    }

    fn check(&self, table_name: &str, operation: StoreOperation) -> Result<(), PipelineError> {
        if self
            .failures
            .borrow()
            .contains(&(table_name.to_string(), operation))
        {
            return Err(PipelineError::Store(format!(
                "injected {operation:?} failure for {table_name}"
            )));
        }
        Ok(())
    }

    fn with_sheet<T>(
        &self,
        handle: &StoreHandle,
        operation: StoreOperation,
        apply: impl FnOnce(&mut SheetDocument) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        self.check(&handle.table_name, operation)?;
        let mut sheets = self.sheets.borrow_mut();
        let document = sheets.get_mut(&handle.table_name).ok_or_else(|| {
            PipelineError::Store(format!("sheet {} does not exist", handle.table_name))
        })?;
        apply(document)
    }
}

#[async_trait(?Send)]
impl SheetStore for MemoryStore {
    async fn open_or_create(&self, table_name: &str) -> Result<StoreHandle, PipelineError> {
        self.check(table_name, StoreOperation::Open)?;
        let mut sheets = self.sheets.borrow_mut();
        let created = !sheets.contains_key(table_name);
        sheets.entry(table_name.to_string()).or_default();
        Ok(StoreHandle {
            table_name: table_name.to_string(),
            created,
        })
    }

    async fn read_header(&self, handle: &StoreHandle) -> Result<Vec<String>, PipelineError> {
        self.with_sheet(handle, StoreOperation::ReadHeader, |document| {
            Ok(document.header.clone())
        })
    }

    async fn write_header(&self, handle: &StoreHandle, names: &[String]) -> Result<(), PipelineError> {
        self.with_sheet(handle, StoreOperation::WriteHeader, |document| {
            document.header = names.to_vec();
            Ok(())
        })
    }

    async fn read_all_rows(
        &self,
        handle: &StoreHandle,
    ) -> Result<Vec<(usize, Vec<String>)>, PipelineError> {
        self.with_sheet(handle, StoreOperation::ReadRows, |document| {
            Ok(document.all_rows())
        })
    }

    async fn read_row_range(
        &self,
        handle: &StoreHandle,
        start_index: usize,
        count: usize,
    ) -> Result<Vec<Vec<String>>, PipelineError> {
        self.with_sheet(handle, StoreOperation::ReadRows, |document| {
            document.row_range(start_index, count)
        })
    }

    async fn insert_rows_at(
        &self,
        handle: &StoreHandle,
        position: usize,
        rows: &[Vec<String>],
    ) -> Result<(), PipelineError> {
        self.with_sheet(handle, StoreOperation::Insert, |document| {
            document.insert_rows_at(position, rows)
        })
    }

    async fn update_row(
        &self,
        handle: &StoreHandle,
        row_index: usize,
        values: &[String],
    ) -> Result<(), PipelineError> {
        self.with_sheet(handle, StoreOperation::Update, |document| {
            document.update_row(row_index, values)
        })
    }

    async fn batch_update(
        &self,
        handle: &StoreHandle,
        updates: &[(usize, Vec<String>)],
    ) -> Result<(), PipelineError> {
        if let Some(limit) = self.batch_limit {
            if updates.len() > limit {
                return Err(PipelineError::Store(format!(
                    "batch of {} rows exceeds limit {limit}",
                    updates.len()
                )));
            }
        }

        let rejected = self.rejected_rows.borrow();
        if let Some((row_index, _)) = updates
            .iter()
            .find(|(row_index, _)| rejected.contains(&(handle.table_name.clone(), *row_index)))
        {
            return Err(PipelineError::Store(format!(
                "update of row {row_index} rejected for {}",
                handle.table_name
            )));
        }
        drop(rejected);

        self.with_sheet(handle, StoreOperation::Update, |document| {
            document.batch_update(updates)
        })
    }

    async fn apply_formatting(
        &self,
        handle: &StoreHandle,
        rules: &[FormatRule],
    ) -> Result<(), PipelineError> {
        self.with_sheet(handle, StoreOperation::Format, |document| {
            document.formatting = rules.to_vec();
            Ok(())
        })
    }

    /// Mutations are already in place; only the bookkeeping is recorded.
    async fn commit(&self, handle: &StoreHandle) -> Result<(), PipelineError> {
        self.check(&handle.table_name, StoreOperation::Commit)?;
        *self
            .commits
            .borrow_mut()
            .entry(handle.table_name.clone())
            .or_default() += 1;
        Ok(())
    }
}
