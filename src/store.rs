use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::formatting::FormatRule;
use crate::models::FIRST_DATA_ROW;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHandle {
    pub table_name: String,
    /// True when `open_or_create` had to create the tab.
    pub created: bool,
}

/// Spreadsheet-like row store. Row indices are 1-based; row 1 is the header.
///
/// Each call is atomic on its own. A backend may buffer mutations until
/// `commit`, which the synchronizer calls exactly once per opened tab.
#[async_trait(?Send)]
pub trait SheetStore {
    async fn open_or_create(&self, table_name: &str) -> Result<StoreHandle, PipelineError>;

    async fn read_header(&self, handle: &StoreHandle) -> Result<Vec<String>, PipelineError>;

    async fn write_header(&self, handle: &StoreHandle, names: &[String]) -> Result<(), PipelineError>;

    async fn read_all_rows(
        &self,
        handle: &StoreHandle,
    ) -> Result<Vec<(usize, Vec<String>)>, PipelineError>;

    async fn read_row_range(
        &self,
        handle: &StoreHandle,
        start_index: usize,
        count: usize,
    ) -> Result<Vec<Vec<String>>, PipelineError>;

    /// Inserts `rows` so the first lands at `position`; rows already at or
    /// below `position` move down in their existing order.
    async fn insert_rows_at(
        &self,
        handle: &StoreHandle,
        position: usize,
        rows: &[Vec<String>],
    ) -> Result<(), PipelineError>;

    async fn update_row(
        &self,
        handle: &StoreHandle,
        row_index: usize,
        values: &[String],
    ) -> Result<(), PipelineError>;

    async fn batch_update(
        &self,
        handle: &StoreHandle,
        updates: &[(usize, Vec<String>)],
    ) -> Result<(), PipelineError>;

    /// Replaces the tab's conditional formatting with `rules`.
    async fn apply_formatting(
        &self,
        handle: &StoreHandle,
        rules: &[FormatRule],
    ) -> Result<(), PipelineError>;

    /// Persists whatever the handle's mutations left pending and closes it.
    async fn commit(&self, handle: &StoreHandle) -> Result<(), PipelineError>;
}

/// Persisted form of one tab. Shared by every `SheetStore` backend so the
/// row semantics live in one place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetDocument {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub formatting: Vec<FormatRule>,
}

impl SheetDocument {
    pub fn all_rows(&self) -> Vec<(usize, Vec<String>)> {
        self.rows
            .iter()
            .enumerate()
            .map(|(offset, row)| (offset + FIRST_DATA_ROW, row.clone()))
            .collect()
    }

    pub fn row_range(&self, start_index: usize, count: usize) -> Result<Vec<Vec<String>>, PipelineError> {
        let start = data_offset(start_index)?;
        Ok(self.rows.iter().skip(start).take(count).cloned().collect())
    }

    pub fn insert_rows_at(&mut self, position: usize, rows: &[Vec<String>]) -> Result<(), PipelineError> {
        let at = data_offset(position)?.min(self.rows.len());
        self.rows.splice(at..at, rows.iter().cloned());
        Ok(())
    }

    pub fn update_row(&mut self, row_index: usize, values: &[String]) -> Result<(), PipelineError> {
        let offset = data_offset(row_index)?;
        let row = self.rows.get_mut(offset).ok_or_else(|| {
            PipelineError::Store(format!("row {row_index} is outside the sheet"))
        })?;
        *row = values.to_vec();
        Ok(())
    }

    /// Validates every index before touching any row, so a bad batch leaves
    /// the document unchanged.
    pub fn batch_update(&mut self, updates: &[(usize, Vec<String>)]) -> Result<(), PipelineError> {
        for (row_index, _) in updates {
            let offset = data_offset(*row_index)?;
            if offset >= self.rows.len() {
                return Err(PipelineError::Store(format!(
                    "row {row_index} is outside the sheet"
                )));
            }
        }

        for (row_index, values) in updates {
            self.update_row(*row_index, values)?;
        }
        Ok(())
    }
}

struct Session {
    document: SheetDocument,
    dirty: bool,
}

/// Open tabs held in memory between `open_or_create` and `commit`, for
/// backends that must write each tab in one piece.
#[derive(Default)]
pub struct DocumentSessions {
    open: RefCell<HashMap<String, Session>>,
}

impl DocumentSessions {
    pub fn is_open(&self, table_name: &str) -> bool {
        self.open.borrow().contains_key(table_name)
    }

    /// Starts a session from the stored document, or from an empty one that
    /// is pending creation. Returns true when the tab is new.
    pub fn begin(&self, table_name: &str, stored: Option<SheetDocument>) -> bool {
        let created = stored.is_none();
        let session = Session {
            document: stored.unwrap_or_default(),
            dirty: created,
        };
        self.open.borrow_mut().insert(table_name.to_string(), session);
        created
    }

    pub fn read<T>(
        &self,
        handle: &StoreHandle,
        view: impl FnOnce(&SheetDocument) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let open = self.open.borrow();
        let session = open.get(&handle.table_name).ok_or_else(|| not_open(handle))?;
        view(&session.document)
    }

    /// Applies `apply` to the open document; it is marked dirty only when
    /// `apply` succeeds.
    pub fn modify(
        &self,
        handle: &StoreHandle,
        apply: impl FnOnce(&mut SheetDocument) -> Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        let mut open = self.open.borrow_mut();
        let session = open.get_mut(&handle.table_name).ok_or_else(|| not_open(handle))?;
        apply(&mut session.document)?;
        session.dirty = true;
        Ok(())
    }

    /// Closes the session and hands back the document if it needs writing.
    pub fn finish(&self, handle: &StoreHandle) -> Result<Option<SheetDocument>, PipelineError> {
        let session = self
            .open
            .borrow_mut()
            .remove(&handle.table_name)
            .ok_or_else(|| not_open(handle))?;
        Ok(session.dirty.then_some(session.document))
    }
}

fn not_open(handle: &StoreHandle) -> PipelineError {
    PipelineError::Store(format!("sheet {} is not open", handle.table_name))
}

fn data_offset(row_index: usize) -> Result<usize, PipelineError> {
    row_index.checked_sub(FIRST_DATA_ROW).ok_or_else(|| {
        PipelineError::Store(format!(
            "row {row_index} is not a data row (data starts at row {FIRST_DATA_ROW})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{DocumentSessions, SheetDocument, StoreHandle};

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn insert_at_top_pushes_existing_rows_down() {
        let mut document = SheetDocument {
            header: row(&["ts", "k"]),
            rows: vec![row(&["t0", "old"])],
            ..SheetDocument::default()
        };

        document
            .insert_rows_at(2, &[row(&["t1", "a"]), row(&["t1", "b"])])
            .expect("insert");
        assert_eq!(
            document.rows,
            vec![row(&["t1", "a"]), row(&["t1", "b"]), row(&["t0", "old"])]
        );
        assert_eq!(document.all_rows()[2], (4, row(&["t0", "old"])));
    }

    #[test]
    fn header_row_is_not_addressable_as_data() {
        let mut document = SheetDocument::default();
        assert!(document.update_row(1, &row(&["x"])).is_err());
        assert!(document.insert_rows_at(0, &[row(&["x"])]).is_err());
        assert!(document.row_range(2, 5).expect("empty range").is_empty());
    }

    #[test]
    fn batch_update_is_all_or_nothing() {
        let mut document = SheetDocument {
            rows: vec![row(&["a"]), row(&["b"])],
            ..SheetDocument::default()
        };

        let result = document.batch_update(&[(2, row(&["A"])), (9, row(&["Z"]))]);
        assert!(result.is_err());
        assert_eq!(document.rows, vec![row(&["a"]), row(&["b"])]);

        document
            .batch_update(&[(3, row(&["B"]))])
            .expect("in-range update");
        assert_eq!(document.rows, vec![row(&["a"]), row(&["B"])]);
    }

    fn handle(table_name: &str) -> StoreHandle {
        StoreHandle {
            table_name: table_name.to_string(),
            created: false,
        }
    }

    #[test]
    fn session_collects_every_mutation_into_one_write() {
        let sessions = DocumentSessions::default();
        assert!(sessions.begin("History_Log", None));
        let tab = handle("History_Log");

        sessions
            .modify(&tab, |document| {
                document.header = row(&["ts", "k"]);
                Ok(())
            })
            .expect("header");
        sessions
            .modify(&tab, |document| document.insert_rows_at(2, &[row(&["t1", "a"])]))
            .expect("insert");
        sessions
            .modify(&tab, |document| document.batch_update(&[(2, row(&["t1", "b"]))]))
            .expect("update");

        let written = sessions.finish(&tab).expect("finish");
        assert_eq!(
            written,
            Some(SheetDocument {
                header: row(&["ts", "k"]),
                rows: vec![row(&["t1", "b"])],
                ..SheetDocument::default()
            })
        );
        assert!(!sessions.is_open("History_Log"));
        assert!(sessions.finish(&tab).is_err());
    }

    #[test]
    fn untouched_or_rejected_session_writes_nothing() {
        let sessions = DocumentSessions::default();
        let stored = SheetDocument {
            header: row(&["ts", "k"]),
            rows: vec![row(&["t0", "a"])],
            ..SheetDocument::default()
        };
        assert!(!sessions.begin("Stock_Scanner", Some(stored.clone())));
        let tab = handle("Stock_Scanner");

        let rows = sessions
            .read(&tab, |document| Ok(document.all_rows()))
            .expect("read");
        assert_eq!(rows, vec![(2, row(&["t0", "a"]))]);
        assert!(
            sessions
                .modify(&tab, |document| document.batch_update(&[(9, row(&["x"]))]))
                .is_err()
        );

        assert_eq!(sessions.finish(&tab).expect("finish"), None);
    }
}
