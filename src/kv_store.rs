use async_trait::async_trait;
use worker::{Env, kv::KvStore};

use crate::error::PipelineError;
use crate::formatting::FormatRule;
use crate::store::{DocumentSessions, SheetDocument, SheetStore, StoreHandle};

pub const SHEET_KEY_PREFIX: &str = "sheet:v1:";

/// Tabs of one spreadsheet kept as JSON documents in Workers KV.
///
/// KV accepts one write per second per key, so a tab is read once when it is
/// opened, mutated in memory and written back by a single `put` on `commit`.
pub struct KvSheetStore {
    kv: KvStore,
    spreadsheet: String,
    sessions: DocumentSessions,
}

impl KvSheetStore {
    pub fn new(kv: KvStore, spreadsheet: impl Into<String>) -> Self {
        Self {
            kv,
            spreadsheet: spreadsheet.into(),
            sessions: DocumentSessions::default(),
        }
    }

    pub fn from_env(env: &Env, binding: &str, spreadsheet: &str) -> Result<Self, PipelineError> {
        let kv = env.kv(binding).map_err(|error| {
            PipelineError::Config(format!("KV binding {binding} is unavailable: {error}"))
        })?;
        Ok(Self::new(kv, spreadsheet))
    }

    fn key(&self, table_name: &str) -> String {
        sheet_key(&self.spreadsheet, table_name)
    }

    async fn load(&self, table_name: &str) -> Result<Option<SheetDocument>, PipelineError> {
        let Some(body) = self.kv.get(&self.key(table_name)).text().await? else {
            return Ok(None);
        };
        let document = serde_json::from_str::<SheetDocument>(&body)?;
        Ok(Some(document))
    }

    async fn save(&self, table_name: &str, document: &SheetDocument) -> Result<(), PipelineError> {
        let body = serde_json::to_string(document)?;
        self.kv.put(&self.key(table_name), body)?.execute().await?;
        Ok(())
    }
}

pub fn sheet_key(spreadsheet: &str, table_name: &str) -> String {
    format!(
        "{SHEET_KEY_PREFIX}{}:{}",
        urlencoding::encode(spreadsheet),
        urlencoding::encode(table_name)
    )
}

#[async_trait(?Send)]
impl SheetStore for KvSheetStore {
    async fn open_or_create(&self, table_name: &str) -> Result<StoreHandle, PipelineError> {
        if self.sessions.is_open(table_name) {
            return Err(PipelineError::Store(format!(
                "sheet {table_name} is already open"
            )));
        }

        let stored = self.load(table_name).await?;
        let created = self.sessions.begin(table_name, stored);
        if created {
            tracing::info!(table = table_name, spreadsheet = %self.spreadsheet, "creating sheet");
        }

        Ok(StoreHandle {
            table_name: table_name.to_string(),
            created,
        })
    }

    async fn read_header(&self, handle: &StoreHandle) -> Result<Vec<String>, PipelineError> {
        self.sessions.read(handle, |document| Ok(document.header.clone()))
    }

    async fn write_header(&self, handle: &StoreHandle, names: &[String]) -> Result<(), PipelineError> {
        self.sessions.modify(handle, |document| {
            document.header = names.to_vec();
            Ok(())
        })
    }

    async fn read_all_rows(
        &self,
        handle: &StoreHandle,
    ) -> Result<Vec<(usize, Vec<String>)>, PipelineError> {
        self.sessions.read(handle, |document| Ok(document.all_rows()))
    }

    async fn read_row_range(
        &self,
        handle: &StoreHandle,
        start_index: usize,
        count: usize,
    ) -> Result<Vec<Vec<String>>, PipelineError> {
        self.sessions
            .read(handle, |document| document.row_range(start_index, count))
    }

    async fn insert_rows_at(
        &self,
        handle: &StoreHandle,
        position: usize,
        rows: &[Vec<String>],
    ) -> Result<(), PipelineError> {
        self.sessions
            .modify(handle, |document| document.insert_rows_at(position, rows))
    }

    async fn update_row(
        &self,
        handle: &StoreHandle,
        row_index: usize,
        values: &[String],
    ) -> Result<(), PipelineError> {
        self.sessions
            .modify(handle, |document| document.update_row(row_index, values))
    }

    async fn batch_update(
        &self,
        handle: &StoreHandle,
        updates: &[(usize, Vec<String>)],
    ) -> Result<(), PipelineError> {
        self.sessions
            .modify(handle, |document| document.batch_update(updates))
    }

    async fn apply_formatting(
        &self,
        handle: &StoreHandle,
        rules: &[FormatRule],
    ) -> Result<(), PipelineError> {
        self.sessions.modify(handle, |document| {
            document.formatting = rules.to_vec();
            Ok(())
        })
    }

    async fn commit(&self, handle: &StoreHandle) -> Result<(), PipelineError> {
        let Some(document) = self.sessions.finish(handle)? else {
            tracing::debug!(table = %handle.table_name, "sheet unchanged, nothing to write");
            return Ok(());
        };
        self.save(&handle.table_name, &document).await
    }
}
