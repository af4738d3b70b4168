pub mod config;
pub mod error;
pub mod extractor;
pub mod formatting;
pub mod html_tables;
pub mod indicators;
pub mod kv_store;
pub mod logging;
pub mod memory_store;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod routes;
pub mod store;
pub mod sync;

use chrono::{DateTime, Utc};
use worker::{Context, Env, Request, Response, Result, ScheduleContext, ScheduledEvent, event};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::kv_store::KvSheetStore;
use crate::models::RunStatus;

#[event(fetch)]
async fn fetch(req: Request, env: Env, ctx: Context) -> Result<Response> {
    routes::handle(req, env, ctx).await
}

#[event(scheduled)]
async fn scheduled(event: ScheduledEvent, env: Env, _ctx: ScheduleContext) {
    let scheduled_at = millis_to_utc(event.schedule()).unwrap_or_else(now_utc);

    if let Err(error) = scheduled_run(&env, scheduled_at).await {
        worker::console_error!("scheduled sync failed: {error}");
    }
}

async fn scheduled_run(env: &Env, scheduled_at: DateTime<Utc>) -> std::result::Result<(), PipelineError> {
    let config = PipelineConfig::from_env(env)?;
    logging::init(&config.log_level);

    let store = KvSheetStore::from_env(env, &config.kv_binding, &config.spreadsheet_name)?;
    let report = pipeline::run(&config, &store, scheduled_at).await?;

    for outcome in report.tables.iter().filter(|outcome| !outcome.is_success()) {
        tracing::error!(table = outcome.table(), "table left unsynchronized this run");
    }
    if report.status != RunStatus::Success {
        tracing::warn!(status = ?report.status, "scheduled run finished with failures");
    }
    Ok(())
}

/// Wall clock from the JS runtime; `SystemTime` is unavailable on wasm32.
pub fn now_utc() -> DateTime<Utc> {
    i64::try_from(worker::Date::now().as_millis())
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation)]
fn millis_to_utc(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}
