use std::str::FromStr;

use chrono::FixedOffset;
use worker::Env;

use crate::error::PipelineError;
use crate::extractor::FetchOptions;
use crate::models::{
    DEFAULT_KV_BINDING, DEFAULT_SOURCE_URL, DEFAULT_SPREADSHEET_NAME, DEFAULT_USER_AGENT,
};
use crate::normalize::NormalizeOptions;
use crate::sync::SyncOptions;

/// India Standard Time, the zone the persisted log is read in.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 5 * 60 + 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source_url: String,
    pub spreadsheet_name: String,
    pub kv_binding: String,
    pub fetch: FetchOptions,
    pub utc_offset_minutes: i32,
    pub future_tolerance_days: i64,
    pub update_chunk_size: usize,
    pub log_level: String,
    pub sync_token: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            spreadsheet_name: DEFAULT_SPREADSHEET_NAME.to_string(),
            kv_binding: DEFAULT_KV_BINDING.to_string(),
            fetch: FetchOptions::default(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            future_tolerance_days: 30,
            update_chunk_size: 200,
            log_level: "info".to_string(),
            sync_token: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env(env: &Env) -> Result<Self, PipelineError> {
        Self::from_lookup(|name| {
            env.var(name)
                .map(|value| value.to_string())
                .or_else(|_| env.secret(name).map(|value| value.to_string()))
                .ok()
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str, default: String| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };

        let config = Self {
            source_url: text("SOURCE_URL", defaults.source_url),
            spreadsheet_name: text("SPREADSHEET_NAME", defaults.spreadsheet_name),
            kv_binding: text("SHEETS_KV_BINDING", defaults.kv_binding),
            fetch: FetchOptions {
                user_agent: text("USER_AGENT", defaults.fetch.user_agent),
                navigation_timeout_ms: parse_var(
                    &lookup,
                    "NAVIGATION_TIMEOUT_MS",
                    defaults.fetch.navigation_timeout_ms,
                )?,
                table_wait_ms: parse_var(&lookup, "TABLE_WAIT_MS", defaults.fetch.table_wait_ms)?,
                table_poll_interval_ms: parse_var(
                    &lookup,
                    "TABLE_POLL_INTERVAL_MS",
                    defaults.fetch.table_poll_interval_ms,
                )?,
            },
            utc_offset_minutes: parse_var(
                &lookup,
                "UTC_OFFSET_MINUTES",
                defaults.utc_offset_minutes,
            )?,
            future_tolerance_days: parse_var(
                &lookup,
                "FUTURE_TOLERANCE_DAYS",
                defaults.future_tolerance_days,
            )?,
            update_chunk_size: parse_var(&lookup, "UPDATE_CHUNK_SIZE", defaults.update_chunk_size)?,
            log_level: text("LOG_LEVEL", defaults.log_level),
            sync_token: lookup("SYNC_TOKEN").filter(|value| !value.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        url::Url::parse(&self.source_url)?;
        if self.update_chunk_size == 0 {
            return Err(PipelineError::Config(
                "UPDATE_CHUNK_SIZE must be at least 1".to_string(),
            ));
        }
        if self.fetch.table_poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "TABLE_POLL_INTERVAL_MS must be at least 1".to_string(),
            ));
        }
        self.offset()?;
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset, PipelineError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            PipelineError::Config(format!(
                "UTC_OFFSET_MINUTES out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            future_tolerance_days: self.future_tolerance_days,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            update_chunk_size: self.update_chunk_size,
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, PipelineError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name).filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };

    raw.trim()
        .parse::<T>()
        .map_err(|error| PipelineError::Config(format!("{name}={raw:?} is invalid: {error}")))
}
