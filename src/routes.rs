use serde::Serialize;
use worker::{Context, Env, Request, Response, Result, RouteContext, Router};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::kv_store::KvSheetStore;
use crate::models::{HealthResponse, RunReport};
use crate::{logging, now_utc, pipeline};

pub async fn handle(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    Router::new()
        .get("/api/v1/health", health_route)
        .post_async("/api/v1/sync", sync_route)
        .run(req, env)
        .await
}

fn health_route(_req: Request, _ctx: RouteContext<()>) -> Result<Response> {
    json_response(&HealthResponse {
        status: "ok".to_string(),
    })
}

async fn sync_route(req: Request, ctx: RouteContext<()>) -> Result<Response> {
    match sync_response(&req, &ctx.env).await {
        Ok(report) => json_response(&report),
        Err(error) => error.into_response(),
    }
}

async fn sync_response(req: &Request, env: &Env) -> std::result::Result<RunReport, PipelineError> {
    let config = PipelineConfig::from_env(env)?;
    logging::init(&config.log_level);

    let authorization = req.headers().get("Authorization")?;
    authorize(authorization.as_deref(), config.sync_token.as_deref())?;

    let store = KvSheetStore::from_env(env, &config.kv_binding, &config.spreadsheet_name)?;
    pipeline::run(&config, &store, now_utc()).await
}

/// Manual runs need `Authorization: Bearer <SYNC_TOKEN>`; without a configured
/// token the route stays closed.
pub fn authorize(header: Option<&str>, expected: Option<&str>) -> std::result::Result<(), PipelineError> {
    let Some(expected) = expected else {
        return Err(PipelineError::Unauthorized(
            "manual sync is disabled (no SYNC_TOKEN configured)".to_string(),
        ));
    };

    let presented = header
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(PipelineError::Unauthorized(
            "missing or invalid bearer token".to_string(),
        ))
    }
}

fn json_response<T>(payload: &T) -> Result<Response>
where
    T: Serialize,
{
    let mut response = Response::from_json(payload)?;
    response.headers_mut().set("Cache-Control", "no-store")?;
    Ok(response)
}
