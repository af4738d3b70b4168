use std::time::Duration;

use futures::future::{Either, select};
use url::Url;
use worker::{AbortController, Delay, Fetch, Headers, Method, Request, RequestInit};

use crate::error::PipelineError;
use crate::models::DEFAULT_USER_AGENT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub user_agent: String,
    pub navigation_timeout_ms: u64,
    /// Budget for waiting on table markup; past it the last body is used as-is.
    pub table_wait_ms: u64,
    pub table_poll_interval_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout_ms: 60_000,
            table_wait_ms: 15_000,
            table_poll_interval_ms: 3_000,
        }
    }
}

/// Aborts the in-flight request when the attempt goes out of scope.
struct AbortOnDrop(Option<AbortController>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(controller) = self.0.take() {
            controller.abort();
        }
    }
}

pub async fn fetch_dashboard_html(url: &str, options: &FetchOptions) -> Result<String, PipelineError> {
    let target = Url::parse(url)?;
    let mut html = fetch_page(&target, options).await?;

    let mut waited_ms = 0;
    while !has_table_markup(&html) && waited_ms < options.table_wait_ms {
        Delay::from(Duration::from_millis(options.table_poll_interval_ms)).await;
        waited_ms += options.table_poll_interval_ms;

        match fetch_page(&target, options).await {
            Ok(body) => html = body,
            Err(error) => {
                tracing::warn!(%error, "refetch while waiting for tables failed; keeping last body");
                break;
            }
        }
    }

    if !has_table_markup(&html) {
        tracing::warn!(
            waited_ms,
            "no table markup after waiting; continuing with available html"
        );
    }

    tracing::info!(bytes = html.len(), url = %target, "dashboard fetched");
    Ok(html)
}

async fn fetch_page(target: &Url, options: &FetchOptions) -> Result<String, PipelineError> {
    let mut guard = AbortOnDrop(Some(AbortController::default()));
    let signal = guard
        .0
        .as_ref()
        .map(AbortController::signal)
        .ok_or_else(|| PipelineError::Internal("abort controller missing".to_string()))?;

    let headers = Headers::new();
    headers.set("User-Agent", &options.user_agent)?;
    headers.set("Accept", "text/html,application/xhtml+xml")?;
    let mut init = RequestInit::new();
    init.with_method(Method::Get).with_headers(headers);
    let request = Request::new_with_init(target.as_str(), &init)?;

    let send = Box::pin(async move {
        let mut response = Fetch::Request(request).send_with_signal(&signal).await?;
        let status = response.status_code();
        let body = response.text().await?;
        Ok::<_, worker::Error>((status, body))
    });
    let timeout = Box::pin(Delay::from(Duration::from_millis(options.navigation_timeout_ms)));

    let (status, body) = match select(send, timeout).await {
        Either::Left((Ok(result), _)) => result,
        Either::Left((Err(error), _)) => {
            return Err(PipelineError::Fetch(format!(
                "failed to load {target}: {error}"
            )));
        }
        Either::Right(((), _)) => {
            return Err(PipelineError::Fetch(format!(
                "timed out after {}ms loading {target}",
                options.navigation_timeout_ms
            )));
        }
    };

    if status >= 400 {
        return Err(PipelineError::Fetch(format!(
            "failed to fetch dashboard: status {status}"
        )));
    }

    guard.0 = None;
    Ok(body)
}

pub fn has_table_markup(html: &str) -> bool {
    html.to_ascii_lowercase().contains("<table")
}

#[cfg(test)]
mod tests {
    use super::has_table_markup;

    #[test]
    fn table_markup_detection_ignores_case() {
        assert!(has_table_markup("<div><TABLE class=\"x\"></TABLE></div>"));
        assert!(!has_table_markup("<div>Loading…</div>"));
    }
}
