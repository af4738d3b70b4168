use std::fmt::{Display, Formatter};

use worker::{Response, Result};

use crate::models::ErrorResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    Unauthorized(String),
    Fetch(String),
    Store(String),
    Config(String),
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Fetch(_) => "fetch_failure",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized(message)
            | Self::Fetch(message)
            | Self::Store(message)
            | Self::Config(message)
            | Self::Internal(message) => message,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::Fetch(_) | Self::Store(_) => 502,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    pub fn into_response(self) -> Result<Response> {
        let mut response = Response::from_json(&ErrorResponse {
            code: self.code().to_string(),
            message: self.message().to_string(),
        })?;
        response.headers_mut().set("Cache-Control", "no-store")?;
        Ok(response.with_status(self.status_code()))
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for PipelineError {}

impl From<worker::Error> for PipelineError {
    fn from(error: worker::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<worker::KvError> for PipelineError {
    fn from(error: worker::KvError) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        Self::Store(format!("malformed sheet document: {error}"))
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(error: url::ParseError) -> Self {
        Self::Config(format!("invalid url: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineError;

    #[test]
    fn fetch_and_store_failures_map_to_bad_gateway() {
        assert_eq!(PipelineError::Fetch("dns".to_string()).status_code(), 502);
        assert_eq!(PipelineError::Store("kv".to_string()).status_code(), 502);
        assert_eq!(
            PipelineError::Unauthorized("no token".to_string()).to_string(),
            "unauthorized: no token"
        );
    }

    #[test]
    fn bad_settings_are_server_errors() {
        let error = PipelineError::from(url::Url::parse("not a url").expect_err("relative url"));
        assert_eq!(error.code(), "config_error");
        assert_eq!(error.status_code(), 500);
    }
}
