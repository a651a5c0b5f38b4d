use thiserror::Error;

use crate::constants::API_KEY_ENV;

#[derive(Debug, Error)]
pub enum AnalystError {
    #[error("{} is not set; export it or add it to .env", API_KEY_ENV)]
    MissingApiKey,

    #[error("input is empty")]
    EmptyInput,

    #[error("request to completion endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed completion stream: {0}")]
    MalformedStream(String),

    #[error("failed to render prompt template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("invalid analysis pipeline: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = AnalystError> = std::result::Result<T, E>;
