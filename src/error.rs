use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlCorrectionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the call to the query engine itself, as opposed to errors the
/// engine reports about a statement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("malformed engine response: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, SqlCorrectionError>;
