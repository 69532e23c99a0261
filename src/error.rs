use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatherError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error at position {position}: {source}")]
    Xml {
        source: quick_xml::Error,
        position: usize,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot resolve path '{path}': {reason}")]
    Path { path: String, reason: String },

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("`{program}` failed ({status}): {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("`{program}` did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("No source files survived filtering; refusing to write an empty report")]
    EmptyReport,

    #[error("Upload rejected (HTTP {status}): {body}")]
    Upload { status: u16, body: String },

    #[error("Upload failed: {0}")]
    Transport(String),

    #[error("Cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Unrecognized coverage tool: {0}")]
    UnknownTool(String),
}

impl GatherError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        GatherError::Parse {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatherError>;
