use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the resume backend.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not a PDF file: {}", .0.display())]
    NotPdf(PathBuf),

    #[error("File is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// The response body broke off mid-stream.
    #[error("Stream error: {0}")]
    Transport(String),

    #[error("No data received for {0:?}")]
    IdleTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, ClientError>;
