//! Error types for the static map renderer

use thiserror::Error;

/// Result type alias for renderer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering a map
#[derive(Error, Debug)]
pub enum Error {
    /// A declared asset could not be read at startup
    #[error("Failed to load asset '{name}' from {path}: {reason}")]
    AssetLoad {
        name: String,
        path: String,
        reason: String,
    },

    /// The HTML template failed to render
    #[error("Template rendering failed: {0}")]
    Template(String),

    /// The request options are inconsistent or malformed
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The browser process could not be started
    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    /// A page could not be created, configured or loaded
    #[error("Page operation failed: {0}")]
    Page(String),

    /// The page did not reach network-idle within the bound
    #[error("Content did not settle within {0}ms")]
    ContentLoadTimeout(u64),

    /// Runtime fault, uncaught script exception or console error inside the page
    #[error("Page fault: {0}")]
    PageRuntimeFault(String),

    /// Capturing the screenshot failed
    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    /// The external encoder could not be spawned
    #[error("Failed to launch encoder: {0}")]
    EncoderLaunch(String),

    /// The external encoder exited unsuccessfully
    #[error("Encoder exited with {status}: {stderr}")]
    EncoderExit { status: String, stderr: String },

    /// The external encoder closed its output without producing bytes
    #[error("Encoder produced no output")]
    EncoderEmptyOutput,

    /// Writing to or reading from the encoder failed
    #[error("Encoder stream error: {0}")]
    EncoderIo(String),

    /// In-process re-encoding failed
    #[error("Compression failed: {0}")]
    Compression(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Startup,
    Request,
    Browser,
    Timeout,
    PageFault,
    Encoder,
    Internal,
}

impl Error {
    /// Classify the error so callers can tell a timeout from an in-page
    /// fault from an encoder failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AssetLoad { .. } => ErrorKind::Startup,
            Error::InvalidOptions(_) | Error::Template(_) => ErrorKind::Request,
            Error::BrowserLaunch(_) | Error::Page(_) | Error::Screenshot(_) => ErrorKind::Browser,
            #[cfg(feature = "cdp")]
            Error::Cdp(_) => ErrorKind::Browser,
            Error::ContentLoadTimeout(_) => ErrorKind::Timeout,
            Error::PageRuntimeFault(_) => ErrorKind::PageFault,
            Error::EncoderLaunch(_)
            | Error::EncoderExit { .. }
            | Error::EncoderEmptyOutput
            | Error::EncoderIo(_)
            | Error::Compression(_) => ErrorKind::Encoder,
            Error::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(format!("Blocking task failed: {}", err))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}
