//! v3 transport error types

use thiserror::Error;

/// Failure to set up a client. Request failures are reported as
/// [`prismflow_cloud::ApiError`].
#[derive(Error, Debug)]
pub enum PrismApiError {
    #[error("Invalid proxy URL {url:?}: {source}")]
    InvalidProxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(#[from] prismflow_config::ConfigError),
}

pub type Result<T> = std::result::Result<T, PrismApiError>;
