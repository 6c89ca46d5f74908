#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to parse listen address: {0}")]
    BadListenAddress(#[from] std::net::AddrParseError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("An unknown error occurred: {0}")]
    Other(anyhow::Error),
}
