use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl MessengerError {
    /// Classify a transport failure, keeping timeouts distinct.
    pub fn from_transport(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            MessengerError::Timeout(timeout)
        } else {
            MessengerError::Network(e.to_string())
        }
    }
}
