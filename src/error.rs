use thiserror::Error;

/// Failure of a call against the upstream delivery API.
///
/// Never retried internally: IMAP turns it into a tagged NO, SMTP into a 451.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to delivery API failed: {0}")]
    Transport(String),

    #[error("delivery API did not answer within {0}s")]
    Timeout(u64),

    #[error("delivery API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response from delivery API: {0}")]
    Malformed(String),

    #[error("token request failed: {0}")]
    Token(String),
}

impl ApiError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(timeout_secs)
        } else if err.is_decode() {
            ApiError::Malformed(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Errors that can stop the whole gateway (startup and configuration).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl GatewayError {
    pub(crate) fn bind(addr: impl ToString, source: std::io::Error) -> Self {
        GatewayError::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}
