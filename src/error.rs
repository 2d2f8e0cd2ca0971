use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Registration errors
    #[error("Unsupported proxy scheme: {0} (expected http, https or socks5)")]
    InvalidScheme(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Selection errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Proxy {endpoint} is cooling down for {host}")]
    Unservable { endpoint: String, host: String },

    #[error("Request cancelled before a proxy could be established")]
    Cancelled,

    // Dial errors
    #[error("Proxy connection failed: {0}")]
    DialFailure(String),

    #[error("Proxy {0} requires authentication (invalid or missing Proxy-Authorization)")]
    AuthRequired(String),

    #[error("Unexpected CONNECT response from {endpoint}: {status}")]
    UnexpectedStatus { endpoint: String, status: String },

    #[error("Connecting through {0} timed out")]
    ConnectTimeout(String),

    // Gateway errors
    #[error("Client connection cannot be hijacked: {0}")]
    HijackUnsupported(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Get the HTTP status code the gateway answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidScheme(_)
            | PoolError::InvalidProxyAddress(_)
            | PoolError::InvalidRequest(_)
            | PoolError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 407 Proxy Authentication Required
            PoolError::AuthenticationFailed => StatusCode::PROXY_AUTHENTICATION_REQUIRED,

            // 502 Bad Gateway
            PoolError::DialFailure(_)
            | PoolError::AuthRequired(_)
            | PoolError::UnexpectedStatus { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            PoolError::NoProxiesAvailable
            | PoolError::Unservable { .. }
            | PoolError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            PoolError::ConnectTimeout(_) => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            PoolError::HijackUnsupported(_) | PoolError::Io(_) | PoolError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the selection loop should move on to the next endpoint
    ///
    /// Cooldown refusals and every dial-level failure are local to one
    /// attempt; anything else ends the loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::Unservable { .. }
                | PoolError::DialFailure(_)
                | PoolError::AuthRequired(_)
                | PoolError::UnexpectedStatus { .. }
                | PoolError::ConnectTimeout(_)
        )
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for PoolError {
    fn from(err: hyper::Error) -> Self {
        PoolError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidProxyAddress(err.to_string())
    }
}
