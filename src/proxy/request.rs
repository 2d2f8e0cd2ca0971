//! The request shape consumed by the pool
//!
//! Carries the destination and the cancellation signal the selection loop
//! observes between attempts.

use std::time::Duration;

use http::uri::Authority;
use hyper::{Method, Request, Uri};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PoolError, Result};
use crate::proxy::transport::{format_tcp_addr, parse_authority};

/// A destination to tunnel to, plus its cancellation context
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    method: Method,
    host: String,
    authority: String,
    uri: Uri,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ProxyRequest {
    /// A CONNECT request to `authority` (`host:port`)
    pub fn connect(authority: &str) -> Result<Self> {
        let (host, port) = parse_authority(authority)?;
        let authority = format_tcp_addr(&host, port);
        let uri = authority
            .parse::<Uri>()
            .map_err(|e| PoolError::InvalidRequest(format!("Invalid authority {}: {}", authority, e)))?;

        Ok(Self::build(Method::CONNECT, host, authority, uri))
    }

    /// Extract the destination of an inbound HTTP request
    ///
    /// CONNECT requests carry it in authority form; anything else needs an
    /// absolute URI or a `Host` header.
    pub fn from_request<B>(req: &Request<B>) -> Result<Self> {
        let uri = req.uri().clone();

        if req.method() == Method::CONNECT {
            let authority = uri
                .authority()
                .map(|a| a.to_string())
                .unwrap_or_else(|| uri.to_string());
            let mut request = Self::connect(&authority)?;
            request.uri = uri;
            return Ok(request);
        }

        let default_port = match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        };
        let target = match uri.authority() {
            Some(authority) => authority.clone(),
            None => req
                .headers()
                .get(hyper::header::HOST)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.parse::<Authority>().ok())
                .ok_or_else(|| PoolError::InvalidRequest("Missing host in request".to_string()))?,
        };
        let host = target.host();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_string();
        let port = target.port_u16().unwrap_or(default_port);
        let authority = format_tcp_addr(&host, port);

        Ok(Self::build(req.method().clone(), host, authority, uri))
    }

    fn build(method: Method, host: String, authority: String, uri: Uri) -> Self {
        Self {
            method,
            host: host.to_ascii_lowercase(),
            authority,
            uri,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Tie the request to an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Give up once `timeout` has passed from now
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Destination host (lowercase, no port); the per-host rotation key
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Destination `host:port`
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token fires or the deadline passes
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}
