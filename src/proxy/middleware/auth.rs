//! Inbound proxy authentication
//!
//! Checks the client's `Proxy-Authorization: Basic` credentials before the
//! gateway touches the pool.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::proxy::handler::text_response;

const REALM: &str = "Basic realm=\"proxypool\"";

#[derive(PartialEq, Eq)]
struct Credentials {
    username: String,
    password: String,
}

/// Gate in front of the gateway; cheap to clone per connection
#[derive(Clone, Default)]
pub struct ProxyAuth {
    expected: Option<Arc<Credentials>>,
}

impl ProxyAuth {
    pub fn new(enabled: bool, username: String, password: String) -> Self {
        let expected = enabled.then(|| Arc::new(Credentials { username, password }));
        Self { expected }
    }

    /// Accept every request
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Check the `Proxy-Authorization` header against the configured user
    pub fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let Some(expected) = &self.expected else {
            return Ok(());
        };

        let offered = headers
            .get(PROXY_AUTHORIZATION)
            .and_then(decode_basic)
            .ok_or(PoolError::AuthenticationFailed)?;

        if offered == **expected {
            debug!(user = %offered.username, "Client authenticated");
            Ok(())
        } else {
            warn!(user = %offered.username, "Client credentials rejected");
            Err(PoolError::AuthenticationFailed)
        }
    }

    /// The 407 challenge to send instead of serving `req`, if it is not
    /// authorized
    pub fn reject<T>(&self, req: &Request<T>) -> Option<Response<Full<Bytes>>> {
        self.authorize(req.headers()).err().map(|_| challenge())
    }
}

/// 407 response asking the client for Basic credentials
fn challenge() -> Response<Full<Bytes>> {
    let mut response = text_response(
        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        "Proxy authentication required",
    );
    response
        .headers_mut()
        .insert(PROXY_AUTHENTICATE, HeaderValue::from_static(REALM));
    response
}

/// `user:password` from a Basic header value; the scheme is case-insensitive
fn decode_basic(value: &HeaderValue) -> Option<Credentials> {
    let (scheme, encoded) = value.to_str().ok()?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = String::from_utf8(BASE64.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}
