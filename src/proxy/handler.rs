//! CONNECT gateway
//!
//! Accepts CONNECT requests from clients, obtains a tunnel from the pool and
//! relays the hijacked client connection over it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::error::{PoolError, Result};
use crate::proxy::pool::Pool;
use crate::proxy::request::ProxyRequest;
use crate::proxy::tunnel::TunnelHandler;

/// Configuration for the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a request may wait for a usable endpoint
    pub select_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            select_timeout: Duration::from_secs(30),
        }
    }
}

/// Turns CONNECT requests into relayed tunnels
pub struct Gateway {
    pool: Arc<Pool>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(pool: Arc<Pool>, config: GatewayConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Handle one inbound request
    ///
    /// Dropping this future abandons the selection and releases any
    /// reservation it holds.
    #[instrument(skip(self, req, client_ip), fields(method = %req.method(), uri = %req.uri(), client = %client_ip))]
    pub async fn handle<B>(
        &self,
        mut req: Request<B>,
        client_ip: &str,
    ) -> Result<Response<Full<Bytes>>> {
        if req.method() != Method::CONNECT {
            debug!("Rejecting non-CONNECT request");
            let mut response = text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Only CONNECT is supported",
            );
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("CONNECT"));
            return Ok(response);
        }

        let request = ProxyRequest::from_request(&req)?.with_deadline(self.config.select_timeout);

        let (endpoint, tunnel) = match self.pool.connect_for(&request).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!(target = %request.authority(), error = %e, "No tunnel for CONNECT");
                return Ok(text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("No proxy available: {}", e),
                ));
            }
        };

        let on_upgrade = req.extensions_mut().remove::<OnUpgrade>().ok_or_else(|| {
            PoolError::HijackUnsupported("connection does not support upgrades".to_string())
        })?;

        info!(
            endpoint = %endpoint,
            target = %request.authority(),
            "CONNECT established"
        );

        tokio::spawn(
            async move {
                match on_upgrade.await {
                    Ok(upgraded) => {
                        TunnelHandler::run(TokioIo::new(upgraded), tunnel).await;
                    }
                    Err(e) => debug!(error = %e, "CONNECT upgrade failed"),
                }
            }
            .in_current_span(),
        );

        Ok(Response::new(Full::new(Bytes::new())))
    }
}

/// Plain-text response with the given status
pub fn text_response(status: StatusCode, message: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(message.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
