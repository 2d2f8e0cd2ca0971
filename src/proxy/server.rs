//! Gateway server using hyper
//!
//! Accepts client connections and serves them over HTTP/1.1 with upgrades
//! enabled so CONNECT requests can be hijacked.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::GatewayServerConfig;
use crate::error::{PoolError, Result};
use crate::proxy::handler::{text_response, Gateway, GatewayConfig};
use crate::proxy::middleware::ProxyAuth;
use crate::proxy::pool::Pool;

/// Gateway server
pub struct ProxyServer {
    config: GatewayServerConfig,
    gateway: Arc<Gateway>,
    auth: ProxyAuth,
}

impl ProxyServer {
    /// Create a new gateway server over `pool`
    pub fn new(config: GatewayServerConfig, pool: Arc<Pool>) -> Self {
        let gateway = Arc::new(Gateway::new(
            pool,
            GatewayConfig {
                select_timeout: config.select_timeout(),
            },
        ));

        let auth = if config.auth_enabled {
            ProxyAuth::new(true, config.auth_username.clone(), config.auth_password.clone())
        } else {
            ProxyAuth::disabled()
        };

        Self {
            config,
            gateway,
            auth,
        }
    }

    /// Bind the configured address and serve until `shutdown` flips to true
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| {
                PoolError::InvalidConfig(format!(
                    "Invalid gateway address {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;

        let listener = TcpListener::bind(addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Gateway listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let gateway = self.gateway.clone();
                            let auth = self.auth.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    client_addr,
                                    gateway,
                                    auth,
                                ).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Serve a single client connection
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        gateway: Arc<Gateway>,
        auth: ProxyAuth,
    ) -> Result<()> {
        let io = TokioIo::new(stream);
        let client_ip = client_addr.ip().to_string();

        let service = service_fn(move |req: Request<Incoming>| {
            let gateway = gateway.clone();
            let auth = auth.clone();
            let client_ip = client_ip.clone();

            async move {
                if let Some(challenge) = auth.reject(&req) {
                    return Ok::<_, Infallible>(challenge);
                }

                match gateway.handle(req, &client_ip).await {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        if e.is_server_error() {
                            error!("Request handling error: {}", e);
                        } else {
                            debug!("Rejected request: {}", e);
                        }
                        Ok(text_response(e.status_code(), format!("Error: {}", e)))
                    }
                }
            }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await?;

        Ok(())
    }
}
