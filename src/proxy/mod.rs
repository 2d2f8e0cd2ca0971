//! Proxy pool and CONNECT gateway
//!
//! - `endpoint`/`transport`: upstream proxies and their handshakes
//! - `pool`: per-host round-robin selection with cooldowns
//! - `handler`/`server`: the inbound CONNECT gateway
//! - `tunnel`: byte relay between client and upstream

pub mod endpoint;
pub mod handler;
pub mod middleware;
pub mod pool;
pub mod request;
pub mod server;
pub mod tls;
pub mod transport;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::{Endpoint, EndpointOptions, ServePermit};
pub use handler::{Gateway, GatewayConfig};
pub use pool::{Candidate, Pool, PoolConfig};
pub use request::ProxyRequest;
pub use server::ProxyServer;
pub use transport::{ProxyTransport, Tunnel};
pub use tunnel::TunnelHandler;
