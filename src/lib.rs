//! proxypool - Forward-proxy pool
//!
//! Spreads outbound CONNECT tunnels across a set of upstream proxies.
//!
//! ## Features
//!
//! - HTTP, HTTPS and SOCKS5 upstream proxies, with optional credentials
//! - Independent round-robin rotation per destination host
//! - Optional per-host cooldown on every endpoint
//! - CONNECT gateway with optional Basic authentication

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{PoolError, Result};
pub use proxy::{EndpointOptions, Gateway, Pool, PoolConfig, ProxyRequest, ProxyServer};
