//! Proxy transport layer for HTTP CONNECT, HTTPS CONNECT and SOCKS5
//!
//! Turns a raw TCP dial to an upstream proxy into a tunnel to a target host.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};

use crate::error::{PoolError, Result};
use crate::proxy::tls;

/// Upper bound on the CONNECT response head read from a proxy
const MAX_RESPONSE_HEAD: u64 = 8 * 1024;

/// A duplex byte stream carrying tunnel traffic
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// An established tunnel to a target host
pub type Tunnel = Box<dyn ProxyConnection>;

/// Network location and credentials of an upstream proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddress {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_tcp_addr(&self.host, self.port))
    }
}

/// Connection-establishment protocol spoken with an upstream proxy
#[derive(Clone)]
pub enum ProxyTransport {
    /// Plain-text HTTP CONNECT
    Http,
    /// HTTP CONNECT inside a TLS session with the proxy
    Https(TlsConnector),
    /// SOCKS5 CONNECT
    Socks5,
}

impl fmt::Debug for ProxyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl ProxyTransport {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyTransport::Http => "http",
            ProxyTransport::Https(_) => "https",
            ProxyTransport::Socks5 => "socks5",
        }
    }

    /// Default port when the proxy URL leaves it out
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyTransport::Http => 80,
            ProxyTransport::Https(_) => 443,
            ProxyTransport::Socks5 => 1080,
        }
    }

    /// Connect to `target` (a `host:port` authority) through `proxy`
    #[instrument(skip(self, proxy), fields(scheme = self.scheme(), proxy = %proxy))]
    pub async fn connect(&self, proxy: &ProxyAddress, target: &str) -> Result<Tunnel> {
        let (target_host, target_port) = parse_authority(target)?;

        match self {
            ProxyTransport::Http => {
                let stream = dial(proxy).await?;
                let tunnel = http_connect(stream, proxy, &target_host, target_port).await?;
                Ok(Box::new(tunnel))
            }
            ProxyTransport::Https(connector) => {
                let stream = dial(proxy).await?;
                let server_name = tls::server_name(&proxy.host)?;
                let stream = connector.connect(server_name, stream).await.map_err(|e| {
                    PoolError::DialFailure(format!("TLS handshake with {} failed: {}", proxy, e))
                })?;
                debug!("TLS session with proxy established");

                let tunnel = http_connect(stream, proxy, &target_host, target_port).await?;
                Ok(Box::new(tunnel))
            }
            ProxyTransport::Socks5 => {
                let tunnel = socks5_connect(proxy, &target_host, target_port).await?;
                Ok(Box::new(tunnel))
            }
        }
    }
}

async fn dial(proxy: &ProxyAddress) -> Result<TcpStream> {
    let stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(|e| PoolError::DialFailure(format!("TCP connect to {} failed: {}", proxy, e)))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Run the CONNECT exchange over an already-open stream to the proxy
///
/// The returned reader keeps any bytes the proxy sent past the response head,
/// so they reach the client ahead of later reads.
async fn http_connect<S>(
    stream: S,
    proxy: &ProxyAddress,
    target_host: &str,
    target_port: u16,
) -> Result<BufReader<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = format_connect_authority(target_host, target_port);
    let request = build_connect_request(proxy, &authority);

    let mut stream = BufReader::new(stream);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| PoolError::DialFailure(format!("Failed to send CONNECT to {}: {}", proxy, e)))?;
    stream
        .flush()
        .await
        .map_err(|e| PoolError::DialFailure(format!("Failed to send CONNECT to {}: {}", proxy, e)))?;

    let status_line = read_response_head(&mut stream, proxy).await?;
    match parse_status_code(&status_line) {
        Some(200) => {
            debug!("HTTP CONNECT tunnel to {} established", authority);
            Ok(stream)
        }
        Some(407) => Err(PoolError::AuthRequired(proxy.to_string())),
        Some(_) => Err(PoolError::UnexpectedStatus {
            endpoint: proxy.to_string(),
            status: status_line,
        }),
        None => Err(PoolError::DialFailure(format!(
            "Malformed CONNECT response from {}: {:?}",
            proxy, status_line
        ))),
    }
}

/// Build HTTP CONNECT request
fn build_connect_request(proxy: &ProxyAddress, authority: &str) -> String {
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let Some(username) = &proxy.username {
        let password = proxy.password.as_deref().unwrap_or("");
        let credentials = format!("{}:{}", username, password);
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials.as_bytes())
        ));
    }

    request.push_str("\r\n");
    request
}

/// Read the response head and return its status line
async fn read_response_head<S>(stream: &mut BufReader<S>, proxy: &ProxyAddress) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut limited = (&mut *stream).take(MAX_RESPONSE_HEAD);
    let mut status_line: Option<String> = None;

    loop {
        let mut line = String::new();
        let n = limited.read_line(&mut line).await.map_err(|e| {
            PoolError::DialFailure(format!("Failed to read CONNECT response from {}: {}", proxy, e))
        })?;

        if n == 0 {
            let reason = if limited.limit() == 0 {
                "CONNECT response head too large"
            } else {
                "connection closed during CONNECT"
            };
            return Err(PoolError::DialFailure(format!("{} ({})", reason, proxy)));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        match &status_line {
            None => status_line = Some(line.to_string()),
            Some(_) if line.is_empty() => break,
            Some(_) => {}
        }
    }

    Ok(status_line.unwrap_or_default())
}

fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Connect through SOCKS5 proxy
async fn socks5_connect(proxy: &ProxyAddress, target_host: &str, target_port: u16) -> Result<TcpStream> {
    let socket = dial(proxy).await?;

    let stream = match (&proxy.username, &proxy.password) {
        (Some(username), Some(password)) => {
            Socks5Stream::connect_with_password_and_socket(
                socket,
                (target_host, target_port),
                username,
                password,
            )
            .await
        }
        _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await,
    }
    .map_err(|e| PoolError::DialFailure(format!("SOCKS5 connect via {} failed: {}", proxy, e)))?;

    debug!("SOCKS5 connection established");
    Ok(stream.into_inner())
}

/// Parse host and port from a CONNECT authority
///
/// Bracketed IPv6 literals are unwrapped; a missing port means 443.
pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
    let authority = authority.trim();
    let invalid = || PoolError::InvalidRequest(format!("Invalid CONNECT authority: {:?}", authority));

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':').ok_or_else(invalid)?),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            Some(_) => (authority, None),
            None => (authority, None),
        }
    };

    if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
        return Err(invalid());
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => 443,
    };

    Ok((host.to_string(), port))
}

pub(crate) fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn format_connect_authority(host: &str, port: u16) -> String {
    format_tcp_addr(host, port)
}
