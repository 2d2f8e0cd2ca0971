//! Loopback fixtures standing in for targets and upstream proxies in tests.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::proxy::tls::{build_connector, TlsSettings};

pub const CERT_PEM: &[u8] =
    include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/proxy-cert.pem"));
pub const KEY_PEM: &[u8] =
    include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/proxy-key.pem"));

/// Server side of the self-signed fixture certificate
pub fn tls_acceptor() -> TlsAcceptor {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &CERT_PEM[..])
        .collect::<Result<_, _>>()
        .unwrap();
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &KEY_PEM[..])
        .unwrap()
        .unwrap();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

/// Client connector that trusts the fixture certificate
pub fn insecure_connector() -> TlsConnector {
    build_connector(&TlsSettings {
        ca_file: None,
        insecure: true,
    })
    .unwrap()
}

/// An address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Echoes every byte back on each accepted connection
pub async fn spawn_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// How a fake upstream proxy answers CONNECT
#[derive(Debug, Clone, Copy)]
pub enum ProxyReply {
    /// `200`, then relay to the requested target
    Tunnel,
    /// Send this status line and close
    Status(&'static str),
    /// Send these raw bytes and keep the connection open until the peer closes
    Raw(&'static str),
    /// Close right after reading the request
    Hangup,
}

/// A fake HTTP(S) CONNECT proxy listening on loopback
pub struct FakeProxy {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeProxy {
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}", scheme, self.addr)
    }

    /// Request heads received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().len()
    }
}

pub async fn spawn_connect_proxy(reply: ProxyReply, tls: Option<TlsAcceptor>) -> FakeProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = requests.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = seen.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => {
                        if let Ok(stream) = acceptor.accept(stream).await {
                            serve_connect(stream, reply, seen).await;
                        }
                    }
                    None => serve_connect(stream, reply, seen).await,
                }
            });
        }
    });

    FakeProxy { addr, requests }
}

async fn serve_connect<S>(stream: S, reply: ProxyReply, seen: Arc<Mutex<Vec<String>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        if line == "\r\n" {
            break;
        }
        head.push_str(&line);
    }
    seen.lock().push(head.clone());

    match reply {
        ProxyReply::Tunnel => {
            let target = head.split_whitespace().nth(1).unwrap_or_default().to_string();
            let Ok(mut upstream) = TcpStream::connect(&target).await else {
                let _ = stream
                    .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n")
                    .await;
                let _ = stream.shutdown().await;
                return;
            };
            let _ = stream
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await;
            let _ = stream.flush().await;
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        }
        ProxyReply::Status(status_line) => {
            let response = format!("{}\r\nContent-Length: 0\r\n\r\n", status_line);
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        ProxyReply::Raw(bytes) => {
            let _ = stream.write_all(bytes.as_bytes()).await;
            let _ = stream.flush().await;
            let mut sink = tokio::io::sink();
            let _ = tokio::io::copy(&mut stream, &mut sink).await;
        }
        ProxyReply::Hangup => {}
    }
}
