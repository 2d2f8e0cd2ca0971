//! Byte relay between a hijacked client and an upstream tunnel
//!
//! Each direction runs in its own task. When either direction finishes, the
//! other is torn down too: a tunnel is over as soon as one side is.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

/// Upper bound on closing one relay destination
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Handles the data phase of CONNECT tunnels
pub struct TunnelHandler;

impl TunnelHandler {
    /// Copy `source` into `destination` until EOF, an error, or `closed`
    /// fires; then fire `closed` and close `destination`
    ///
    /// The close is bounded by [`SHUTDOWN_GRACE`]; a peer that stopped
    /// reading gets its connection dropped instead.
    pub async fn relay<R, W>(mut source: R, mut destination: W, closed: CancellationToken) -> u64
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let copied = tokio::select! {
            result = tokio::io::copy(&mut source, &mut destination) => match result {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!(error = %e, "Relay copy ended");
                    None
                }
            },
            _ = closed.cancelled() => None,
        };

        closed.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, destination.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Relay shutdown failed"),
            Err(_) => debug!("Relay shutdown timed out, dropping destination"),
        }

        copied.unwrap_or(0)
    }

    /// Spawn both relay directions between `client` and `upstream`
    ///
    /// Returns the handles for client->upstream and upstream->client, each
    /// resolving to the bytes it copied.
    pub fn splice<C, U>(client: C, upstream: U) -> (JoinHandle<u64>, JoinHandle<u64>)
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (upstream_read, upstream_write) = tokio::io::split(upstream);
        let closed = CancellationToken::new();

        let outbound = tokio::spawn(
            Self::relay(client_read, upstream_write, closed.clone())
                .instrument(tracing::debug_span!("relay", direction = "outbound")),
        );
        let inbound = tokio::spawn(
            Self::relay(upstream_read, client_write, closed)
                .instrument(tracing::debug_span!("relay", direction = "inbound")),
        );

        (outbound, inbound)
    }

    /// Splice and wait for both directions, logging the byte counts
    pub async fn run<C, U>(client: C, upstream: U) -> (u64, u64)
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (outbound, inbound) = Self::splice(client, upstream);
        let (sent, received) = tokio::join!(outbound, inbound);
        let sent = sent.unwrap_or(0);
        let received = received.unwrap_or(0);

        debug!(bytes_sent = sent, bytes_received = received, "Tunnel closed");
        (sent, received)
    }
}
