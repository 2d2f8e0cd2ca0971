//! Upstream proxy endpoints
//!
//! An endpoint owns its address, the transport used to reach it, and the
//! per-destination-host cooldown bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{PoolError, Result};
use crate::proxy::transport::{ProxyAddress, ProxyTransport, Tunnel};

/// Registration options for an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Minimum spacing between two uses of the endpoint for the same host.
    /// Zero disables throttling.
    pub cooldown_per_host: Duration,
}

impl EndpointOptions {
    pub fn cooldown_per_host(mut self, cooldown: Duration) -> Self {
        self.cooldown_per_host = cooldown;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum HostSlot {
    /// Last confirmed use for the host
    Served(Instant),
    /// A dial for the host is in flight on this endpoint
    Reserved { previous: Option<Instant> },
}

/// One upstream proxy
pub struct Endpoint {
    url: Url,
    label: String,
    address: ProxyAddress,
    transport: ProxyTransport,
    cooldown: Duration,
    slots: Mutex<HashMap<String, HostSlot>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.label)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Endpoint {
    /// Validate a proxy URL and build the endpoint for it
    ///
    /// `tls` is only used by `https` endpoints.
    pub fn parse(raw: &str, options: EndpointOptions, tls: &TlsConnector) -> Result<Self> {
        let url = Url::parse(raw.trim())?;

        let transport = match url.scheme() {
            "http" => ProxyTransport::Http,
            "https" => ProxyTransport::Https(tls.clone()),
            "socks5" => ProxyTransport::Socks5,
            other => return Err(PoolError::InvalidScheme(other.to_string())),
        };

        if url.fragment().is_some() || url.query().is_some() {
            return Err(PoolError::InvalidProxyAddress(format!(
                "{} must not include query/fragment",
                raw
            )));
        }
        if !(url.path().is_empty() || url.path() == "/") {
            return Err(PoolError::InvalidProxyAddress(format!(
                "{} must not include a path",
                raw
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PoolError::InvalidProxyAddress(format!("{} is missing a host", raw)))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_string();
        let port = url.port().unwrap_or_else(|| transport.default_port());

        let username = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };
        let password = url.password().map(str::to_string);

        if matches!(transport, ProxyTransport::Socks5)
            && username.is_some()
            && password.as_deref().unwrap_or("").is_empty()
        {
            return Err(PoolError::InvalidProxyAddress(format!(
                "{}: socks5 auth requires a non-empty password",
                raw
            )));
        }

        let address = ProxyAddress {
            host,
            port,
            username,
            password,
        };
        let label = format!("{}://{}", transport.scheme(), address);

        Ok(Self {
            url,
            label,
            address,
            transport,
            cooldown: options.cooldown_per_host,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// The proxy URL as registered, credentials included
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    pub fn scheme(&self) -> &'static str {
        self.transport.scheme()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Establish a tunnel to `target` (`host:port`) through this endpoint
    #[instrument(skip(self), fields(endpoint = %self.label))]
    pub async fn connect(&self, target: &str) -> Result<Tunnel> {
        self.transport.connect(&self.address, target).await
    }

    /// Atomically check the host's cooldown and reserve the endpoint for it
    ///
    /// Returns `None` while the cooldown runs or while another caller holds a
    /// reservation for the same host. The reservation becomes the new
    /// last-served time only when the permit is committed.
    pub fn try_serve(self: &Arc<Self>, host: &str) -> Option<ServePermit> {
        if self.cooldown.is_zero() {
            return Some(ServePermit::unthrottled());
        }

        let now = Instant::now();
        let mut slots = self.slots.lock();
        let previous = match slots.get(host) {
            Some(HostSlot::Reserved { .. }) => return None,
            Some(HostSlot::Served(at)) if now.duration_since(*at) < self.cooldown => return None,
            Some(HostSlot::Served(at)) => Some(*at),
            None => None,
        };
        slots.insert(host.to_string(), HostSlot::Reserved { previous });

        Some(ServePermit {
            reservation: Some((self.clone(), host.to_string())),
        })
    }

    /// Time until the endpoint may serve `host` again
    ///
    /// `Some(ZERO)` when it can serve now, `None` while a reservation for the
    /// host is outstanding.
    pub fn cooldown_remaining(&self, host: &str) -> Option<Duration> {
        if self.cooldown.is_zero() {
            return Some(Duration::ZERO);
        }

        match self.slots.lock().get(host) {
            None => Some(Duration::ZERO),
            Some(HostSlot::Reserved { .. }) => None,
            Some(HostSlot::Served(at)) => Some(self.cooldown.saturating_sub(at.elapsed())),
        }
    }

    fn finish_reservation(&self, host: &str, committed: bool) {
        let mut slots = self.slots.lock();
        let Some(HostSlot::Reserved { previous }) = slots.get(host).copied() else {
            return;
        };

        if committed {
            slots.insert(host.to_string(), HostSlot::Served(Instant::now()));
        } else {
            match previous {
                Some(at) => {
                    slots.insert(host.to_string(), HostSlot::Served(at));
                }
                None => {
                    slots.remove(host);
                }
            }
        }
    }
}

/// Permission to use an endpoint for one host
///
/// Dropping the permit without committing releases the reservation and
/// leaves the previous last-served time in place.
#[must_use = "an uncommitted permit does not count as a use"]
pub struct ServePermit {
    reservation: Option<(Arc<Endpoint>, String)>,
}

impl ServePermit {
    fn unthrottled() -> Self {
        Self { reservation: None }
    }

    /// Record the use as the host's new last-served time
    pub fn commit(mut self) {
        if let Some((endpoint, host)) = self.reservation.take() {
            debug!(endpoint = %endpoint, host = %host, "Recorded use for cooldown");
            endpoint.finish_reservation(&host, true);
        }
    }
}

impl Drop for ServePermit {
    fn drop(&mut self) {
        if let Some((endpoint, host)) = self.reservation.take() {
            endpoint.finish_reservation(&host, false);
        }
    }
}
