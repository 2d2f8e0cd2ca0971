//! TLS client setup for HTTPS upstream proxies
//!
//! The TLS session is with the proxy itself; traffic to the target travels
//! inside it after the CONNECT exchange.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use crate::error::{PoolError, Result};

/// TLS settings applied to every `https` endpoint in a pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// Extra PEM bundle trusted in addition to the webpki roots
    pub ca_file: Option<String>,
    /// Skip certificate verification of the proxy
    pub insecure: bool,
}

/// Build the connector used to reach HTTPS proxies
pub fn build_connector(settings: &TlsSettings) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| PoolError::InvalidConfig(format!("TLS setup failed: {}", e)))?;

    let config = if settings.insecure {
        warn!("Proxy certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(load_roots(settings.ca_file.as_deref())?)
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

fn load_roots(ca_file: Option<&str>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let Some(path) = ca_file else {
        return Ok(roots);
    };

    let file = File::open(path).map_err(|e| {
        PoolError::InvalidConfig(format!("Failed to open CA file '{}': {}", path, e))
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| PoolError::InvalidConfig(format!("Failed to parse CA file '{}': {}", path, e)))?;

    if certs.is_empty() {
        return Err(PoolError::InvalidConfig(format!(
            "No certificates found in CA file: {}",
            path
        )));
    }

    let (added, ignored) = roots.add_parsable_certificates(certs);
    info!(added, ignored, "Loaded extra CA certificates from {}", path);
    Ok(roots)
}

/// SNI / verification name for a proxy host
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| PoolError::InvalidProxyAddress(format!("Invalid TLS server name '{}': {}", host, e)))
}

/// Accepts any proxy certificate. Only reachable through `insecure`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
