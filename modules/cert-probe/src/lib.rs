//! Certificate expiry probe: one TLS handshake per call, reading the leaf
//! certificate's `notAfter`.
//!
//! The handshake deliberately accepts any server certificate. Only the
//! validity window is inspected; trust is never evaluated, so self-signed and
//! expired leaves still produce a timestamp.

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const SECONDS_PER_DAY: i64 = 86_400;

/// Why a probe produced no timestamp. Callers only care that it failed; the
/// variants exist for diagnostics.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("failed to resolve {0}")]
    Resolve(String),
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid server name: {0}")]
    ServerName(String),
    #[error("peer sent no certificate")]
    NoCertificate,
    #[error("unparsable certificate: {0}")]
    Certificate(String),
    #[error("tls configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Source of certificate expiry timestamps.
#[async_trait]
pub trait ExpiryProbe: Send + Sync {
    async fn not_after(&self, host: &str, port: u16) -> Result<OffsetDateTime, ProbeFailure>;
}

/// Whole days from `now` until `not_after`, rounded toward negative infinity,
/// so a certificate that expired an hour (or a millisecond) ago reports -1.
pub fn days_until(not_after: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let d = not_after - now;
    // whole_seconds truncates toward zero; step down for a negative fraction.
    let secs = d.whole_seconds() - i64::from(d.subsec_nanoseconds() < 0);
    secs.div_euclid(SECONDS_PER_DAY)
}

/// Extract `notAfter` from a DER-encoded certificate.
pub fn leaf_not_after(der: &[u8]) -> Result<OffsetDateTime, ProbeFailure> {
    use x509_parser::prelude::*;
    let (_, x509) = X509Certificate::from_der(der).map_err(|e| ProbeFailure::Certificate(e.to_string()))?;
    Ok(x509.validity().not_after.to_datetime())
}

/// Probe backed by a real TCP connection and rustls handshake.
#[derive(Clone)]
pub struct TlsProbe {
    connector: TlsConnector,
    timeout: Duration,
}

impl TlsProbe {
    /// `timeout` bounds resolve + connect + handshake together.
    pub fn new(timeout: Duration) -> Result<Self, ProbeFailure> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = AcceptAnyCert {
            schemes: provider.signature_verification_algorithms.supported_schemes(),
        };
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        Ok(TlsProbe { connector: TlsConnector::from(Arc::new(config)), timeout })
    }

    pub async fn probe(&self, host: &str, port: u16) -> Result<OffsetDateTime, ProbeFailure> {
        let res = match timeout(self.timeout, self.handshake_not_after(host, port)).await {
            Ok(res) => res,
            Err(_) => Err(ProbeFailure::Timeout(self.timeout)),
        };
        if let Err(e) = &res {
            debug!(host, port, error = %e, "certificate probe failed");
        }
        res
    }

    async fn handshake_not_after(&self, host: &str, port: u16) -> Result<OffsetDateTime, ProbeFailure> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| ProbeFailure::Resolve(host.to_string()))?
            .collect();
        let stream = connect_any(host, &addrs).await?;
        let tls = self
            .connector
            .connect(server_name(host)?, stream)
            .await
            .map_err(ProbeFailure::Handshake)?;
        let conn = tls.get_ref().1;
        let leaf = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or(ProbeFailure::NoCertificate)?;
        leaf_not_after(leaf.as_ref())
    }
}

#[async_trait]
impl ExpiryProbe for TlsProbe {
    async fn not_after(&self, host: &str, port: u16) -> Result<OffsetDateTime, ProbeFailure> {
        self.probe(host, port).await
    }
}

/// One-shot probe with a fresh connector.
pub async fn probe_not_after(host: &str, port: u16, timeout: Duration) -> Result<OffsetDateTime, ProbeFailure> {
    TlsProbe::new(timeout)?.probe(host, port).await
}

/// Try each resolved address in order until one accepts; the last error wins.
async fn connect_any(host: &str, addrs: &[SocketAddr]) -> Result<TcpStream, ProbeFailure> {
    if addrs.is_empty() {
        return Err(ProbeFailure::Resolve(host.to_string()));
    }
    TcpStream::connect(addrs).await.map_err(ProbeFailure::Connect)
}

fn server_name(host: &str) -> Result<ServerName<'static>, ProbeFailure> {
    match host.parse::<IpAddr>() {
        Ok(ip) => Ok(ServerName::IpAddress(ip.into())),
        Err(_) => ServerName::try_from(host.to_owned()).map_err(|_| ProbeFailure::ServerName(host.to_string())),
    }
}

#[derive(Debug)]
struct AcceptAnyCert {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// TLS listener on 127.0.0.1 serving a self-signed certificate valid for
    /// `days` more days (plus an hour of slack so flooring lands on `days`).
    async fn tls_server(days: i64) -> (SocketAddr, JoinHandle<()>) {
        let now = OffsetDateTime::now_utc();
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.not_before = now - time::Duration::days(365);
        params.not_after = now + time::Duration::days(days) + time::Duration::hours(1);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], PrivatePkcs8KeyDer::from(key.serialize_der()).into())
            .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let _ = acceptor.accept(stream).await;
                });
            }
        });
        (addr, handle)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn days_are_floored() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(days_until(now + time::Duration::hours(30 * 24 + 23), now), 30);
        assert_eq!(days_until(now + time::Duration::hours(23), now), 0);
        assert_eq!(days_until(now - time::Duration::hours(1), now), -1);
        assert_eq!(days_until(now - time::Duration::hours(49), now), -3);
    }

    #[test]
    fn sub_second_expiry_is_a_past_day() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(days_until(now, now + time::Duration::milliseconds(300)), -1);
        assert_eq!(days_until(now + time::Duration::milliseconds(300), now), 0);
        assert_eq!(days_until(now, now), 0);
        assert_eq!(days_until(now - time::Duration::days(1) - time::Duration::milliseconds(1), now), -2);
    }

    #[test]
    fn garbage_der_is_a_failure() {
        assert!(matches!(leaf_not_after(b"not a certificate"), Err(ProbeFailure::Certificate(_))));
    }

    #[tokio::test]
    async fn reads_not_after_from_self_signed_leaf() {
        let (addr, server) = tls_server(30).await;
        let now = OffsetDateTime::now_utc();
        let not_after = probe_not_after("127.0.0.1", addr.port(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(days_until(not_after, now), 30);
        server.abort();
    }

    #[tokio::test]
    async fn expired_leaf_still_reports() {
        let (addr, server) = tls_server(-3).await;
        let probe = TlsProbe::new(Duration::from_secs(5)).unwrap();
        let not_after = probe.not_after("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(days_until(not_after, OffsetDateTime::now_utc()), -3);
        server.abort();
    }

    #[tokio::test]
    async fn closed_port_fails() {
        let port = closed_port().await;
        let res = probe_not_after("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(matches!(res, Err(ProbeFailure::Connect(_))));
    }

    #[tokio::test]
    async fn unreachable_first_address_falls_through() {
        let (live, server) = tls_server(7).await;
        let dead: SocketAddr = format!("127.0.0.1:{}", closed_port().await).parse().unwrap();
        let stream = connect_any("dual.test", &[dead, live]).await;
        assert!(stream.is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn empty_resolution_is_a_resolve_failure() {
        assert!(matches!(connect_any("nowhere.test", &[]).await, Err(ProbeFailure::Resolve(_))));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Accepted by the kernel backlog but never answers the ClientHello.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let res = probe_not_after("127.0.0.1", port, Duration::from_millis(200)).await;
        assert!(matches!(res, Err(ProbeFailure::Timeout(_))));
        drop(listener);
    }

    #[tokio::test]
    async fn plain_tcp_service_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            }
        });
        let res = probe_not_after("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(res.is_err());
        let _ = server.await;
    }
}
