//! Endpoint URL handling (`scheme://host:port`).

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed endpoint url {url:?}: {reason}")]
pub struct EndpointError {
    pub url: String,
    pub reason: &'static str,
}

/// A probe target parsed from an endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Mapping key used by scan results: `host:port`.
pub fn endpoint_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

impl Endpoint {
    /// Parse `scheme://host:port`. The scheme is optional and always dropped;
    /// host and port are split on the last colon.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let err = |reason| EndpointError { url: url.to_string(), reason };
        let trimmed = url.trim();
        let rest = match trimmed.split_once("://") {
            Some((_, rest)) => rest,
            None => trimmed,
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| err("missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(err("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| err("port is not a number in 1-65535"))?;
        if port == 0 {
            return Err(err("port is not a number in 1-65535"));
        }
        Ok(Endpoint { host: host.to_string(), port })
    }

    pub fn key(&self) -> String {
        endpoint_key(&self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_https_url() {
        let e = Endpoint::parse("https://example.test:7000").unwrap();
        assert_eq!(e, Endpoint { host: "example.test".into(), port: 7000 });
        assert_eq!(e.key(), "example.test:7000");
    }

    #[test]
    fn parse_without_scheme_and_other_schemes() {
        assert_eq!(Endpoint::parse("svc.local:8443").unwrap().port, 8443);
        assert_eq!(Endpoint::parse("http://svc.local:80").unwrap().host, "svc.local");
    }

    #[test]
    fn parse_ipv6_literal() {
        let e = Endpoint::parse("https://[::1]:9000").unwrap();
        assert_eq!(e.host, "::1");
        assert_eq!(e.port, 9000);
    }

    #[test]
    fn reject_malformed() {
        assert_eq!(Endpoint::parse("https://example.test").unwrap_err().reason, "missing port");
        assert!(Endpoint::parse("https://example.test:abc").is_err());
        assert!(Endpoint::parse("https://example.test:70000").is_err());
        assert!(Endpoint::parse("https://example.test:0").is_err());
        assert!(Endpoint::parse("https://:443").is_err());
    }
}
