//! Certificate expiry scan across a declared port, the ports following it,
//! and optionally the well-known TLS port.

use cert_probe::{days_until, ExpiryProbe};
use certwatch_core::endpoint_key;
use certwatch_core::ratelimiter::RateLimiter;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub const WELL_KNOWN_TLS_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRangeOptions {
    /// Also probe port 443 on the same host.
    pub check_443: bool,
    /// Number of consecutive ports probed starting at the declared port.
    pub range_size: u16,
}

impl Default for PortRangeOptions {
    fn default() -> Self {
        PortRangeOptions { check_443: false, range_size: 1 }
    }
}

/// Ports probed for one endpoint, 443 first when enabled. Ports past 65535
/// are dropped and a port is never listed twice.
pub fn planned_ports(declared_port: u16, opts: &PortRangeOptions) -> Vec<u16> {
    let mut ports = Vec::with_capacity(opts.range_size as usize + 1);
    if opts.check_443 {
        ports.push(WELL_KNOWN_TLS_PORT);
    }
    for offset in 0..opts.range_size {
        let Some(port) = declared_port.checked_add(offset) else { break };
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

/// Fans one endpoint out into independent probes and folds the successes into
/// a `host:port -> days remaining` map. Failed ports have no key.
#[derive(Clone)]
pub struct PortRangeScanner {
    probe: Arc<dyn ExpiryProbe>,
    opts: PortRangeOptions,
    global_limit: Option<Arc<Semaphore>>,
    pacing: Option<Arc<RateLimiter>>,
}

impl PortRangeScanner {
    pub fn new(probe: Arc<dyn ExpiryProbe>, opts: PortRangeOptions) -> Self {
        PortRangeScanner { probe, opts, global_limit: None, pacing: None }
    }

    /// Cap on probes in flight, shared with every scanner holding the same semaphore.
    pub fn with_global_limit(mut self, limit: Arc<Semaphore>) -> Self {
        self.global_limit = Some(limit);
        self
    }

    pub fn with_pacing(mut self, pacing: Arc<RateLimiter>) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn options(&self) -> &PortRangeOptions {
        &self.opts
    }

    pub async fn scan(&self, host: &str, declared_port: u16) -> BTreeMap<String, i64> {
        // One reference time for every port of this endpoint.
        let now = OffsetDateTime::now_utc();
        let ports = planned_ports(declared_port, &self.opts);
        let (tx, mut rx) = mpsc::channel::<(u16, i64)>(ports.len().max(1));

        for port in ports {
            let tx = tx.clone();
            let probe = self.probe.clone();
            let host = host.to_string();
            let global = self.global_limit.clone();
            let pacing = self.pacing.clone();
            tokio::spawn(async move {
                let _global_permit = match global {
                    Some(g) => g.acquire_owned().await.ok(),
                    None => None,
                };
                if let Some(p) = pacing {
                    p.acquire().await;
                }
                let key = endpoint_key(&host, port);
                match probe.not_after(&host, port).await {
                    Ok(not_after) => {
                        let days = days_until(not_after, now);
                        info!("{} [{} days]", key, days);
                        let _ = tx.send((port, days)).await;
                    }
                    Err(_) => warn!("{} [Fail]", key),
                }
            });
        }
        drop(tx);

        let mut found = BTreeMap::new();
        while let Some((port, days)) = rx.recv().await {
            found.insert(endpoint_key(host, port), days);
        }
        found
    }
}
