//! Folds per-endpoint expiry scans into per-service reports and one flat,
//! soonest-first row list.
//!
//! Each service goes through the same steps: decode the descriptor, parse and
//! deduplicate its endpoint URLs, scan every unique endpoint once, normalize
//! the contributors, and expand endpoints x contributors into rows. A service
//! that fails any step is logged and skipped; the rest of the run continues.

use certwatch_core::{
    sort_rows, Endpoint, NormalizedContributor, RawDescriptor, ReportRow, ServiceDescriptor, ServiceError,
    FAILED_PROBE_DAYS,
};
use port_range::PortRangeScanner;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointExpiry {
    pub url: String,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    pub name: String,
    /// Unique endpoints in first-seen order.
    pub endpoints: Vec<EndpointExpiry>,
    pub contributors: Vec<NormalizedContributor>,
}

impl ServiceReport {
    /// Every endpoint paired with every contributor, endpoint-major.
    pub fn rows(&self) -> Vec<ReportRow> {
        let mut rows = Vec::with_capacity(self.endpoints.len() * self.contributors.len());
        for e in &self.endpoints {
            for c in &self.contributors {
                rows.push(ReportRow {
                    service: self.name.clone(),
                    contributor: c.name.clone(),
                    email: c.email.clone(),
                    endpoint: e.url.clone(),
                    days_remaining: e.days_remaining,
                });
            }
        }
        rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedService {
    pub name: String,
    pub reason: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Successfully processed services, in input order.
    pub services: Vec<ServiceReport>,
    /// All rows, sorted ascending by days remaining.
    pub rows: Vec<ReportRow>,
    pub skipped: Vec<SkippedService>,
}

/// A decoded service whose endpoints all parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    pub name: String,
    pub endpoints: Vec<(String, Endpoint)>,
    pub contributors: Vec<NormalizedContributor>,
}

/// Decode a raw descriptor and validate its endpoints before any probe runs.
pub fn plan_service(raw: &RawDescriptor) -> Result<ServicePlan, ServiceError> {
    let descriptor = ServiceDescriptor::from_json(&raw.name, &raw.body)
        .map_err(|source| ServiceError::InvalidDescriptor { service: raw.name.clone(), source })?;
    let mut endpoints = Vec::new();
    for url in descriptor.unique_endpoints() {
        let endpoint = Endpoint::parse(url)
            .map_err(|source| ServiceError::MalformedEndpoint { service: raw.name.clone(), source })?;
        endpoints.push((url.to_string(), endpoint));
    }
    Ok(ServicePlan { name: descriptor.name.clone(), endpoints, contributors: descriptor.normalized_contributors() })
}

pub struct EndpointAggregator {
    scanner: PortRangeScanner,
}

impl EndpointAggregator {
    pub fn new(scanner: PortRangeScanner) -> Self {
        EndpointAggregator { scanner }
    }

    /// Scan every service. Services run concurrently; the scanner's global
    /// limit is what bounds the number of open connections.
    pub async fn aggregate<I>(&self, descriptors: I) -> ScanResult
    where
        I: IntoIterator<Item = Result<RawDescriptor, ServiceError>>,
    {
        let mut result = ScanResult::default();
        let mut pending: Vec<(String, JoinHandle<ServiceReport>)> = Vec::new();

        for item in descriptors {
            match item.and_then(|raw| plan_service(&raw)) {
                Ok(plan) => {
                    let scanner = self.scanner.clone();
                    let name = plan.name.clone();
                    pending.push((name, tokio::spawn(scan_service(scanner, plan))));
                }
                Err(e) => skip(&mut result, e),
            }
        }

        for (name, handle) in pending {
            match handle.await {
                Ok(report) => result.services.push(report),
                Err(e) => skip(&mut result, ServiceError::Aborted { service: name, reason: e.to_string() }),
            }
        }

        result.rows = result.services.iter().flat_map(ServiceReport::rows).collect();
        sort_rows(&mut result.rows);
        result
    }
}

fn skip(result: &mut ScanResult, err: ServiceError) {
    error!("[ERROR] {}", err);
    result.skipped.push(SkippedService { name: err.service().to_string(), reason: err.to_string() });
}

async fn scan_service(scanner: PortRangeScanner, plan: ServicePlan) -> ServiceReport {
    let mut handles = Vec::with_capacity(plan.endpoints.len());
    for (url, endpoint) in plan.endpoints {
        let scanner = scanner.clone();
        let handle = tokio::spawn(async move {
            let found = scanner.scan(&endpoint.host, endpoint.port).await;
            found.get(&endpoint.key()).copied().unwrap_or(FAILED_PROBE_DAYS)
        });
        handles.push((url, handle));
    }

    let mut endpoints = Vec::with_capacity(handles.len());
    for (url, handle) in handles {
        let days_remaining = handle.await.unwrap_or(FAILED_PROBE_DAYS);
        endpoints.push(EndpointExpiry { url, days_remaining });
    }

    let failed = endpoints.iter().filter(|e| e.days_remaining == FAILED_PROBE_DAYS).count();
    info!(
        "{}: {} endpoint(s), {} contributor(s), {} without expiry",
        plan.name,
        endpoints.len(),
        plan.contributors.len(),
        failed
    );
    ServiceReport { name: plan.name, endpoints, contributors: plan.contributors }
}
