/// Days value recorded for an endpoint whose probe produced no timestamp.
pub const FAILED_PROBE_DAYS: i64 = -1;

/// One flat report line: a service endpoint paired with one contributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub service: String,
    pub contributor: String,
    pub email: Option<String>,
    pub endpoint: String,
    pub days_remaining: i64,
}

/// Soonest expiry first. Stable, so equal values keep their insertion order.
pub fn sort_rows(rows: &mut [ReportRow]) {
    rows.sort_by_key(|r| r.days_remaining);
}
