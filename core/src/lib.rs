//! Core types shared by the certwatch scanning engine: endpoint addressing,
//! the service descriptor schema, report rows and per-service errors.

pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod ratelimiter;
pub mod report;

pub use descriptor::{Contributor, EndpointGroup, NormalizedContributor, RawDescriptor, ServiceDescriptor};
pub use endpoint::{endpoint_key, Endpoint, EndpointError};
pub use error::ServiceError;
pub use report::{sort_rows, ReportRow, FAILED_PROBE_DAYS};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
