use crate::endpoint::EndpointError;
use thiserror::Error;

/// Failure that causes one service to be left out of the report.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service}: {source}")]
    MalformedEndpoint {
        service: String,
        #[source]
        source: EndpointError,
    },
    #[error("{service}: invalid descriptor: {source}")]
    InvalidDescriptor {
        service: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{service}: cannot read descriptor: {source}")]
    Unreadable {
        service: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{service}: scan task failed: {reason}")]
    Aborted { service: String, reason: String },
}

impl ServiceError {
    pub fn service(&self) -> &str {
        match self {
            ServiceError::MalformedEndpoint { service, .. }
            | ServiceError::InvalidDescriptor { service, .. }
            | ServiceError::Unreadable { service, .. }
            | ServiceError::Aborted { service, .. } => service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_service_and_url() {
        let err = ServiceError::MalformedEndpoint {
            service: "svc".into(),
            source: EndpointError { url: "https://host".into(), reason: "missing port" },
        };
        assert_eq!(err.service(), "svc");
        assert_eq!(err.to_string(), "svc: malformed endpoint url \"https://host\": missing port");
    }
}
