//! Service descriptor sources: a directory of `<service>.json` files, and an
//! optional registry used to refresh that directory.

use async_trait::async_trait;
use certwatch_core::{RawDescriptor, ServiceError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[cfg(feature = "registry")]
pub mod registry;

#[derive(Debug, Error)]
pub enum SourceError {
    #[cfg(feature = "registry")]
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned status {0}")]
    Status(u16),
    #[error("invalid descriptor for {service}: {source}")]
    Decode {
        service: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Anything that can list the raw descriptors of an organization's services.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn fetch(&self, org_id: &str) -> Result<Vec<RawDescriptor>, SourceError>;
}

/// Load every `*.json` file in `dir`, ordered by file name. The service name
/// is the file stem. A file that cannot be read becomes a per-service error;
/// a missing directory is created and yields nothing.
pub fn load_dir(dir: &Path) -> std::io::Result<Vec<Result<RawDescriptor, ServiceError>>> {
    fs::create_dir_all(dir)?;
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|path| {
            let name = service_name(&path);
            match fs::read_to_string(&path) {
                Ok(body) => Ok(RawDescriptor { name, body }),
                Err(source) => Err(ServiceError::Unreadable { service: name, source }),
            }
        })
        .collect())
}

fn service_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

/// A service id is used verbatim as a file name.
fn is_safe_service_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

/// Fetch the organization's descriptors and write each one to
/// `<dir>/<service>.json` as pretty JSON. Returns the written paths.
pub async fn refresh_dir(source: &dyn DescriptorSource, org_id: &str, dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let descriptors = source.fetch(org_id).await?;
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(descriptors.len());
    for (idx, d) in descriptors.iter().enumerate() {
        if !is_safe_service_id(&d.name) {
            warn!("skipping service with unusable id {:?}", d.name);
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&d.body)
            .map_err(|source| SourceError::Decode { service: d.name.clone(), source })?;
        let pretty = serde_json::to_string_pretty(&value)
            .map_err(|source| SourceError::Decode { service: d.name.clone(), source })?;
        let path = dir.join(format!("{}.json", d.name));
        info!("{:03} - Saving {}...", idx + 1, path.display());
        fs::write(&path, pretty)?;
        written.push(path);
    }
    Ok(written)
}
