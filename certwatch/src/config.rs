use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "certwatch.yaml";

/// One configuration layer. Every field is optional so CLI flags and the
/// YAML file can be stacked with `or`.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub src: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
    pub update: Option<bool>,
    pub org: Option<String>,
    pub network: Option<String>,
    pub registry_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub port_range: Option<u16>,
    pub check_443: Option<bool>,
    pub concurrency: Option<usize>,
    pub qps: Option<u32>,
}

impl Config {
    /// Field-wise: values set in `self` win over `lower`.
    pub fn or(self, lower: Config) -> Config {
        Config {
            src: self.src.or(lower.src),
            output: self.output.or(lower.output),
            summary_json: self.summary_json.or(lower.summary_json),
            update: self.update.or(lower.update),
            org: self.org.or(lower.org),
            network: self.network.or(lower.network),
            registry_url: self.registry_url.or(lower.registry_url),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            port_range: self.port_range.or(lower.port_range),
            check_443: self.check_443.or(lower.check_443),
            concurrency: self.concurrency.or(lower.concurrency),
            qps: self.qps.or(lower.qps),
        }
    }
}

/// Fully resolved run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub src: PathBuf,
    pub output: PathBuf,
    pub summary_json: Option<PathBuf>,
    pub update: bool,
    pub org: String,
    pub network: Option<String>,
    pub registry_url: Option<String>,
    pub timeout: Duration,
    pub port_range: u16,
    pub check_443: bool,
    pub concurrency: usize,
    pub qps: u32,
}

impl From<Config> for Settings {
    fn from(c: Config) -> Self {
        Settings {
            src: c.src.unwrap_or_else(|| PathBuf::from("./")),
            output: c.output.unwrap_or_else(|| PathBuf::from("services_report.csv")),
            summary_json: c.summary_json,
            update: c.update.unwrap_or(false),
            org: c.org.unwrap_or_else(|| "snet".to_string()),
            network: c.network,
            registry_url: c.registry_url,
            timeout: Duration::from_secs(c.timeout_secs.unwrap_or(10)),
            port_range: c.port_range.unwrap_or(1).max(1),
            check_443: c.check_443.unwrap_or(false),
            concurrency: c.concurrency.unwrap_or(32).max(1),
            qps: c.qps.unwrap_or(0),
        }
    }
}

/// Load the YAML config. An explicit path must exist; without one,
/// `./certwatch.yaml` is used when present.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("cannot read config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_reference_behavior() {
        let s = Settings::from(Config::default());
        assert_eq!(s.timeout, Duration::from_secs(10));
        assert_eq!(s.port_range, 1);
        assert!(!s.check_443);
        assert!(!s.update);
        assert_eq!(s.output, PathBuf::from("services_report.csv"));
        assert_eq!(s.org, "snet");
    }

    #[test]
    fn zero_counts_are_raised_to_one() {
        let s = Settings::from(Config { port_range: Some(0), concurrency: Some(0), ..Config::default() });
        assert_eq!(s.port_range, 1);
        assert_eq!(s.concurrency, 1);
    }

    #[test]
    fn upper_layer_wins() {
        let cli = Config { timeout_secs: Some(3), ..Config::default() };
        let file = Config { timeout_secs: Some(20), port_range: Some(4), ..Config::default() };
        let s = Settings::from(cli.or(file));
        assert_eq!(s.timeout, Duration::from_secs(3));
        assert_eq!(s.port_range, 4);
    }

    #[test]
    fn loads_yaml_file() {
        let f = NamedTempFile::new().unwrap();
        fs::write(f.path(), "src: ./metadata\ncheck_443: true\nconcurrency: 8\nnetwork: sepolia\n").unwrap();
        let cfg = load_config(Some(f.path())).unwrap().unwrap();
        assert_eq!(cfg.src, Some(PathBuf::from("./metadata")));
        assert_eq!(cfg.check_443, Some(true));
        assert_eq!(cfg.concurrency, Some(8));
        assert_eq!(cfg.network.as_deref(), Some("sepolia"));
    }

    #[test]
    fn rejects_unknown_keys_and_missing_file() {
        let f = NamedTempFile::new().unwrap();
        fs::write(f.path(), "timeout_ms: 500\n").unwrap();
        assert!(load_config(Some(f.path())).is_err());
        assert!(load_config(Some(Path::new("/nonexistent/certwatch.yaml"))).is_err());
    }
}
