use anyhow::{Context, Result};
use certwatch_core::ReportRow;
use expiry_aggregate::ScanResult;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;

pub const CSV_HEADER: [&str; 5] = ["ServiceName", "Contributor", "Email", "Endpoint", "Expiration(days)"];

pub fn write_csv<W: Write>(w: W, rows: &[ReportRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(CSV_HEADER)?;
    for r in rows {
        let days = r.days_remaining.to_string();
        wtr.write_record([
            r.service.as_str(),
            r.contributor.as_str(),
            r.email.as_deref().unwrap_or(""),
            r.endpoint.as_str(),
            days.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_csv(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    write_csv(file, rows)
}

/// `{"services": {name: {"endpoints": {url: days}, "contributors": {name: email}}}, "skipped": [..]}`
pub fn summary_json(result: &ScanResult) -> Value {
    let mut services = Map::new();
    for s in &result.services {
        let endpoints: Map<String, Value> = s.endpoints.iter().map(|e| (e.url.clone(), json!(e.days_remaining))).collect();
        let contributors: Map<String, Value> = s.contributors.iter().map(|c| (c.name.clone(), json!(c.email))).collect();
        services.insert(s.name.clone(), json!({ "endpoints": endpoints, "contributors": contributors }));
    }
    json!({ "services": services, "skipped": result.skipped })
}

pub fn save_summary_json(path: &Path, result: &ScanResult) -> Result<()> {
    let text = serde_json::to_string_pretty(&summary_json(result))?;
    std::fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}
