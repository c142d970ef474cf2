//! Service descriptor schema.
//!
//! Descriptors are JSON documents carrying, among many other keys that are
//! ignored here, the service's endpoint groups and its contributors:
//!
//! ```json
//! {"groups": [{"endpoints": ["https://host:7000"]}],
//!  "contributors": [{"name": "Ann", "email_id": "ann@x.com"}]}
//! ```

use serde::Deserialize;

pub const SENTINEL_NAME: &str = "NoName";
pub const SENTINEL_EMAIL: &str = "NoEmail";

/// A descriptor as handed over by a loader: the service name and its
/// undecoded JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EndpointGroup {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "email_id")]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptorDoc {
    groups: Vec<EndpointGroup>,
    #[serde(default)]
    contributors: Option<Vec<Contributor>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub groups: Vec<EndpointGroup>,
    pub contributors: Vec<Contributor>,
}

/// A contributor that made it into the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContributor {
    pub name: String,
    pub email: Option<String>,
}

impl ServiceDescriptor {
    pub fn from_json(name: &str, body: &str) -> Result<Self, serde_json::Error> {
        let doc: DescriptorDoc = serde_json::from_str(body)?;
        Ok(ServiceDescriptor {
            name: name.to_string(),
            groups: doc.groups,
            contributors: doc.contributors.unwrap_or_default(),
        })
    }

    /// Raw endpoint URLs in group order, first occurrence only.
    pub fn unique_endpoints(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.groups
            .iter()
            .flat_map(|g| g.endpoints.iter())
            .map(String::as_str)
            .filter(|url| seen.insert(*url))
            .collect()
    }

    /// Contributors with a name, first entry per name wins. Never empty: a
    /// service without named contributors gets the `NoName`/`NoEmail` pair.
    pub fn normalized_contributors(&self) -> Vec<NormalizedContributor> {
        let mut out: Vec<NormalizedContributor> = Vec::new();
        for c in &self.contributors {
            let name = match c.name.as_deref() {
                Some(n) if !n.is_empty() => n,
                _ => continue,
            };
            if out.iter().any(|n| n.name == name) {
                continue;
            }
            out.push(NormalizedContributor { name: name.to_string(), email: c.email.clone() });
        }
        if out.is_empty() {
            out.push(NormalizedContributor {
                name: SENTINEL_NAME.to_string(),
                email: Some(SENTINEL_EMAIL.to_string()),
            });
        }
        out
    }
}
