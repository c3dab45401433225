//! Application directory: which domains belong to which application.
//!
//! The directory is loaded once from a JSON object of the form
//! `{ "<app name>": ["<domain>", ...] }` and is read-only afterwards.
//! Every domain is stored in normalized form (see [`normalize_name`]) so that
//! lookups compare like with like regardless of how the file spelled it.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::DetectError;
use crate::metrics;

/// Normalize a DNS name for comparison.
///
/// Names are compared in lower-case, fully-qualified form: surrounding whitespace is
/// trimmed, ASCII letters are lower-cased and exactly one trailing dot is kept.
/// `"Foo.Example.COM"`, `"foo.example.com."` and `"foo.example.com.."` all normalize
/// to `"foo.example.com."`.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.');
    let mut normalized = trimmed.to_ascii_lowercase();
    normalized.push('.');
    normalized
}

/// Immutable mapping from application name to its known domains.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>")]
pub struct AppDirectory {
    /// app name -> normalized domains, in file order without duplicates
    apps: BTreeMap<String, Vec<String>>,

    /// normalized domain -> app names (derived index, sorted)
    by_domain: HashMap<String, Vec<String>>,
}

impl From<BTreeMap<String, Vec<String>>> for AppDirectory {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut apps = BTreeMap::new();
        let mut by_domain: HashMap<String, Vec<String>> = HashMap::new();

        for (app, domains) in raw {
            let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
            for domain in domains {
                if domain.trim().trim_end_matches('.').is_empty() {
                    warn!(app = %app, "ignoring empty domain in application directory");
                    continue;
                }
                let domain = normalize_name(&domain);
                if !normalized.contains(&domain) {
                    normalized.push(domain);
                }
            }

            // BTreeMap iteration keeps each index entry sorted by app name.
            for domain in &normalized {
                by_domain.entry(domain.clone()).or_default().push(app.clone());
            }
            apps.insert(app, normalized);
        }

        Self { apps, by_domain }
    }
}

impl FromIterator<(String, Vec<String>)> for AppDirectory {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<BTreeMap<_, _>>())
    }
}

impl AppDirectory {
    /// Parse a directory from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load the directory from a JSON file.
    ///
    /// Any read or parse failure is returned; callers treat it as fatal.
    pub fn load(path: &Path) -> Result<Self, DetectError> {
        debug!(path = %path.display(), "reading application directory");

        let data = std::fs::read_to_string(path).map_err(|e| DetectError::Directory {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let directory = Self::from_json(&data).map_err(|e| DetectError::Directory {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        info!(
            path = %path.display(),
            apps = directory.len(),
            domains = directory.domain_count(),
            "loaded application directory"
        );
        metrics::record_directory(directory.len(), directory.domain_count());

        Ok(directory)
    }

    /// Applications listing `name` among their domains, sorted by app name.
    ///
    /// `name` must already be normalized.
    pub fn apps_for(&self, name: &str) -> &[String] {
        self.by_domain.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Normalized domains configured for an application.
    pub fn domains(&self, app: &str) -> Option<&[String]> {
        self.apps.get(app).map(Vec::as_slice)
    }

    /// Check if an application is configured.
    pub fn contains_app(&self, app: &str) -> bool {
        self.apps.contains_key(app)
    }

    /// Iterate application names in sorted order.
    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    /// Number of applications.
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// True when no application is configured.
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Number of distinct domains across all applications.
    pub fn domain_count(&self) -> usize {
        self.by_domain.len()
    }
}
