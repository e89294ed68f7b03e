//! Fetch-or-reuse layer: each remote dataset is cached on disk with its own
//! freshness window so a re-run inside the window never touches the network.

use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::{FetchError, HttpFetcher};

/// Narrow seam over "GET a JSON document" so the cache logic is testable
/// without a live endpoint.
#[async_trait]
pub trait RemoteJson: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;
}

#[async_trait]
impl RemoteJson for HttpFetcher {
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        HttpFetcher::fetch_json(self, url).await
    }
}

/// Age of `path` in hours, or `None` when the file is absent or empty
/// (an empty cache file is a truncated earlier run, not a dataset).
pub fn cache_age_hours(path: &Path) -> Option<f64> {
    let metadata = std::fs::metadata(path).ok()?;
    if metadata.len() == 0 {
        return None;
    }
    let modified = metadata.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    Some(age.as_secs_f64() / 3600.0)
}

/// Returns parsed JSON for `source`.
///
/// A local path is parsed directly. A remote URL goes through the cache:
/// when `cache_file` is younger than `max_age_hours` it is reused, otherwise
/// the document is fetched, persisted pretty-printed (non-ASCII preserved)
/// and returned. Writing `cache_file` is the only durable effect.
pub async fn fetch_or_load(
    remote: &dyn RemoteJson,
    source: &str,
    cache_file: &Path,
    max_age_hours: f64,
) -> Result<serde_json::Value> {
    if !source.starts_with("http") {
        return load_local(Path::new(source));
    }

    if let Some(age) = cache_age_hours(cache_file) {
        if age < max_age_hours {
            info!(cache = %cache_file.display(), age_hours = format!("{age:.2}"), "using cached dataset");
            return load_local(cache_file);
        }
        info!(cache = %cache_file.display(), age_hours = format!("{age:.2}"), "cache expired");
    }

    info!(url = source, "fetching dataset");
    let value = remote.fetch_json(source).await?;
    let pretty = serde_json::to_vec_pretty(&value).context("serializing cache payload")?;
    tokio::fs::write(cache_file, pretty)
        .await
        .with_context(|| format!("writing cache file {}", cache_file.display()))?;
    Ok(value)
}

fn load_local(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
