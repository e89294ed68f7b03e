//! Marketplace harvester: pages the community search API per category,
//! merges apps under a weight-priority policy and mirrors every cover image
//! into the normalized icon cache.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use qag_core::category::{merge_app, resolve_label, weight_for};
use qag_core::slug::icon_file_name;
use qag_core::{AppManifest, CategoryDescriptor};
use qag_fetch::cache::cache_age_hours;
use qag_fetch::{guess_extension, FetchError, FetchedBytes, HttpFetcher};
use qag_images::{normalize_file, pack_icons, NormalizeOptions};

use crate::taxonomy::{self, RawCategory};

pub const SEARCH_PAGE_LIMIT: usize = 100;
pub const CATEGORY_WORKERS: usize = 3;
pub const IMAGE_WORKERS: usize = 10;
pub const ICON_FRESHNESS_HOURS: f64 = 24.0;

/// One row of the search API's `data` array. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchEntry {
    pub name: String,
    pub packagename: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub app_banner: Option<String>,
}

/// Narrow seam over the marketplace's three endpoints so the harvester runs
/// against an in-memory fake in tests.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn client_script(&self) -> Result<String, FetchError>;
    async fn search_page(
        &self,
        tag: &str,
        page: usize,
        limit: usize,
    ) -> Result<Vec<SearchEntry>, FetchError>;
    async fn image(&self, url: &str) -> Result<FetchedBytes, FetchError>;
}

pub struct HttpMarketplace {
    fetcher: Arc<HttpFetcher>,
    api_base: String,
    script_url: String,
}

impl HttpMarketplace {
    pub fn new(fetcher: Arc<HttpFetcher>, api_base: &str, script_url: &str) -> Self {
        Self {
            fetcher,
            api_base: api_base.trim_end_matches('/').to_string(),
            script_url: script_url.to_string(),
        }
    }
}

#[async_trait]
impl MarketplaceApi for HttpMarketplace {
    async fn client_script(&self) -> Result<String, FetchError> {
        self.fetcher.fetch_text(&self.script_url).await
    }

    async fn search_page(
        &self,
        tag: &str,
        page: usize,
        limit: usize,
    ) -> Result<Vec<SearchEntry>, FetchError> {
        let url = format!(
            "{}/search-apps?search=&page={}&order=rating&direction=desc&tag={}&limit={}&device_filter=quest&license_filter=all",
            self.api_base, page, tag, limit
        );
        let value = self.fetcher.fetch_json(&url).await?;
        let data = value.get("data").cloned().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data).map_err(|source| FetchError::InvalidJson { url, source })
    }

    async fn image(&self, url: &str) -> Result<FetchedBytes, FetchError> {
        self.fetcher.fetch_bytes(url).await
    }
}

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub icon_dir: PathBuf,
    /// Operator-supplied `{package_id}.jpg` files, preferred over any fetch.
    pub override_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub iconpack_path: PathBuf,
    pub page_limit: usize,
    pub category_workers: usize,
    pub image_workers: usize,
    pub icon_freshness_hours: f64,
    pub normalize: NormalizeOptions,
}

impl HarvesterConfig {
    pub fn new(
        icon_dir: PathBuf,
        override_dir: PathBuf,
        manifest_path: PathBuf,
        iconpack_path: PathBuf,
    ) -> Self {
        Self {
            icon_dir,
            override_dir,
            manifest_path,
            iconpack_path,
            page_limit: SEARCH_PAGE_LIMIT,
            category_workers: CATEGORY_WORKERS,
            image_workers: IMAGE_WORKERS,
            icon_freshness_hours: ICON_FRESHNESS_HOURS,
            normalize: NormalizeOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryHarvest {
    pub descriptor: CategoryDescriptor,
    pub entries: Vec<SearchEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub categories: usize,
    pub apps: usize,
    pub icons_written: usize,
    pub icons_skipped: usize,
}

/// Runs the full harvest: taxonomy, paging, priority merge, icons, manifest
/// and icon pack. A non-success image fetch aborts the whole run; decode
/// failures and absent image URLs only skip that app's icon.
pub async fn harvest(
    api: Arc<dyn MarketplaceApi>,
    config: &HarvesterConfig,
) -> Result<HarvestSummary> {
    let script = api.client_script().await.context("fetching client script")?;
    let raw_categories = taxonomy::extract_categories(&script)?;
    info!(categories = raw_categories.len(), "category taxonomy extracted");

    let mut harvests = page_all_categories(api.clone(), &raw_categories, config).await?;
    // Completion order is whatever the network gave us; merge priority is
    // defined by weight, so re-sort before the single-threaded reduction.
    harvests.sort_by(|a, b| b.descriptor.weight.cmp(&a.descriptor.weight));

    let mut manifest = AppManifest::new();
    let mut jobs: Vec<IconJob> = Vec::new();
    let mut claimed_files = BTreeSet::new();
    for harvest in &harvests {
        let label = resolve_label(&harvest.descriptor.name);
        info!(
            category = %harvest.descriptor.name,
            weight = harvest.descriptor.weight,
            apps = harvest.entries.len(),
            label,
            "merging category"
        );
        for entry in &harvest.entries {
            merge_app(&mut manifest, &entry.packagename, &entry.name, label);
            let file_name = icon_file_name(&entry.packagename);
            // The same app surfaces in several categories; the first sighting
            // in weight order owns the icon file.
            if claimed_files.insert(file_name.clone()) {
                jobs.push(IconJob {
                    package_id: entry.packagename.clone(),
                    display_name: entry.name.clone(),
                    file_name,
                    image_url: entry.image_url.clone().filter(|url| !url.is_empty()),
                    banner_url: entry.app_banner.clone().filter(|url| !url.is_empty()),
                });
            }
        }
    }

    let (icons_written, icons_skipped) = fetch_all_icons(api, config, jobs).await?;

    let pretty = serde_json::to_vec_pretty(&manifest).context("serializing app manifest")?;
    tokio::fs::write(&config.manifest_path, pretty)
        .await
        .with_context(|| format!("writing {}", config.manifest_path.display()))?;

    let packed = pack_icons(&config.icon_dir, &config.iconpack_path)?;
    info!(
        manifest = %config.manifest_path.display(),
        iconpack = %config.iconpack_path.display(),
        packed,
        "harvest artifacts written"
    );

    Ok(HarvestSummary {
        categories: harvests.len(),
        apps: manifest.len(),
        icons_written,
        icons_skipped,
    })
}

async fn page_all_categories(
    api: Arc<dyn MarketplaceApi>,
    raw_categories: &[RawCategory],
    config: &HarvesterConfig,
) -> Result<Vec<CategoryHarvest>> {
    let semaphore = Arc::new(Semaphore::new(config.category_workers.max(1)));
    let mut handles = Vec::new();
    for raw in raw_categories.iter().cloned() {
        let api = api.clone();
        let semaphore = semaphore.clone();
        let limit = config.page_limit;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            page_category(api.as_ref(), raw, limit).await
        }));
    }

    let mut harvests = Vec::with_capacity(handles.len());
    for handle in handles {
        harvests.push(handle.await.context("category worker panicked")??);
    }
    Ok(harvests)
}

/// Pages one category until the API returns an empty page. Pages within a
/// category are strictly sequential.
async fn page_category(
    api: &dyn MarketplaceApi,
    raw: RawCategory,
    limit: usize,
) -> Result<CategoryHarvest> {
    let tag = raw
        .tag
        .clone()
        .unwrap_or_else(|| raw.name.to_lowercase().replace(' ', ""));

    let mut entries = Vec::new();
    let mut page = 0usize;
    loop {
        let batch = api
            .search_page(&tag, page, limit)
            .await
            .with_context(|| format!("searching category '{}' page {page}", raw.name))?;
        if batch.is_empty() {
            break;
        }
        info!(category = %raw.name, page, results = batch.len(), "search page");
        entries.extend(batch);
        page += 1;
    }

    let descriptor = CategoryDescriptor {
        weight: weight_for(&raw.name, entries.len()),
        app_count: entries.len(),
        name: raw.name,
        tag: Some(tag),
    };
    Ok(CategoryHarvest { descriptor, entries })
}

#[derive(Debug, Clone)]
struct IconJob {
    package_id: String,
    display_name: String,
    file_name: String,
    image_url: Option<String>,
    banner_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IconOutcome {
    Written,
    CacheFresh,
    Skipped,
}

async fn fetch_all_icons(
    api: Arc<dyn MarketplaceApi>,
    config: &HarvesterConfig,
    jobs: Vec<IconJob>,
) -> Result<(usize, usize)> {
    let semaphore = Arc::new(Semaphore::new(config.image_workers.max(1)));
    let config = Arc::new(config.clone());

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let api = api.clone();
        let semaphore = semaphore.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            fetch_icon(api.as_ref(), &config, &job).await
        }));
    }

    let mut written = 0usize;
    let mut skipped = 0usize;
    for handle in handles {
        match handle.await.context("image worker panicked")?? {
            IconOutcome::Written => written += 1,
            IconOutcome::CacheFresh => {}
            IconOutcome::Skipped => skipped += 1,
        }
    }
    Ok((written, skipped))
}

async fn fetch_icon(
    api: &dyn MarketplaceApi,
    config: &HarvesterConfig,
    job: &IconJob,
) -> Result<IconOutcome> {
    let dest = config.icon_dir.join(&job.file_name);
    if let Some(age) = cache_age_hours(&dest) {
        if age < config.icon_freshness_hours {
            return Ok(IconOutcome::CacheFresh);
        }
    }

    let override_path = config.override_dir.join(format!("{}.jpg", job.package_id));
    if override_path.is_file() {
        info!(package = %job.package_id, "using manual override image");
        return match normalize_file(&override_path, &dest, &config.normalize) {
            Ok(()) => Ok(IconOutcome::Written),
            Err(err) => {
                warn!(package = %job.package_id, error = %err, "override image unusable, skipping");
                Ok(IconOutcome::Skipped)
            }
        };
    }

    let Some(url) = job.image_url.as_deref().or(job.banner_url.as_deref()) else {
        warn!(package = %job.package_id, app = %job.display_name, "no image for app");
        return Ok(IconOutcome::Skipped);
    };

    // A broken image endpoint stops the batch rather than silently
    // producing a partial icon pack.
    let fetched = api
        .image(url)
        .await
        .with_context(|| format!("fetching image {url}"))?;

    let extension = match guess_extension(fetched.content_type.as_deref(), &fetched.url) {
        Some(extension) => extension,
        None => {
            warn!(url, content_type = ?fetched.content_type, "unrecognized image type, assuming jpg");
            ".jpg".to_string()
        }
    };

    // Land the raw payload under its guessed extension, then normalize into
    // the canonical .jpg (in place when the source was already a jpg).
    let stem = job.file_name.trim_end_matches(".jpg");
    let raw_path = config.icon_dir.join(format!("{stem}{extension}"));
    tokio::fs::write(&raw_path, &fetched.body)
        .await
        .with_context(|| format!("writing {}", raw_path.display()))?;

    let result = normalize_file(&raw_path, &dest, &config.normalize);
    if raw_path != dest {
        let _ = tokio::fs::remove_file(&raw_path).await;
    }
    match result {
        Ok(()) => Ok(IconOutcome::Written),
        Err(err) => {
            warn!(package = %job.package_id, url, error = %err, "image conversion failed, skipping");
            let _ = tokio::fs::remove_file(&dest).await;
            Ok(IconOutcome::Skipped)
        }
    }
}
