//! Pipeline orchestrator: sequences the crawler, reconciler, harvester,
//! release download, diff and publish stages over a shared temp workspace.
//!
//! Stages communicate only through files in the workspace, never through
//! in-memory state, so any subset can be re-run against what is already on
//! disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use qag_core::AppManifest;
use qag_fetch::release::ReleaseClient;
use qag_fetch::HttpFetcher;
use qag_images::unpack_archive;
use qag_sources::genredb::{self, GenreFeeds};
use qag_sources::marketplace::{self, HarvesterConfig, HttpMarketplace};

pub mod tool;

/// Release asset names. The `o_` prefix sorts the marketplace files after
/// the store files so the launcher prefers store names and banners.
pub const STORE_LIST_RAW: &str = "appnames_quest_en_US.json";
pub const STORE_LIST: &str = "appnames_quest.json";
pub const STORE_LIST_GENREFIED: &str = "appnames_quest_genrefied.json";
pub const STORE_ICONPACK: &str = "iconpack_quest.zip";
pub const MARKETPLACE_LIST: &str = "appnames_o_sidequest.json";
pub const MARKETPLACE_ICONPACK: &str = "iconpack_o_sidequest.zip";

/// Workspace subdirectories.
const STORE_DIR: &str = "qalag";
const RELEASE_DIR: &str = "latest_release";
const MARKETPLACE_ICON_DIR: &str = "sidequest";
const STORE_ICON_DIR: &str = "quest";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Scratch root shared by all stages.
    pub temp_root: PathBuf,
    pub crawler_path: PathBuf,
    pub diff_tool_path: PathBuf,
    /// Operator-curated replacement icons, `{package_id}.jpg` per app.
    pub override_dir: PathBuf,
    pub marketplace_api_base: String,
    pub marketplace_script_url: String,
    pub repo: String,
}

impl PipelineConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.temp_root.join(STORE_DIR)
    }

    pub fn release_dir(&self) -> PathBuf {
        self.temp_root.join(RELEASE_DIR)
    }

    pub fn marketplace_icon_dir(&self) -> PathBuf {
        self.temp_root.join(MARKETPLACE_ICON_DIR)
    }
}

/// Which stages to run. Absent any explicit selection the whole pipeline
/// runs end to end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageToggles {
    pub download_store_list: bool,
    pub reconcile_genres: bool,
    pub harvest_marketplace: bool,
    pub download_prior_release: bool,
    pub diff_against_prior: bool,
    pub publish_release: bool,
}

impl StageToggles {
    pub fn all() -> Self {
        Self {
            download_store_list: true,
            reconcile_genres: true,
            harvest_marketplace: true,
            download_prior_release: true,
            diff_against_prior: true,
            publish_release: true,
        }
    }

    pub fn any(&self) -> bool {
        self.download_store_list
            || self.reconcile_genres
            || self.harvest_marketplace
            || self.download_prior_release
            || self.diff_against_prior
            || self.publish_release
    }

    /// No explicit stage selection means "run everything".
    pub fn normalized(self) -> Self {
        if self.any() {
            self
        } else {
            Self::all()
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<HttpFetcher>,
    release: ReleaseClient,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, fetcher: Arc<HttpFetcher>, release: ReleaseClient) -> Self {
        Self {
            config,
            fetcher,
            release,
        }
    }

    pub async fn run(&self, toggles: StageToggles) -> Result<()> {
        let toggles = toggles.normalized();
        tokio::fs::create_dir_all(&self.config.temp_root)
            .await
            .with_context(|| format!("creating workspace {}", self.config.temp_root.display()))?;

        if toggles.download_store_list {
            self.download_store_list().await?;
        }
        if toggles.reconcile_genres {
            self.reconcile_genres().await?;
        }
        if toggles.harvest_marketplace {
            self.harvest_marketplace().await?;
        }
        if toggles.download_prior_release {
            self.download_prior_release().await?;
        }
        if toggles.diff_against_prior {
            diff_against_prior(
                &self.config.diff_tool_path,
                &self.config.release_dir(),
                &self.config.store_dir(),
            )
            .await?;
        }
        if toggles.publish_release {
            self.publish_release().await?;
        }
        Ok(())
    }

    /// Runs the external store crawler in a fresh directory and renames its
    /// fixed-named output to the canonical list name.
    async fn download_store_list(&self) -> Result<()> {
        info!(stage = "download_store_list", "stage start");
        let store_dir = self.config.store_dir();
        recreate_dir(&store_dir).await?;

        // The crawler writes into its working directory and takes no
        // arguments.
        tool::run_tool(&self.config.crawler_path, &[], Some(&store_dir))
            .await
            .context("store crawler failed")?;

        let raw = store_dir.join(STORE_LIST_RAW);
        let canonical = store_dir.join(STORE_LIST);
        tokio::fs::rename(&raw, &canonical)
            .await
            .with_context(|| format!("renaming {} to {}", raw.display(), canonical.display()))?;

        info!(stage = "download_store_list", list = %canonical.display(), "stage end");
        Ok(())
    }

    /// Cross-references the store list against the genre database and writes
    /// the genrefied variant next to it.
    async fn reconcile_genres(&self) -> Result<()> {
        info!(stage = "reconcile_genres", "stage start");
        let feeds = GenreFeeds::new(&self.config.temp_root);
        let pool = genredb::load_genre_pool(self.fetcher.as_ref(), &feeds).await?;

        let list_path = self.config.store_dir().join(STORE_LIST);
        let mut manifest = read_manifest(&list_path).await?;
        let summary = genredb::reconcile(&mut manifest, &pool)?;

        let genrefied_path = self.config.store_dir().join(STORE_LIST_GENREFIED);
        write_manifest(&genrefied_path, &manifest).await?;

        info!(
            stage = "reconcile_genres",
            matched = summary.matched,
            unmatched = summary.unmatched,
            "stage end"
        );
        Ok(())
    }

    async fn harvest_marketplace(&self) -> Result<()> {
        info!(stage = "harvest_marketplace", "stage start");
        let icon_dir = self.config.marketplace_icon_dir();
        recreate_dir(&icon_dir).await?;

        let api = Arc::new(HttpMarketplace::new(
            self.fetcher.clone(),
            &self.config.marketplace_api_base,
            &self.config.marketplace_script_url,
        ));
        let harvester_config = HarvesterConfig::new(
            icon_dir,
            self.config.override_dir.clone(),
            self.config.temp_root.join(MARKETPLACE_LIST),
            self.config.temp_root.join(MARKETPLACE_ICONPACK),
        );
        let summary = marketplace::harvest(api, &harvester_config).await?;

        info!(
            stage = "harvest_marketplace",
            categories = summary.categories,
            apps = summary.apps,
            icons = summary.icons_written,
            "stage end"
        );
        Ok(())
    }

    /// Downloads the prior release's assets and extracts its store icon pack
    /// so the diff stage has something to compare against.
    async fn download_prior_release(&self) -> Result<()> {
        info!(stage = "download_prior_release", "stage start");
        let release_dir = self.config.release_dir();
        recreate_dir(&release_dir).await?;

        let Some(release) = self.release.latest_release().await? else {
            warn!(stage = "download_prior_release", "no release yet, nothing to download");
            return Ok(());
        };
        info!(tag = %release.tag_name, assets = release.assets.len(), "downloading prior release");

        for asset in &release.assets {
            let bytes = self.release.download_asset(asset).await?;
            let path = release_dir.join(&asset.name);
            tokio::fs::write(&path, bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(asset = %asset.name, "asset downloaded");
        }

        let iconpack = release_dir.join(STORE_ICONPACK);
        if iconpack.is_file() {
            unpack_archive(&iconpack, &release_dir.join(STORE_ICON_DIR))?;
        }

        info!(stage = "download_prior_release", "stage end");
        Ok(())
    }

    /// Publishes a dated release and uploads whichever artifacts this run
    /// produced.
    async fn publish_release(&self) -> Result<()> {
        info!(stage = "publish_release", "stage start");
        let tag = release_tag(chrono::Local::now().date_naive());
        let name = format!("{tag}: Update Quest assets");
        info!(tag, name, repo = %self.config.repo, "creating release");

        let release = self
            .release
            .create_release(&tag, &name, "Updating Quest assets", false)
            .await?;

        let store_dir = self.config.store_dir();
        let candidates = [
            store_dir.join(STORE_LIST_GENREFIED),
            self.config.temp_root.join(MARKETPLACE_LIST),
            self.config.temp_root.join(MARKETPLACE_ICONPACK),
            store_dir.join(STORE_LIST),
            store_dir.join(STORE_ICONPACK),
        ];
        for path in candidates {
            if path.is_file() {
                self.release.upload_asset(&release, &path).await?;
            } else {
                info!(artifact = %path.display(), "artifact absent, not uploaded");
            }
        }

        info!(stage = "publish_release", tag, "stage end");
        Ok(())
    }
}

/// Diffs the freshly generated store artifacts against the prior release's,
/// icon directory first, manifest second. Each comparison is skipped with a
/// log line when the prior side is missing (first run, or the download stage
/// was not selected).
async fn diff_against_prior(diff_tool: &Path, release_dir: &Path, store_dir: &Path) -> Result<()> {
    info!(stage = "diff_against_prior", "stage start");

    let prior_icons = release_dir.join(STORE_ICON_DIR);
    if prior_icons.is_dir() {
        let current_icons = store_dir.join(STORE_ICON_DIR);
        tool::run_tool(
            diff_tool,
            &[
                "-t",
                &prior_icons.display().to_string(),
                &current_icons.display().to_string(),
            ],
            None,
        )
        .await
        .context("icon directory diff failed")?;
    } else {
        info!(path = %prior_icons.display(), "no prior icons, diff skipped");
    }

    let prior_list = release_dir.join(STORE_LIST);
    if prior_list.is_file() {
        let current_list = store_dir.join(STORE_LIST);
        tool::run_tool(
            diff_tool,
            &[
                &prior_list.display().to_string(),
                &current_list.display().to_string(),
            ],
            None,
        )
        .await
        .context("store list diff failed")?;
    } else {
        info!(path = %prior_list.display(), "no prior list, diff skipped");
    }

    info!(stage = "diff_against_prior", "stage end");
    Ok(())
}

/// `v%Y.%m.%d` for today's run.
fn release_tag(date: NaiveDate) -> String {
    format!("v{}", date.format("%Y.%m.%d"))
}

async fn recreate_dir(dir: &Path) -> Result<()> {
    if tokio::fs::metadata(dir).await.is_ok() {
        tokio::fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("clearing {}", dir.display()))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    Ok(())
}

async fn read_manifest(path: &Path) -> Result<AppManifest> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn write_manifest(path: &Path, manifest: &AppManifest) -> Result<()> {
    let pretty = serde_json::to_vec_pretty(manifest).context("serializing manifest")?;
    tokio::fs::write(path, pretty)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
