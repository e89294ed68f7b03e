use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use qag_fetch::release::{resolve_token, ReleaseClient};
use qag_fetch::{HttpClientConfig, HttpFetcher};
use qag_pipeline::{Pipeline, PipelineConfig, StageToggles};

#[derive(Debug, Parser)]
#[command(name = "qag")]
#[command(about = "Quest asset generator: aggregates app metadata and cover images into a dated release")]
struct Cli {
    /// Release-host access token; falls back to the credentials file.
    #[arg(short = 'a', long)]
    access_token: Option<String>,

    /// File holding the access token on its first line.
    #[arg(long, default_value = "github_token")]
    credentials_file: PathBuf,

    /// Repository receiving the release, as owner/name.
    #[arg(long, default_value = "QuestAppLauncher/QuestAppLauncher_Assets")]
    repo: String,

    /// Scratch workspace shared by all stages.
    #[arg(long, default_value = "__temp__")]
    temp_dir: PathBuf,

    /// External store-crawler executable.
    #[arg(long, default_value = "bin/qalag")]
    crawler: PathBuf,

    /// External diff executable for the compare stage.
    #[arg(long, default_value = "bin/windiff")]
    diff_tool: PathBuf,

    /// Directory of manual {package_id}.jpg override images.
    #[arg(long, default_value = "overrides")]
    override_dir: PathBuf,

    #[arg(long, default_value = "https://api.sidequestvr.com")]
    marketplace_api: String,

    #[arg(long, default_value = "https://sidequestvr.com/main.js")]
    marketplace_script: String,

    /// Run the external store crawler.
    #[arg(long)]
    store_list: bool,

    /// Genrefy the store list against the genre database.
    #[arg(short = 'g', long)]
    genrefy: bool,

    /// Harvest the community marketplace.
    #[arg(long)]
    marketplace: bool,

    /// Download the prior release's assets.
    #[arg(long)]
    download_release: bool,

    /// Diff generated artifacts against the prior release.
    #[arg(short = 'c', long)]
    compare: bool,

    /// Publish the dated release.
    #[arg(short = 'r', long)]
    release: bool,
}

impl Cli {
    fn toggles(&self) -> StageToggles {
        StageToggles {
            download_store_list: self.store_list,
            reconcile_genres: self.genrefy,
            harvest_marketplace: self.marketplace,
            download_prior_release: self.download_release,
            diff_against_prior: self.compare,
            publish_release: self.release,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let toggles = cli.toggles();
    if !toggles.any() {
        info!("no stage selected, running the whole pipeline");
    }

    let token = resolve_token(cli.access_token.clone(), &cli.credentials_file)?;
    let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default())?);
    let release = ReleaseClient::new(&cli.repo, &token)?;

    let config = PipelineConfig {
        temp_root: cli.temp_dir,
        crawler_path: cli.crawler,
        diff_tool_path: cli.diff_tool,
        override_dir: cli.override_dir,
        marketplace_api_base: cli.marketplace_api,
        marketplace_script_url: cli.marketplace_script,
        repo: cli.repo,
    };

    Pipeline::new(config, fetcher, release).run(toggles).await?;
    info!("pipeline finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stage_flags_map_onto_toggles() {
        let cli = Cli::parse_from(["qag", "-a", "t", "--genrefy", "--compare"]);
        let toggles = cli.toggles();
        assert!(toggles.reconcile_genres);
        assert!(toggles.diff_against_prior);
        assert!(!toggles.download_store_list);
        assert!(!toggles.publish_release);
    }

    #[test]
    fn bare_invocation_selects_no_stage_and_normalizes_to_all() {
        let cli = Cli::parse_from(["qag"]);
        assert!(!cli.toggles().any());
        assert_eq!(cli.toggles().normalized(), StageToggles::all());
    }
}
