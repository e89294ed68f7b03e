//! Client for the release-hosting API: fetch the prior release's assets and
//! publish the new dated release.

use std::path::Path;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;

use crate::FetchError;

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
}

#[derive(Debug)]
pub struct ReleaseClient {
    client: reqwest::Client,
    api_base: String,
    upload_base: String,
    repo: String,
}

impl ReleaseClient {
    pub fn new(repo: &str, token: &str) -> Result<Self> {
        Self::with_base_urls(
            repo,
            token,
            "https://api.github.com",
            "https://uploads.github.com",
        )
    }

    /// Base URLs are injectable so construction stays testable against a
    /// local endpoint.
    pub fn with_base_urls(repo: &str, token: &str, api_base: &str, upload_base: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("token {token}")).context("auth header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("QuestAppLauncher Assets"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("building release client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
        })
    }

    /// The most recent release, or `None` when the repository has none yet
    /// (the first pipeline run).
    pub async fn latest_release(&self) -> Result<Option<Release>, FetchError> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, self.repo);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        let release = response.json::<Release>().await?;
        Ok(Some(release))
    }

    pub async fn download_asset(&self, asset: &ReleaseAsset) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(&asset.url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: asset.url.clone(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn create_release(
        &self,
        tag: &str,
        name: &str,
        message: &str,
        draft: bool,
    ) -> Result<Release, FetchError> {
        let url = format!("{}/repos/{}/releases", self.api_base, self.repo);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "tag_name": tag,
                "name": name,
                "body": message,
                "draft": draft,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.json::<Release>().await?)
    }

    pub async fn upload_asset(&self, release: &Release, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("asset path {} has no file name", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading asset {}", path.display()))?;
        let url = format!(
            "{}/repos/{}/releases/{}/assets?name={}",
            self.upload_base, self.repo, release.id, file_name
        );

        info!(asset = file_name, bytes = bytes.len(), "uploading release asset");
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .context("uploading asset")?;
        let status = response.status();
        if !status.is_success() {
            bail!("asset upload for {file_name} failed with status {status}");
        }
        Ok(())
    }
}

/// Access token from the CLI argument, falling back to the first line of
/// the credentials file. Neither present is fatal for the whole run.
pub fn resolve_token(argument: Option<String>, credentials_file: &Path) -> Result<String> {
    if let Some(token) = argument {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }
    if credentials_file.is_file() {
        let text = std::fs::read_to_string(credentials_file)
            .with_context(|| format!("reading {}", credentials_file.display()))?;
        let first_line = text.lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            bail!("credentials file {} is empty", credentials_file.display());
        }
        return Ok(first_line.to_string());
    }
    bail!(
        "no access token: pass one as an argument or create {}",
        credentials_file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn argument_token_wins_over_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("github_token");
        std::fs::write(&file, "file-token\n").unwrap();
        let token = resolve_token(Some("arg-token".to_string()), &file).unwrap();
        assert_eq!(token, "arg-token");
    }

    #[test]
    fn file_token_is_first_line_trimmed() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("github_token");
        std::fs::write(&file, "  file-token  \nsecond line\n").unwrap();
        let token = resolve_token(None, &file).unwrap();
        assert_eq!(token, "file-token");
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("github_token");
        assert!(resolve_token(None, &missing).is_err());

        std::fs::write(&missing, "\n").unwrap();
        assert!(resolve_token(None, &missing).is_err());
    }

    #[test]
    fn client_accepts_injected_base_urls() {
        let client = ReleaseClient::with_base_urls(
            "owner/assets",
            "t0ken",
            "http://127.0.0.1:9999/",
            "http://127.0.0.1:9999/uploads/",
        )
        .unwrap();
        assert_eq!(client.api_base, "http://127.0.0.1:9999");
        assert_eq!(client.upload_base, "http://127.0.0.1:9999/uploads");
    }
}
