//! Genre reconciliation: cross-references the store manifest against the
//! community genre database and fills each app's category slots.
//!
//! The database rows are positional JSON arrays. Display names carry anchor
//! markup and title decorations, so both sides are stripped and normalized
//! before the substring match.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info};

use qag_core::names::{normalize_app_name, split_genres, TagStripper};
use qag_core::AppManifest;
use qag_fetch::cache::{fetch_or_load, RemoteJson};

pub const GENRE_CACHE_HOURS: f64 = 24.0;

/// Positional indices into a database row.
const DISPLAY_NAME_INDEX: usize = 1;
const GENRES_INDEX: usize = 11;

/// The two feeds making up the genre pool: the curated store listing and
/// the experimental-channel listing.
#[derive(Debug, Clone)]
pub struct GenreFeeds {
    pub main_url: String,
    pub lab_url: String,
    pub main_cache: PathBuf,
    pub lab_cache: PathBuf,
    pub max_age_hours: f64,
}

impl GenreFeeds {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            main_url: "https://vrdb.app/quest/index_eu.json".to_string(),
            lab_url: "https://vrdb.app/quest/lab/index_eu.json".to_string(),
            main_cache: cache_dir.join("genres_main.json"),
            lab_cache: cache_dir.join("genres_lab.json"),
            max_age_hours: GENRE_CACHE_HOURS,
        }
    }
}

type GenreRow = Vec<serde_json::Value>;

/// Loads and concatenates both feeds' `data` arrays, going through the
/// on-disk cache.
pub async fn load_genre_pool(remote: &dyn RemoteJson, feeds: &GenreFeeds) -> Result<Vec<GenreRow>> {
    let mut pool = Vec::new();
    for (url, cache) in [
        (&feeds.main_url, &feeds.main_cache),
        (&feeds.lab_url, &feeds.lab_cache),
    ] {
        let value = fetch_or_load(remote, url, cache, feeds.max_age_hours)
            .await
            .with_context(|| format!("loading genre feed {url}"))?;
        let rows: Vec<GenreRow> = serde_json::from_value(
            value.get("data").cloned().unwrap_or(serde_json::Value::Null),
        )
        .with_context(|| format!("genre feed {url} has no usable data array"))?;
        info!(url, rows = rows.len(), "genre feed loaded");
        pool.extend(rows);
    }
    Ok(pool)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub matched: usize,
    pub unmatched: usize,
    pub without_genre: usize,
}

/// Assigns up to two genres to every app in `manifest`. Matching is
/// first-wins: the normalized store name must appear as a substring of a
/// row's stripped, normalized display name. Unmatched apps keep their
/// category slots untouched.
pub fn reconcile(manifest: &mut AppManifest, pool: &[GenreRow]) -> Result<ReconcileSummary> {
    let stripper = TagStripper::new().context("compiling tag-strip pattern")?;
    // The database side is only de-tagged and lowercased. Suffix stripping
    // applies to the candidate name alone; a db title may contain "- demo"
    // or "vr" mid-name and must stay matchable.
    let haystacks: Vec<(String, &GenreRow)> = pool
        .iter()
        .filter_map(|row| {
            let display = row.get(DISPLAY_NAME_INDEX).and_then(|v| v.as_str())?;
            Some((stripper.strip(display).to_lowercase(), row))
        })
        .collect();

    let mut summary = ReconcileSummary::default();
    for (package_id, record) in manifest.iter_mut() {
        if record.name.is_empty() {
            error!(package = %package_id, "app has no name, cannot match genres");
            summary.unmatched += 1;
            continue;
        }
        let needle = normalize_app_name(&record.name);
        let Some((_, row)) = haystacks.iter().find(|(hay, _)| hay.contains(&needle)) else {
            error!(package = %package_id, app = %record.name, "app NOT in applist");
            summary.unmatched += 1;
            continue;
        };

        let raw_genres = row
            .get(GENRES_INDEX)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let genres = split_genres(raw_genres);
        if genres.is_empty() {
            error!(package = %package_id, app = %record.name, "app matched but has no genre");
            summary.without_genre += 1;
            continue;
        }

        record.category = genres[0].clone();
        record.category2 = genres.get(1).cloned().unwrap_or_default();
        summary.matched += 1;
    }

    info!(
        matched = summary.matched,
        unmatched = summary.unmatched,
        without_genre = summary.without_genre,
        "genre reconciliation done"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qag_core::AppRecord;
    use qag_fetch::FetchError;
    use serde_json::json;
    use tempfile::tempdir;

    /// Row with the real feed's positional shape: only indices 1 and 11
    /// matter, the rest are filler.
    fn row(display: &str, genres: &str) -> serde_json::Value {
        let mut cells = vec![json!(0); 12];
        cells[DISPLAY_NAME_INDEX] = json!(display);
        cells[GENRES_INDEX] = json!(genres);
        json!(cells)
    }

    fn pool_from(rows: Vec<serde_json::Value>) -> Vec<GenreRow> {
        serde_json::from_value(json!(rows)).unwrap()
    }

    #[test]
    fn markup_and_decorations_do_not_block_the_match() {
        let mut manifest = AppManifest::new();
        manifest.insert("com.beat".to_string(), AppRecord::named("Beat Blaster VR"));
        let pool = pool_from(vec![row(
            "<a href=\"/app/1\"><b>Beat Blaster</b></a>",
            "Music & Rhythm, Action",
        )]);

        let summary = reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(manifest["com.beat"].category, "Music & Rhythm");
        assert_eq!(manifest["com.beat"].category2, "Action");
    }

    #[test]
    fn db_titles_containing_suffix_words_mid_name_still_match() {
        let mut manifest = AppManifest::new();
        manifest.insert(
            "com.collect".to_string(),
            AppRecord::named("Demo Collection"),
        );
        // Lowercased the title contains the candidate; stripping "- demo"
        // from the database side would break the containment.
        let pool = pool_from(vec![row("Super - Demo Collection", "Puzzle")]);

        let summary = reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(manifest["com.collect"].category, "Puzzle");
    }

    #[test]
    fn first_matching_row_wins() {
        let mut manifest = AppManifest::new();
        manifest.insert("com.maze".to_string(), AppRecord::named("Maze"));
        let pool = pool_from(vec![
            row("Maze Runner Deluxe", "Adventure"),
            row("Maze", "Puzzle"),
        ]);

        reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(manifest["com.maze"].category, "Adventure");
    }

    #[test]
    fn unmatched_apps_keep_their_slots_untouched() {
        let mut manifest = AppManifest::new();
        manifest.insert(
            "com.ghost".to_string(),
            AppRecord {
                name: "Ghost Title".to_string(),
                category: "SideQuest".to_string(),
                category2: String::new(),
            },
        );
        let pool = pool_from(vec![row("Unrelated", "Horror")]);

        let summary = reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(summary.unmatched, 1);
        assert_eq!(manifest["com.ghost"].category, "SideQuest");
    }

    #[test]
    fn matched_row_without_genres_is_counted_separately() {
        let mut manifest = AppManifest::new();
        manifest.insert("com.bare".to_string(), AppRecord::named("Bare"));
        let pool = pool_from(vec![row("Bare", "")]);

        let summary = reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(summary.without_genre, 1);
        assert!(manifest["com.bare"].category.is_empty());
    }

    #[test]
    fn genre_renames_apply_during_assignment() {
        let mut manifest = AppManifest::new();
        manifest.insert("com.gun".to_string(), AppRecord::named("Gun Range"));
        let pool = pool_from(vec![row("Gun Range", "FPS, Sports")]);

        reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(manifest["com.gun"].category, "Shooter");
        assert_eq!(manifest["com.gun"].category2, "Fitness");
    }

    #[test]
    fn rows_without_a_display_name_are_ignored() {
        let mut manifest = AppManifest::new();
        manifest.insert("com.ok".to_string(), AppRecord::named("Okay"));
        let mut broken = vec![json!(0); 12];
        broken[DISPLAY_NAME_INDEX] = json!(null);
        let pool = pool_from(vec![json!(broken), row("Okay", "Puzzle")]);

        let summary = reconcile(&mut manifest, &pool).unwrap();
        assert_eq!(summary.matched, 1);
    }

    struct TwoFeedRemote;

    #[async_trait]
    impl RemoteJson for TwoFeedRemote {
        async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
            if url.contains("/lab/") {
                Ok(json!({"data": [row("Lab App", "Action")]}))
            } else {
                Ok(json!({"data": [row("Main App", "Puzzle")]}))
            }
        }
    }

    #[tokio::test]
    async fn both_feeds_contribute_to_the_pool() {
        let dir = tempdir().unwrap();
        let feeds = GenreFeeds::new(dir.path());
        let pool = load_genre_pool(&TwoFeedRemote, &feeds).await.unwrap();
        assert_eq!(pool.len(), 2);
        assert!(feeds.main_cache.is_file());
        assert!(feeds.lab_cache.is_file());
    }
}
