//! Source pipelines: the marketplace harvester and the genre reconciler.

pub mod genredb;
pub mod marketplace;
pub mod taxonomy;

pub const CRATE_NAME: &str = "qag-sources";
