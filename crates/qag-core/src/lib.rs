//! Core domain model and category policy for the Quest asset pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod category;
pub mod names;
pub mod slug;

pub const CRATE_NAME: &str = "qag-core";

/// One merged manifest entry, keyed externally by package id.
///
/// `category2` is a secondary tag; the empty string means "unset". Once
/// `category` holds anything other than the generic default it is only
/// replaced through the weight-priority rule in [`category::merge_app`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub category2: String,
}

impl AppRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            category2: String::new(),
        }
    }
}

/// The shared app mapping. `BTreeMap` keeps manifest output stable across
/// runs so release diffs only show real changes.
pub type AppManifest = BTreeMap<String, AppRecord>;

/// Metadata for one marketplace category after its listing has been paged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDescriptor {
    pub name: String,
    pub tag: Option<String>,
    pub weight: i64,
    pub app_count: usize,
}
