//! Category labels, weights and the priority-merge rule.
//!
//! Categories are processed in weight-descending order so high-priority
//! categories claim an app's primary slot first. Weights come from the
//! override table below; categories the table does not know weigh their
//! observed app count, which keeps populous untagged categories above tiny
//! ones but below anything explicitly ranked.

use crate::{AppManifest, AppRecord, CategoryDescriptor};

/// Label assigned to apps seen only under catch-all marketplace sections.
/// The merge rule treats it as "still unset".
pub const GENERIC_CATEGORY: &str = "SideQuest";

/// Marketplace sections that carry no genre information of their own.
const SENTINEL_CATEGORIES: [&str; 3] = ["All Games & Apps", "Staff Picks", "App Lab"];

const WEIGHT_OVERRIDES: [(&str, i64); 10] = [
    ("Shooter", 9000),
    ("Adventure", 8500),
    ("Action", 8000),
    ("Puzzle", 7500),
    ("Simulation", 7000),
    ("Racing", 6500),
    ("Fitness", 6000),
    ("Music & Rhythm", 5500),
    ("Horror", 5000),
    ("All Games & Apps", 0),
];

/// Canonicalizes overlapping labels across the marketplace and the genre
/// database.
const RENAMES: [(&str, &str); 4] = [
    ("FPS", "Shooter"),
    ("Sports", "Fitness"),
    ("Rhythm", "Music & Rhythm"),
    ("Social", "Social & Casual"),
];

pub fn rename_category(label: &str) -> &str {
    for (from, to) in RENAMES {
        if label == from {
            return to;
        }
    }
    label
}

/// Resolves the label a marketplace category contributes to its apps.
pub fn resolve_label(category_name: &str) -> &str {
    if SENTINEL_CATEGORIES.contains(&category_name) {
        return GENERIC_CATEGORY;
    }
    rename_category(category_name)
}

pub fn weight_for(category_name: &str, app_count: usize) -> i64 {
    for (name, weight) in WEIGHT_OVERRIDES {
        if category_name == name {
            return weight;
        }
    }
    app_count as i64
}

/// Orders descriptors by weight descending. Processing order is priority:
/// the first two distinct qualifying labels an app collects win.
pub fn sort_by_weight_desc(descriptors: &mut [CategoryDescriptor]) {
    descriptors.sort_by(|a, b| b.weight.cmp(&a.weight));
}

/// Merges one sighting of an app into the manifest.
///
/// New package ids get the label as primary category. Existing records only
/// ever fill a slot that is empty or still the generic default; an app that
/// already carries two real categories is left unchanged.
pub fn merge_app(manifest: &mut AppManifest, package_id: &str, name: &str, label: &str) {
    let Some(record) = manifest.get_mut(package_id) else {
        manifest.insert(
            package_id.to_string(),
            AppRecord {
                name: name.to_string(),
                category: label.to_string(),
                category2: String::new(),
            },
        );
        return;
    };

    if record.category.is_empty() || record.category == GENERIC_CATEGORY {
        record.category = label.to_string();
    } else if record.category != label
        && (record.category2.is_empty() || record.category2 == GENERIC_CATEGORY)
    {
        record.category2 = label.to_string();
    }
}
