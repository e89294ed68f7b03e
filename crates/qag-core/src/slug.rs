//! Filesystem-safe identifiers derived from package ids.

/// Lowercases, collapses every non-alphanumeric run to a single hyphen and
/// strips leading/trailing separators. Deterministic, so an app's icon file
/// name is stable across runs.
pub fn slugify(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Icon file name for a package id.
pub fn icon_file_name(package_id: &str) -> String {
    format!("{}.jpg", slugify(package_id))
}
