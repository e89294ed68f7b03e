//! App-name normalization and genre-string parsing for cross-referencing
//! the store list against the genre database.

use regex::Regex;

use crate::category::rename_category;

/// Suffix variants stripped before matching. The fourth entry uses an
/// en-dash; some store titles carry it instead of the ASCII hyphen.
const STRIPPED_SUFFIXES: [&str; 4] = [" - demo", " - vr comic", " - vr", " \u{2013} demo"];

/// Lowercases and strips the known title decorations so `"Foo - Demo"`,
/// `"Foo VR"` and `"Foo"` all normalize to `"foo"`.
pub fn normalize_app_name(name: &str) -> String {
    let mut normalized = name.to_lowercase();
    for suffix in STRIPPED_SUFFIXES {
        normalized = normalized.replace(suffix, "");
    }
    if let Some(stripped) = normalized.strip_suffix(" vr") {
        normalized = stripped.to_string();
    }
    normalized
}

/// Removes HTML tags from genre-database display names, which arrive as
/// anchor markup around the title.
pub struct TagStripper {
    pattern: Regex,
}

impl TagStripper {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new("<[^<]+?>")?,
        })
    }

    pub fn strip(&self, input: &str) -> String {
        self.pattern.replace_all(input, "").into_owned()
    }
}

/// Splits a genre-database CSV string into canonical labels.
pub fn split_genres(raw: &str) -> Vec<String> {
    let cleaned = raw.replace("360 Experience (non-game)", "360 Experience");
    cleaned
        .split(',')
        .map(str::trim)
        .filter(|genre| !genre.is_empty())
        .map(|genre| rename_category(genre).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_title_variants_normalize_to_the_bare_name() {
        for variant in ["Foo - Demo", "Foo VR", "Foo \u{2013} Demo", "Foo"] {
            assert_eq!(normalize_app_name(variant), "foo", "variant {variant:?}");
        }
    }

    #[test]
    fn trailing_vr_is_stripped_after_suffix_removal() {
        assert_eq!(normalize_app_name("Racer VR - Demo"), "racer");
    }

    #[test]
    fn inner_vr_words_are_preserved_when_not_a_suffix() {
        assert_eq!(normalize_app_name("VRacket"), "vracket");
    }

    #[test]
    fn tags_are_stripped_from_display_names() {
        let stripper = TagStripper::new().unwrap();
        assert_eq!(
            stripper.strip("<a href=\"/app/1\"><b>Beat Blaster</b></a>"),
            "Beat Blaster"
        );
        assert_eq!(stripper.strip("Plain Title"), "Plain Title");
    }

    #[test]
    fn genre_csv_is_trimmed_renamed_and_de_parenthesized() {
        assert_eq!(
            split_genres("FPS, 360 Experience (non-game) , Puzzle"),
            ["Shooter", "360 Experience", "Puzzle"]
        );
        assert!(split_genres("").is_empty());
    }
}
