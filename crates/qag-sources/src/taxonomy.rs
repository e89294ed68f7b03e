//! Category taxonomy extraction from the marketplace's bundled client
//! script.
//!
//! The taxonomy is not served as an API response; it lives as a JS array
//! literal inside `main.js`. The literal is almost-JSON, so a small set of
//! rewrites is applied before strict parsing. The full tolerance list:
//!
//! 1. the minified boolean `!0` in value position (after `:`, `,` or `[`)
//!    becomes the quoted string `"true"`;
//! 2. bare object keys are quoted;
//! 3. single-quoted strings become double-quoted.
//!
//! The capture pattern stops at the first `]`, so the array must stay flat
//! (a list of objects without nested arrays); that is the shape the script
//! has always had. Anything else that fails to parse is a hard error, not a
//! guess.

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

const TAXONOMY_PATTERN: &str = r"this\.sidequestItems\s*=\s*(\[[^\]]*\])";

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("category array not found in client script")]
    NotFound,
    #[error("category array is not valid JSON after rewrites: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("taxonomy pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// One category as declared by the client script. `tag` is the search-API
/// filter value; categories without one get a tag derived from their name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawCategory {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
}

pub fn extract_categories(script: &str) -> Result<Vec<RawCategory>, TaxonomyError> {
    let pattern = Regex::new(TAXONOMY_PATTERN)?;
    let literal = pattern
        .captures(script)
        .and_then(|captures| captures.get(1))
        .ok_or(TaxonomyError::NotFound)?
        .as_str();
    let rewritten = lenient_rewrite(literal)?;
    Ok(serde_json::from_str(&rewritten)?)
}

fn lenient_rewrite(literal: &str) -> Result<String, regex::Error> {
    let boolean = Regex::new(r"([:\[,]\s*)!0")?;
    let booleans = boolean.replace_all(literal, "$1\"true\"").into_owned();
    let bare_key = Regex::new(r#"([\[{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#)?;
    let keyed = bare_key.replace_all(&booleans, "$1\"$2\":").into_owned();
    Ok(keyed.replace('\'', "\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = concat!(
        "var e=function(){};",
        "this.sidequestItems=[",
        "{name:\"All Games & Apps\",tag:null,is_default:!0},",
        "{name:\"Shooter\",tag:\"shooter\"},",
        "{name:'App Lab',tag:'applab'},",
        "{name:\"Staff Picks\"}",
        "];this.other=[1,2];"
    );

    #[test]
    fn extracts_names_and_tags_from_minified_script() {
        let categories = extract_categories(SCRIPT).unwrap();
        assert_eq!(categories.len(), 4);
        assert_eq!(categories[0].name, "All Games & Apps");
        assert_eq!(categories[0].tag, None);
        assert_eq!(categories[1].tag.as_deref(), Some("shooter"));
        assert_eq!(categories[2].name, "App Lab");
        assert_eq!(categories[3].tag, None);
    }

    #[test]
    fn shorthand_true_is_rewritten_not_rejected() {
        let script = "this.sidequestItems=[{name:\"X\",featured:!0}]";
        let categories = extract_categories(script).unwrap();
        assert_eq!(categories[0].name, "X");
    }

    #[test]
    fn bang_zero_inside_a_string_value_is_preserved() {
        let script = "this.sidequestItems=[{name:\"Warp !0 Zone\",featured:!0}]";
        let categories = extract_categories(script).unwrap();
        assert_eq!(categories[0].name, "Warp !0 Zone");
    }

    #[test]
    fn missing_array_is_a_not_found_error() {
        let err = extract_categories("console.log('no items here')").unwrap_err();
        assert!(matches!(err, TaxonomyError::NotFound));
    }

    #[test]
    fn garbage_inside_the_array_is_a_parse_error() {
        let err = extract_categories("this.sidequestItems=[{name:}]").unwrap_err();
        assert!(matches!(err, TaxonomyError::Parse(_)));
    }
}
