//! Normalization of model-produced `type` and `created` values.
//!
//! Both functions are idempotent and pass canonical values through
//! unchanged; values they cannot repair are returned as-is for the
//! validator to flag.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::defaults::DCMI_TYPES;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year regex"));
static YMD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("ymd regex"));
static Y_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("year-only regex"));

/// Map a free-form type value onto the DCMI vocabulary.
///
/// Resolution order: exact match, case-insensitive match, then a synonym
/// table for values models commonly produce. Unknown values are returned
/// unchanged.
pub fn normalize_type(value: &str) -> String {
    if DCMI_TYPES.contains(&value) {
        return value.to_string();
    }

    let lower = value.to_lowercase();
    for canonical in DCMI_TYPES {
        if canonical.to_lowercase() == lower {
            return canonical.to_string();
        }
    }

    let mapped = match lower.as_str() {
        "photo" | "photograph" | "picture" => "StillImage",
        "img" | "images" => "Image",
        "video" | "movie" | "film" => "MovingImage",
        "audio" | "recording" => "Sound",
        "document" | "book" | "article" | "manuscript" => "Text",
        "object" | "artifact" => "PhysicalObject",
        _ => return value.to_string(),
    };
    mapped.to_string()
}

/// Coerce a free-form date value toward `YYYY` or `YYYY-MM-DD`.
///
/// Values already in either shape pass through. Otherwise the first
/// 19xx/20xx year found anywhere in the string is used. Values with no
/// recognizable year are returned unchanged.
pub fn normalize_date(value: &str) -> String {
    if Y_RE.is_match(value) || YMD_RE.is_match(value) {
        return value.to_string();
    }
    match YEAR_RE.find(value) {
        Some(m) => m.as_str().to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_exact_match_passes_through() {
        for canonical in DCMI_TYPES {
            assert_eq!(normalize_type(canonical), canonical);
        }
    }

    #[test]
    fn type_case_insensitive_match() {
        assert_eq!(normalize_type("MOVINGIMAGE"), "MovingImage");
        assert_eq!(normalize_type("stillimage"), "StillImage");
        assert_eq!(normalize_type("collection"), "Collection");
    }

    #[test]
    fn type_synonym_mapping() {
        assert_eq!(normalize_type("photo"), "StillImage");
        assert_eq!(normalize_type("Photograph"), "StillImage");
        assert_eq!(normalize_type("picture"), "StillImage");
        assert_eq!(normalize_type("img"), "Image");
        assert_eq!(normalize_type("images"), "Image");
        assert_eq!(normalize_type("video"), "MovingImage");
        assert_eq!(normalize_type("movie"), "MovingImage");
        assert_eq!(normalize_type("film"), "MovingImage");
        assert_eq!(normalize_type("audio"), "Sound");
        assert_eq!(normalize_type("recording"), "Sound");
        assert_eq!(normalize_type("document"), "Text");
        assert_eq!(normalize_type("book"), "Text");
        assert_eq!(normalize_type("article"), "Text");
        assert_eq!(normalize_type("manuscript"), "Text");
        assert_eq!(normalize_type("object"), "PhysicalObject");
        assert_eq!(normalize_type("artifact"), "PhysicalObject");
    }

    #[test]
    fn type_unknown_passes_through_for_validator() {
        assert_eq!(normalize_type("widget"), "widget");
        assert_eq!(normalize_type(""), "");
    }

    #[test]
    fn type_is_idempotent() {
        for input in ["photo", "MOVINGIMAGE", "widget", "Collection", "audio"] {
            let once = normalize_type(input);
            assert_eq!(normalize_type(&once), once);
        }
    }

    #[test]
    fn date_canonical_shapes_pass_through() {
        assert_eq!(normalize_date("1927"), "1927");
        assert_eq!(normalize_date("2021-06-30"), "2021-06-30");
        // Shape check only; the validator owns calendar correctness.
        assert_eq!(normalize_date("2021-99-99"), "2021-99-99");
    }

    #[test]
    fn date_extracts_first_modern_year() {
        assert_eq!(normalize_date("circa 1927, printed 1943"), "1927");
        assert_eq!(normalize_date("June 30, 2021"), "2021");
        assert_eq!(normalize_date("c.1880-1890"), "c.1880-1890");
    }

    #[test]
    fn date_without_year_passes_through() {
        assert_eq!(normalize_date("undated"), "undated");
        assert_eq!(normalize_date(""), "");
        // 18xx is outside the extraction window.
        assert_eq!(normalize_date("around 1850 or so"), "around 1850 or so");
    }

    #[test]
    fn date_is_idempotent() {
        for input in ["1927", "2021-06-30", "circa 1927", "undated", "June 2021"] {
            let once = normalize_date(input);
            assert_eq!(normalize_date(&once), once);
        }
    }

    #[test]
    fn date_every_modern_year_is_fixed_point() {
        for year in 1900..=2099 {
            let y = year.to_string();
            assert_eq!(normalize_date(&y), y);
        }
    }
}
