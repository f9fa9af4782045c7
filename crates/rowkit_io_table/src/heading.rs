//! Heading key normalization.
//!
//! Every mode is deterministic and idempotent: formatting an already formatted
//! heading with the same mode returns it unchanged.

use std::sync::LazyLock;

use regex::Regex;

use crate::spec::EnumHeadingFormat;

static RE_SLUG_SEPARATOR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[\s\-]+").ok());
static RE_SLUG_ILLEGAL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^a-z0-9_]").ok());
static RE_UNDERSCORE_RUN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"_{2,}").ok());
static RE_CASE_BOUNDARY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").ok());
static RE_WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());
static RE_SNAKE_ILLEGAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").ok());
static RE_WORD_ILLEGAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").ok());

fn replace_all(re: &Option<Regex>, text: &str, rep: &str) -> String {
    match re {
        Some(re) => re.replace_all(text, rep).into_owned(),
        None => text.to_string(),
    }
}

/// Format `heading` according to `mode`.
pub fn format_heading(heading: &str, mode: EnumHeadingFormat) -> String {
    match mode {
        EnumHeadingFormat::Slug => convert_to_slug(heading),
        EnumHeadingFormat::Snake => convert_to_snake(heading),
        EnumHeadingFormat::Camel => convert_to_camel(heading),
        EnumHeadingFormat::Studly => convert_to_studly(heading),
        EnumHeadingFormat::None => heading.to_string(),
    }
}

/// Format every heading; empty results fall back to the 1-based column number.
pub fn format_headings(headings: &[String], mode: EnumHeadingFormat) -> Vec<String> {
    headings
        .iter()
        .enumerate()
        .map(|(n_idx, heading)| {
            let c_key = format_heading(heading, mode);
            if c_key.is_empty() {
                (n_idx + 1).to_string()
            } else {
                c_key
            }
        })
        .collect()
}

/// `"  Full--Name!! "` -> `"full_name"`.
pub fn convert_to_slug(heading: &str) -> String {
    let c_lower = heading.to_lowercase();
    let c_joined = replace_all(&RE_SLUG_SEPARATOR, &c_lower, "_");
    let c_clean = replace_all(&RE_SLUG_ILLEGAL, &c_joined, "");
    let c_collapsed = replace_all(&RE_UNDERSCORE_RUN, &c_clean, "_");
    c_collapsed.trim_matches('_').to_string()
}

/// `"firstName"` -> `"first_name"`.
pub fn convert_to_snake(heading: &str) -> String {
    let c_split = replace_all(&RE_CASE_BOUNDARY, heading, "${1}_${2}");
    let c_joined = replace_all(&RE_WHITESPACE, &c_split, "_");
    replace_all(&RE_SNAKE_ILLEGAL, &c_joined, "").to_lowercase()
}

/// `"first name"` -> `"FirstName"`.
pub fn convert_to_studly(heading: &str) -> String {
    replace_all(&RE_WORD_ILLEGAL, heading, " ")
        .split_whitespace()
        .map(capitalize_first)
        .collect()
}

/// `"first name"` -> `"firstName"`.
pub fn convert_to_camel(heading: &str) -> String {
    let c_studly = convert_to_studly(heading);
    let mut it_chars = c_studly.chars();
    match it_chars.next() {
        Some(chr) => chr.to_lowercase().chain(it_chars).collect(),
        None => String::new(),
    }
}

fn capitalize_first(word: &str) -> String {
    let mut it_chars = word.chars();
    match it_chars.next() {
        Some(chr) => chr.to_uppercase().chain(it_chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_slug_examples() {
        assert_eq!(convert_to_slug("Full Name"), "full_name");
        assert_eq!(convert_to_slug("  multi--word!! "), "multi_word");
        assert_eq!(convert_to_slug("E-mail Address"), "e_mail_address");
        assert_eq!(convert_to_slug("__a__b__"), "a_b");
    }

    #[test]
    fn test_snake_camel_studly_examples() {
        assert_eq!(convert_to_snake("firstName"), "first_name");
        assert_eq!(convert_to_snake("Order Total"), "order_total");
        assert_eq!(convert_to_studly("order total"), "OrderTotal");
        assert_eq!(convert_to_studly("order_total"), "OrderTotal");
        assert_eq!(convert_to_camel("Order Total"), "orderTotal");
        assert_eq!(format_heading("Keep Me", EnumHeadingFormat::None), "Keep Me");
    }

    #[test]
    fn test_empty_keys_fall_back_to_column_number() {
        let l_keys = format_headings(
            &["Name".to_string(), "!!".to_string()],
            EnumHeadingFormat::Slug,
        );
        assert_eq!(l_keys, vec!["name".to_string(), "2".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_every_mode_is_idempotent(s in "[ A-Za-z0-9_!?-]{0,40}") {
            for mode in [
                EnumHeadingFormat::Slug,
                EnumHeadingFormat::Snake,
                EnumHeadingFormat::Camel,
                EnumHeadingFormat::Studly,
                EnumHeadingFormat::None,
            ] {
                let c_once = format_heading(&s, mode);
                prop_assert_eq!(format_heading(&c_once, mode), c_once.clone());
            }
        }

        #[test]
        fn prop_slug_charset(s in "\\PC{0,40}") {
            let c_slug = convert_to_slug(&s);
            prop_assert!(c_slug.chars().all(|chr| chr.is_ascii_lowercase() || chr.is_ascii_digit() || chr == '_'));
            prop_assert!(!c_slug.starts_with('_') && !c_slug.ends_with('_'));
        }
    }
}
