//! Accelerated Mobile Pages detection.
//!
//! AMP documents are validated against a strict markup grammar, so none of the
//! optimization passes may touch them. Detection is a bounded probe of the
//! document prefix for an `<html>` start tag that carries the `amp` (or `⚡`)
//! attribute:
//!
//! ```text
//! start-tag := "<html" attribute* ws+ marker value? attribute* ws* "/"? ">"
//! attribute := ws+ name value?
//! marker    := "amp" (ASCII case-insensitive) | "⚡"
//! value     := ws* "=" ws* ( '"' [^"]* '"' | "'" [^']* "'" | unquoted )
//! ```
//!
//! Markers that appear past the probe window, or a start tag that is cut off
//! by it, are not detected.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of characters inspected at the start of the document.
pub const AMP_PROBE_CHARS: usize = 200;

const ATTRIBUTE_NAME: &str = r#"[^\s"'>/=]+"#;
const ATTRIBUTE_VALUE: &str = r#"(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?"#;

static AMP_ROOT: Lazy<Option<Regex>> = Lazy::new(|| {
    let attribute = format!(r"\s+{ATTRIBUTE_NAME}{ATTRIBUTE_VALUE}");
    let pattern = format!(
        r"(?i)<html(?:{attribute})*?\s+(?:amp|⚡){ATTRIBUTE_VALUE}(?:{attribute})*\s*/?>"
    );
    Regex::new(&pattern).ok()
});

/// Returns true when the document's root element is marked as AMP.
pub fn is_amp_document(html: &str) -> bool {
    let Some(regex) = AMP_ROOT.as_ref() else {
        return false;
    };
    regex.is_match(probe_window(html))
}

/// The leading [`AMP_PROBE_CHARS`] characters of `html`, cut on a char boundary.
fn probe_window(html: &str) -> &str {
    match html.char_indices().nth(AMP_PROBE_CHARS) {
        Some((index, _)) => &html[..index],
        None => html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_amp_attribute_is_detected() {
        assert!(is_amp_document("<!doctype html><html amp><head></head></html>"));
    }

    #[test]
    fn lightning_attribute_is_detected() {
        assert!(is_amp_document("<!doctype html><html ⚡ lang=\"en\"><head>"));
    }

    #[test]
    fn marker_among_other_attributes_is_detected() {
        assert!(is_amp_document(
            "<html lang=\"en\" amp=\"\" class='no-js' data-theme=dark>"
        ));
        assert!(is_amp_document("<HTML AMP>"));
        assert!(is_amp_document("<html\n  amp\n>"));
    }

    #[test]
    fn plain_document_is_not_amp() {
        assert!(!is_amp_document("<!doctype html><html lang=\"en\"><head>"));
        assert!(!is_amp_document(""));
    }

    #[test]
    fn marker_inside_attribute_value_is_ignored() {
        assert!(!is_amp_document("<html class=\"camp\">"));
        assert!(!is_amp_document("<html class=\"amp page\">"));
        assert!(!is_amp_document("<html data-amp=\"1\">"));
        assert!(!is_amp_document("<html ampx>"));
    }

    #[test]
    fn other_elements_do_not_count() {
        assert!(!is_amp_document("<!doctype html><htmlx amp><body amp>"));
    }

    #[test]
    fn marker_past_probe_window_is_not_detected() {
        let padding = "<!-- ".to_string() + &"x".repeat(AMP_PROBE_CHARS) + " -->";
        let html = format!("{padding}<html amp>");
        assert!(!is_amp_document(&html));
    }

    #[test]
    fn start_tag_cut_by_probe_window_is_not_detected() {
        let padding = " ".repeat(AMP_PROBE_CHARS - "<html amp".len());
        let html = format!("{padding}<html amp>");
        assert!(!is_amp_document(&html));
    }

    #[test]
    fn probe_window_respects_char_boundaries() {
        let html = "é".repeat(AMP_PROBE_CHARS + 10);
        assert_eq!(probe_window(&html).chars().count(), AMP_PROBE_CHARS);
    }
}
