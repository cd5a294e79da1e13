//! HTML minification backed by [`minify_html`].

use minify_html::{Cfg, minify};

use crate::application::optimizer::{Transform, TransformError};

pub struct HtmlMinifier {
    cfg: Cfg,
}

impl HtmlMinifier {
    pub fn new(keep_comments: bool) -> Self {
        let mut cfg = Cfg::new();
        cfg.keep_comments = keep_comments;
        // Later passes anchor on `<head>`; keep its opening tag.
        cfg.keep_html_and_head_opening_tags = true;
        cfg.minify_css = true;
        cfg.minify_js = true;
        Self { cfg }
    }
}

impl Transform for HtmlMinifier {
    fn transform(&self, html: String) -> Result<String, TransformError> {
        let minified = minify(html.as_bytes(), &self.cfg);
        Ok(String::from_utf8(minified)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!doctype html>\n<html>\n  <head>\n    <title>Hi</title>\n  </head>\n  <body>\n    <!-- note -->\n    <p>Hello,   world</p>\n  </body>\n</html>\n";

    #[test]
    fn collapses_whitespace_and_drops_comments() {
        let out = HtmlMinifier::new(false)
            .transform(PAGE.to_string())
            .expect("minify");

        assert!(out.len() < PAGE.len());
        assert!(!out.contains("note"));
        assert!(out.contains("<head>"));
        assert!(out.contains("Hello, world"));
    }

    #[test]
    fn comments_survive_when_configured() {
        let out = HtmlMinifier::new(true)
            .transform(PAGE.to_string())
            .expect("minify");
        assert!(out.contains("note"));
    }

    #[test]
    fn minifying_twice_is_stable() {
        let minifier = HtmlMinifier::new(false);
        let once = minifier.transform(PAGE.to_string()).expect("minify");
        let twice = minifier.transform(once.clone()).expect("minify");
        assert_eq!(once, twice);
    }
}
