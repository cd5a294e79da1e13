//! Stylesheet combination.
//!
//! Adjacent local `<link rel="stylesheet">` tags are merged into a bundle that
//! is linked in place of the first one. A `<style>` block, a script or a
//! stylesheet that cannot be merged ends the run, so the cascade order of the
//! page is unchanged.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use lol_html::{RewriteStrSettings, element, html_content::Element, rewrite_str};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;
use url::Url;

use super::{
    Bundle, Candidate, ORDERED_ELEMENTS, Runs, escape_attribute, has_token, interrupts_order,
    is_excluded, local_path, swap_in_bundles,
};
use crate::application::{
    assets::{AssetStore, BundleKind},
    optimizer::{Transform, TransformError},
};

static CSS_URL: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s][^)\s]*))\s*\)"#).ok()
});
static CHARSET_RULE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?i)@charset\s+[^;]+;"#).ok());

pub struct CssCombinator {
    store: Arc<dyn AssetStore>,
    site_host: Option<String>,
    exclude: Vec<String>,
}

impl CssCombinator {
    pub fn new(store: Arc<dyn AssetStore>, site_host: Option<String>, exclude: Vec<String>) -> Self {
        Self {
            store,
            site_host,
            exclude,
        }
    }

    fn candidate_path(&self, el: &Element<'_, '_>) -> Option<String> {
        if el.tag_name() != "link" {
            return None;
        }

        let is_stylesheet = el
            .get_attribute("rel")
            .is_some_and(|rel| has_token(&rel, "stylesheet"));
        let all_media = el.get_attribute("media").is_none_or(|media| {
            let media = media.trim();
            media.is_empty() || media.eq_ignore_ascii_case("all")
        });
        let plain_type = el
            .get_attribute("type")
            .is_none_or(|kind| kind.trim().eq_ignore_ascii_case("text/css"));
        if !is_stylesheet || !all_media || !plain_type {
            return None;
        }

        let href = el.get_attribute("href")?;
        if is_excluded(&href, &self.exclude) {
            return None;
        }
        local_path(&href, self.site_host.as_deref(), "css")
    }

    fn collect(&self, html: &str) -> Result<Vec<Vec<Candidate>>, TransformError> {
        let runs = Rc::new(RefCell::new(Runs::default()));
        let ordinal = Rc::new(RefCell::new(0usize));

        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(ORDERED_ELEMENTS, {
                    let runs = Rc::clone(&runs);
                    let ordinal = Rc::clone(&ordinal);
                    move |el| {
                        let index = {
                            let mut ordinal = ordinal.borrow_mut();
                            let index = *ordinal;
                            *ordinal += 1;
                            index
                        };

                        if let Some(path) = self.candidate_path(el) {
                            runs.borrow_mut().push(Candidate {
                                ordinal: index,
                                path,
                            });
                        } else if interrupts_order(el) {
                            runs.borrow_mut().interrupt();
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )?;

        Ok(runs.take().finish())
    }

    /// Merge one run, or `None` when a sheet in it cannot be read.
    fn bundle(&self, run: Vec<Candidate>) -> Result<Option<Bundle>, TransformError> {
        let mut contents = String::new();
        for candidate in &run {
            let sheet = match self.store.read(&candidate.path) {
                Ok(sheet) => sheet,
                Err(err) => {
                    warn!(
                        target = "pagewright::passes::css",
                        path = %candidate.path,
                        error = %err,
                        "stylesheet unavailable, leaving run uncombined"
                    );
                    return Ok(None);
                }
            };
            contents.push_str(&relocate_urls(&strip_charset(&sheet), &candidate.path));
            contents.push('\n');
        }

        let href = self.store.store_bundle(BundleKind::Css, &contents)?;
        let tag = format!(
            r#"<link rel="stylesheet" href="{}" media="all">"#,
            escape_attribute(&href)
        );
        Ok(Some(Bundle { run, tag }))
    }
}

impl Transform for CssCombinator {
    fn transform(&self, html: String) -> Result<String, TransformError> {
        let mut bundles = Vec::new();
        for run in self.collect(&html)? {
            if let Some(bundle) = self.bundle(run)? {
                bundles.push(bundle);
            }
        }
        if bundles.is_empty() {
            return Ok(html);
        }

        swap_in_bundles(&html, ORDERED_ELEMENTS, &bundles)
    }
}

fn strip_charset(sheet: &str) -> String {
    match CHARSET_RULE.as_ref() {
        Some(regex) => regex.replace_all(sheet, "").into_owned(),
        None => sheet.to_string(),
    }
}

/// Rewrite relative `url(...)` references so they resolve from any location.
fn relocate_urls(sheet: &str, sheet_path: &str) -> String {
    let Some(regex) = CSS_URL.as_ref() else {
        return sheet.to_string();
    };

    regex
        .replace_all(sheet, |caps: &Captures<'_>| {
            let reference = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match relocate(reference, sheet_path) {
                Some(resolved) => format!("url(\"{resolved}\")"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn relocate(reference: &str, sheet_path: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty()
        || reference.starts_with('/')
        || reference.starts_with('#')
        || reference.contains(':')
    {
        return None;
    }

    let base = Url::parse("http://assets.invalid").ok()?.join(sheet_path).ok()?;
    let resolved = base.join(reference).ok()?;

    let mut out = resolved.path().to_string();
    if let Some(query) = resolved.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = resolved.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    Some(out)
}
