//! Concrete optimization passes plugged into the [`Optimizer`](super::optimizer::Optimizer).

mod css;
mod dns_prefetch;
mod fonts;
mod js;
mod minify;

use std::{cell::Cell, collections::HashMap, rc::Rc, sync::Arc};

use lol_html::{
    RewriteStrSettings, element,
    html_content::{ContentType, Element},
    rewrite_str,
};
use url::Url;

pub use css::CssCombinator;
pub use dns_prefetch::DnsPrefetch;
pub use fonts::FontsCombinator;
pub use js::JsCombinator;
pub use minify::HtmlMinifier;

use super::{
    assets::AssetStore,
    optimizer::{Passes, TransformError},
};

/// Options the passes need beyond their on/off flag.
#[derive(Debug, Clone, Default)]
pub struct PassConfig {
    pub keep_comments: bool,
    pub site_host: Option<String>,
    pub css_exclude: Vec<String>,
    pub js_exclude: Vec<String>,
    pub prefetch_hosts: Vec<String>,
}

impl From<&crate::config::Settings> for PassConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            keep_comments: settings.minify.keep_comments,
            site_host: settings.combine.site_host.clone(),
            css_exclude: settings.combine.css_exclude.clone(),
            js_exclude: settings.combine.js_exclude.clone(),
            prefetch_hosts: settings.dns_prefetch.hosts.clone(),
        }
    }
}

/// Wire up the stock passes.
pub fn build_passes(config: &PassConfig, store: Arc<dyn AssetStore>) -> Passes {
    Passes {
        minify_html: Arc::new(HtmlMinifier::new(config.keep_comments)),
        combine_css: Arc::new(CssCombinator::new(
            store.clone(),
            config.site_host.clone(),
            config.css_exclude.clone(),
        )),
        combine_js: Arc::new(JsCombinator::new(
            store,
            config.site_host.clone(),
            config.js_exclude.clone(),
        )),
        combine_fonts: Arc::new(FontsCombinator),
        dns_prefetch: Arc::new(DnsPrefetch::new(&config.prefetch_hosts)),
    }
}

/// Elements whose relative order the combinators preserve. A bundle only ever
/// replaces a run of candidates with none of these in between.
pub(crate) const ORDERED_ELEMENTS: &str = "script, style, link[href]";

pub(crate) const JAVASCRIPT_TYPES: &[&str] = &[
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "text/ecmascript",
];

/// An element selected for combination, identified by its position among all
/// elements matched by [`ORDERED_ELEMENTS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) ordinal: usize,
    pub(crate) path: String,
}

/// Groups candidates into runs that are adjacent in document order.
#[derive(Debug, Default)]
pub(crate) struct Runs {
    closed: Vec<Vec<Candidate>>,
    open: Vec<Candidate>,
}

impl Runs {
    pub(crate) fn push(&mut self, candidate: Candidate) {
        self.open.push(candidate);
    }

    /// An element that is not a candidate but executes or styles the page.
    pub(crate) fn interrupt(&mut self) {
        if !self.open.is_empty() {
            self.closed.push(std::mem::take(&mut self.open));
        }
    }

    /// Runs worth bundling, in document order.
    pub(crate) fn finish(mut self) -> Vec<Vec<Candidate>> {
        self.interrupt();
        self.closed.retain(|run| run.len() > 1);
        self.closed
    }
}

/// True for elements a combinator must not move candidates across: inline or
/// skipped scripts, `<style>` blocks and stylesheet links. Data blocks such as
/// `application/ld+json` and non-stylesheet links do not count.
pub(crate) fn interrupts_order(el: &Element<'_, '_>) -> bool {
    match el.tag_name().as_str() {
        "style" => true,
        "link" => el
            .get_attribute("rel")
            .is_some_and(|rel| has_token(&rel, "stylesheet")),
        "script" => el.get_attribute("type").is_none_or(|kind| {
            let kind = kind.trim();
            kind.is_empty()
                || kind.eq_ignore_ascii_case("module")
                || JAVASCRIPT_TYPES
                    .iter()
                    .any(|known| kind.eq_ignore_ascii_case(known))
        }),
        _ => false,
    }
}

/// A run of candidates and the tag that takes its place.
#[derive(Debug, Clone)]
pub(crate) struct Bundle {
    pub(crate) run: Vec<Candidate>,
    pub(crate) tag: String,
}

/// Replace the first candidate of each run with its bundle tag and drop the
/// rest of the run.
///
/// `selector` must be the selector used to number the candidates.
pub(crate) fn swap_in_bundles(
    html: &str,
    selector: &str,
    bundles: &[Bundle],
) -> Result<String, TransformError> {
    let mut actions: HashMap<usize, Option<&str>> = HashMap::new();
    for bundle in bundles {
        for (position, candidate) in bundle.run.iter().enumerate() {
            let replacement = (position == 0).then_some(bundle.tag.as_str());
            actions.insert(candidate.ordinal, replacement);
        }
    }
    if actions.is_empty() {
        return Ok(html.to_string());
    }

    let counter = Rc::new(Cell::new(0usize));
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, {
                let counter = Rc::clone(&counter);
                move |el| {
                    let index = counter.get();
                    counter.set(index + 1);
                    match actions.get(&index) {
                        Some(Some(tag)) => el.replace(tag, ContentType::Html),
                        Some(None) => el.remove(),
                        None => {}
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(rewritten)
}

/// Replace the first candidate with `bundle_tag` and drop the remaining ones.
pub(crate) fn swap_in_bundle(
    html: &str,
    selector: &str,
    candidates: &[Candidate],
    bundle_tag: &str,
) -> Result<String, TransformError> {
    let bundle = Bundle {
        run: candidates.to_vec(),
        tag: bundle_tag.to_string(),
    };
    swap_in_bundles(html, selector, std::slice::from_ref(&bundle))
}

/// Map an asset reference to a root-relative path when it points at this site.
///
/// Accepts root-relative references and absolute or protocol-relative URLs on
/// `site_host`. Document-relative references are not resolved. Query strings
/// and fragments are dropped; the path must end with `.{extension}`.
pub(crate) fn local_path(reference: &str, site_host: Option<&str>, extension: &str) -> Option<String> {
    let reference = decode_ampersands(reference.trim());

    let path = if reference.starts_with("//")
        || reference.starts_with("http://")
        || reference.starts_with("https://")
    {
        let absolute = if reference.starts_with("//") {
            format!("https:{reference}")
        } else {
            reference.clone()
        };
        let url = Url::parse(&absolute).ok()?;
        let host = url.host_str()?;
        if !site_host.is_some_and(|site| site.eq_ignore_ascii_case(host)) {
            return None;
        }
        url.path().to_string()
    } else if reference.starts_with('/') {
        let end = reference.find(['?', '#']).unwrap_or(reference.len());
        reference[..end].to_string()
    } else {
        return None;
    };

    let suffix = format!(".{extension}");
    path.to_ascii_lowercase().ends_with(&suffix).then_some(path)
}

/// True when `reference` contains any of the exclusion substrings.
pub(crate) fn is_excluded(reference: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| reference.contains(pattern.as_str()))
}

/// True when the whitespace-separated token list contains `token`.
pub(crate) fn has_token(list: &str, token: &str) -> bool {
    list.split_ascii_whitespace()
        .any(|candidate| candidate.eq_ignore_ascii_case(token))
}

/// Raw attribute values keep their entity references; only `&amp;` matters for URLs.
pub(crate) fn decode_ampersands(value: &str) -> String {
    value.replace("&amp;", "&")
}

pub(crate) fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
