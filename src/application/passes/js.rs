//! Script combination.
//!
//! Classic, render-blocking `<script src>` tags pointing at local files are
//! concatenated into bundles. Only scripts adjacent in execution order are
//! merged; any other script, style block or stylesheet in between starts a new
//! bundle.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use lol_html::{RewriteStrSettings, element, html_content::Element, rewrite_str};
use tracing::warn;

use super::{
    Bundle, Candidate, JAVASCRIPT_TYPES, ORDERED_ELEMENTS, Runs, escape_attribute,
    interrupts_order, is_excluded, local_path, swap_in_bundles,
};
use crate::application::{
    assets::{AssetStore, BundleKind},
    optimizer::{Transform, TransformError},
};

pub struct JsCombinator {
    store: Arc<dyn AssetStore>,
    site_host: Option<String>,
    exclude: Vec<String>,
}

impl JsCombinator {
    pub fn new(store: Arc<dyn AssetStore>, site_host: Option<String>, exclude: Vec<String>) -> Self {
        Self {
            store,
            site_host,
            exclude,
        }
    }

    fn candidate_path(&self, el: &Element<'_, '_>) -> Option<String> {
        if el.tag_name() != "script" {
            return None;
        }

        // Deferred and module scripts have their own execution order.
        let deferred = ["async", "defer", "nomodule"]
            .iter()
            .any(|name| el.has_attribute(name));
        let classic = el.get_attribute("type").is_none_or(|kind| {
            let kind = kind.trim();
            kind.is_empty()
                || JAVASCRIPT_TYPES
                    .iter()
                    .any(|known| kind.eq_ignore_ascii_case(known))
        });
        if deferred || !classic {
            return None;
        }

        let src = el.get_attribute("src")?;
        if is_excluded(&src, &self.exclude) {
            return None;
        }
        local_path(&src, self.site_host.as_deref(), "js")
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

    /// Concatenate one run, or `None` when a file in it cannot be read.
    fn bundle(&self, run: Vec<Candidate>) -> Result<Option<Bundle>, TransformError> {
        let mut sources = Vec::with_capacity(run.len());
        for candidate in &run {
            match self.store.read(&candidate.path) {
                Ok(source) => sources.push(source.trim_end().to_string()),
                Err(err) => {
                    warn!(
                        target = "pagewright::passes::js",
                        path = %candidate.path,
                        error = %err,
                        "script unavailable, leaving run uncombined"
                    );
                    return Ok(None);
                }
            }
        }

        let mut contents = sources.join(";\n");
        contents.push_str(";\n");

        let src = self.store.store_bundle(BundleKind::Js, &contents)?;
        let tag = format!(r#"<script src="{}"></script>"#, escape_attribute(&src));
        Ok(Some(Bundle { run, tag }))
    }
}

impl Transform for JsCombinator {
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
