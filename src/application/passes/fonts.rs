//! Google Fonts request merging.
//!
//! Every `fonts.googleapis.com/css` stylesheet link is folded into one request
//! carrying the union of the requested families and subsets. Links with any
//! other query parameter (`text`, `effect`, a `display` other than `swap`) ask
//! for something the merged request cannot express and are left as they are.

use std::{cell::RefCell, rc::Rc};

use lol_html::{RewriteStrSettings, element, rewrite_str};
use url::{Url, form_urlencoded};

use super::{Candidate, decode_ampersands, escape_attribute, has_token, swap_in_bundle};
use crate::application::optimizer::{Transform, TransformError};

const SELECTOR: &str = "link[href]";
const FONTS_HOST: &str = "fonts.googleapis.com";
const FONTS_ENDPOINT: &str = "https://fonts.googleapis.com/css";

#[derive(Debug, Default)]
struct FontRequest {
    candidates: Vec<Candidate>,
    families: Vec<String>,
    subsets: Vec<String>,
}

impl FontRequest {
    fn absorb(&mut self, ordinal: usize, url: &Url) {
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "family" => push_unique(&mut self.families, value.split('|')),
                "subset" => push_unique(&mut self.subsets, value.split(',')),
                _ => {}
            }
        }
        self.candidates.push(Candidate {
            ordinal,
            path: url.path().to_string(),
        });
    }

    fn href(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("family", &self.families.join("|"));
        if !self.subsets.is_empty() {
            query.append_pair("subset", &self.subsets.join(","));
        }
        query.append_pair("display", "swap");
        format!("{FONTS_ENDPOINT}?{}", query.finish())
    }
}

fn push_unique<'a>(into: &mut Vec<String>, values: impl Iterator<Item = &'a str>) {
    for value in values.map(str::trim).filter(|value| !value.is_empty()) {
        if !into.iter().any(|existing| existing == value) {
            into.push(value.to_string());
        }
    }
}

/// True when the request only uses parameters the merged link reproduces.
fn is_mergeable(url: &Url) -> bool {
    url.query_pairs()
        .all(|(key, value)| match key.as_ref() {
            "family" | "subset" => true,
            "display" => value == "swap",
            _ => false,
        })
}

fn parse_fonts_url(href: &str) -> Option<Url> {
    let href = decode_ampersands(href.trim());
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href
    };
    let url = Url::parse(&absolute).ok()?;
    let on_fonts_host = url
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(FONTS_HOST));
    (on_fonts_host && url.path() == "/css" && is_mergeable(&url)).then_some(url)
}

pub struct FontsCombinator;

impl FontsCombinator {
    fn collect(html: &str) -> Result<FontRequest, TransformError> {
        let request = Rc::new(RefCell::new(FontRequest::default()));
        let ordinal = Rc::new(RefCell::new(0usize));

        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(SELECTOR, {
                    let request = Rc::clone(&request);
                    let ordinal = Rc::clone(&ordinal);
                    move |el| {
                        let index = {
                            let mut ordinal = ordinal.borrow_mut();
                            let index = *ordinal;
                            *ordinal += 1;
                            index
                        };

                        let is_stylesheet = el
                            .get_attribute("rel")
                            .is_some_and(|rel| has_token(&rel, "stylesheet"));
                        if is_stylesheet
                            && let Some(url) = el
                                .get_attribute("href")
                                .and_then(|href| parse_fonts_url(&href))
                        {
                            request.borrow_mut().absorb(index, &url);
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )?;

        Ok(request.take())
    }
}

impl Transform for FontsCombinator {
    fn transform(&self, html: String) -> Result<String, TransformError> {
        let request = Self::collect(&html)?;
        if request.candidates.len() < 2 || request.families.is_empty() {
            return Ok(html);
        }

        let tag = format!(
            r#"<link rel="stylesheet" href="{}" type="text/css">"#,
            escape_attribute(&request.href())
        );
        swap_in_bundle(&html, SELECTOR, &request.candidates, &tag)
    }
}
