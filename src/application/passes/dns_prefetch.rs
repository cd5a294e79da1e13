//! DNS prefetch hint injection.

use std::{cell::RefCell, collections::HashSet, rc::Rc};

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};

use super::{escape_attribute, has_token};
use crate::application::optimizer::{Transform, TransformError};

pub struct DnsPrefetch {
    hosts: Vec<String>,
}

impl DnsPrefetch {
    pub fn new(hosts: &[String]) -> Self {
        let mut normalized: Vec<String> = Vec::with_capacity(hosts.len());
        for host in hosts.iter().filter_map(|host| normalize_host(host)) {
            if !normalized.contains(&host) {
                normalized.push(host);
            }
        }
        Self { hosts: normalized }
    }

    fn declared_hosts(html: &str) -> Result<HashSet<String>, TransformError> {
        let declared = Rc::new(RefCell::new(HashSet::new()));

        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("link[href]", {
                    let declared = Rc::clone(&declared);
                    move |el| {
                        let is_prefetch = el
                            .get_attribute("rel")
                            .is_some_and(|rel| has_token(&rel, "dns-prefetch"));
                        if is_prefetch
                            && let Some(host) =
                                el.get_attribute("href").and_then(|href| normalize_host(&href))
                        {
                            declared.borrow_mut().insert(host);
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )?;

        Ok(declared.take())
    }
}

impl Transform for DnsPrefetch {
    fn transform(&self, html: String) -> Result<String, TransformError> {
        if self.hosts.is_empty() {
            return Ok(html);
        }

        let declared = Self::declared_hosts(&html)?;
        let hints: String = self
            .hosts
            .iter()
            .filter(|host| !declared.contains(*host))
            .map(|host| {
                format!(
                    r#"<link rel="dns-prefetch" href="//{}">"#,
                    escape_attribute(host)
                )
            })
            .collect();
        if hints.is_empty() {
            return Ok(html);
        }

        let injected = Rc::new(RefCell::new(false));
        let rewritten = rewrite_str(
            &html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("head", {
                    let injected = Rc::clone(&injected);
                    move |el| {
                        let mut injected = injected.borrow_mut();
                        if !*injected {
                            el.prepend(&hints, ContentType::Html);
                            *injected = true;
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )?;

        Ok(rewritten)
    }
}

/// Reduce a configured host or prefetch href to a bare lowercase host name.
fn normalize_host(value: &str) -> Option<String> {
    let value = value.trim();
    let without_scheme = value
        .split_once("://")
        .map_or(value, |(_, rest)| rest)
        .trim_start_matches("//");
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn injects_hints_at_top_of_head() {
        let pass = DnsPrefetch::new(&hosts(&["https://cdn.example.com/", "fonts.gstatic.com"]));
        let html = "<html><head><title>x</title></head><body></body></html>";

        let out = pass.transform(html.to_string()).expect("prefetch");

        assert_eq!(
            out,
            concat!(
                "<html><head>",
                r#"<link rel="dns-prefetch" href="//cdn.example.com">"#,
                r#"<link rel="dns-prefetch" href="//fonts.gstatic.com">"#,
                "<title>x</title></head><body></body></html>"
            )
        );
    }

    #[test]
    fn already_declared_hosts_are_not_repeated() {
        let pass = DnsPrefetch::new(&hosts(&["cdn.example.com", "CDN.example.com"]));
        let html = r#"<html><head><link rel="dns-prefetch" href="//cdn.example.com"></head></html>"#;

        let out = pass.transform(html.to_string()).expect("prefetch");

        assert_eq!(out, html);
    }

    #[test]
    fn no_head_or_no_hosts_is_a_no_op() {
        let html = "<p>fragment</p>";
        let pass = DnsPrefetch::new(&hosts(&["cdn.example.com"]));
        assert_eq!(pass.transform(html.to_string()).expect("prefetch"), html);

        let empty = DnsPrefetch::new(&[]);
        let page = "<html><head></head></html>";
        assert_eq!(empty.transform(page.to_string()).expect("prefetch"), page);
    }

    #[test]
    fn normalize_host_strips_scheme_and_path() {
        assert_eq!(normalize_host("//Example.com/x").as_deref(), Some("example.com"));
        assert_eq!(normalize_host("http://a.b:8080/").as_deref(), Some("a.b:8080"));
        assert_eq!(normalize_host("  "), None);
    }
}
