//! Visitor authentication check used to keep personalised pages out of the optimizer.

use axum::http::{HeaderMap, header};

/// Answers whether the current visitor is signed in.
pub trait VisitorAuth: Send + Sync {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool;
}

/// Treats a visitor as signed in when the request carries an `Authorization`
/// header or a cookie whose name starts with one of the session prefixes.
#[derive(Debug, Clone, Default)]
pub struct SessionCookieAuth {
    prefixes: Vec<String>,
}

impl SessionCookieAuth {
    pub fn new(prefixes: Vec<String>) -> Self {
        let prefixes = prefixes
            .into_iter()
            .filter(|prefix| !prefix.is_empty())
            .collect();
        Self { prefixes }
    }

    fn has_session_cookie(&self, headers: &HeaderMap) -> bool {
        if self.prefixes.is_empty() {
            return false;
        }

        // Cookie values may carry raw UTF-8; names are compared as bytes.
        headers
            .get_all(header::COOKIE)
            .iter()
            .flat_map(|value| value.as_bytes().split(|&byte| byte == b';'))
            .filter_map(|pair| {
                let end = pair.iter().position(|&byte| byte == b'=')?;
                Some(pair[..end].trim_ascii())
            })
            .any(|name| {
                self.prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_bytes()))
            })
    }
}

impl VisitorAuth for SessionCookieAuth {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(header::AUTHORIZATION) || self.has_session_cookie(headers)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn auth() -> SessionCookieAuth {
        SessionCookieAuth::new(vec!["wordpress_logged_in_".to_string()])
    }

    #[test]
    fn anonymous_visitor_is_not_authenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; wordpress_test_cookie=1"),
        );
        assert!(!auth().is_authenticated(&headers));
        assert!(!auth().is_authenticated(&HeaderMap::new()));
    }

    #[test]
    fn session_cookie_marks_visitor_authenticated() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("a=1; wordpress_logged_in_5f2e=admin%7C123"),
        );
        assert!(auth().is_authenticated(&headers));
    }

    #[test]
    fn authorization_header_marks_visitor_authenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(SessionCookieAuth::default().is_authenticated(&headers));
    }

    #[test]
    fn prefix_must_match_cookie_name_not_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("ref=wordpress_logged_in_x"),
        );
        assert!(!auth().is_authenticated(&headers));
    }

    #[test]
    fn non_ascii_cookie_does_not_hide_session() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_bytes("city=Kraków; wordpress_logged_in_abc=admin".as_bytes())
                .expect("header value"),
        );
        assert!(auth().is_authenticated(&headers));
    }
}
