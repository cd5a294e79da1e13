use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use http_body_util::BodyExt;
use pagewright::{
    application::{
        optimizer::{Optimizer, PassToggles, Passes, Transform, TransformError},
        passes::{PassConfig, build_passes},
    },
    domain::pass::Pass,
    infra::{
        assets::FsAssetStore,
        http::{OptimizerState, PageOutcome, SessionCookieAuth, optimize_responses},
    },
};
use tower::ServiceExt;

const PAGE: &str = "<html><head><title>t</title></head><body><p>hello</p></body></html>";

/// Passes that tag the page and count every invocation.
fn counting_passes(calls: Arc<AtomicUsize>) -> Passes {
    let tag = |pass: Pass, calls: Arc<AtomicUsize>| -> Arc<dyn Transform> {
        Arc::new(move |html: String| -> Result<String, TransformError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{html}<!--{}-->", pass.as_str()))
        })
    };
    Passes {
        minify_html: tag(Pass::MinifyHtml, calls.clone()),
        combine_css: tag(Pass::CombineCss, calls.clone()),
        combine_js: tag(Pass::CombineJs, calls.clone()),
        combine_fonts: tag(Pass::CombineFonts, calls.clone()),
        dns_prefetch: tag(Pass::DnsPrefetch, calls),
    }
}

fn app(optimizer: Optimizer, body: &'static str) -> Router {
    let state = OptimizerState {
        optimizer: Arc::new(optimizer),
        auth: Arc::new(SessionCookieAuth::new(vec![
            "wordpress_logged_in_".to_string(),
        ])),
        max_body_bytes: 64 * 1024,
    };

    Router::new()
        .route("/", get(move || async move { Html(body) }))
        .route(
            "/data.json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{\"a\":1}") }),
        )
        .route(
            "/tagged",
            get(|| async {
                let mut response = Html(PAGE).into_response();
                response
                    .headers_mut()
                    .insert(header::ETAG, HeaderValue::from_static("\"v1\""));
                response
            }),
        )
        .layer(middleware::from_fn_with_state(state, optimize_responses))
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn get_request(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn anonymous_pages_pass_through_enabled_passes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let flags = PassToggles::default()
        .with(Pass::MinifyHtml, true)
        .with(Pass::DnsPrefetch, true);
    let optimizer = Optimizer::new(Arc::new(flags), counting_passes(calls.clone()));

    let response = app(optimizer, PAGE)
        .oneshot(get_request("/"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    assert_eq!(
        response.extensions().get::<PageOutcome>(),
        Some(&PageOutcome::Optimized {
            applied: vec![Pass::MinifyHtml, Pass::DnsPrefetch],
        })
    );
    assert_eq!(
        body_text(response).await,
        format!("{PAGE}<!--minify_html--><!--dns_prefetch-->")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn authenticated_visitors_never_reach_the_optimizer() {
    let calls = Arc::new(AtomicUsize::new(0));
    let optimizer = Optimizer::new(
        Arc::new(PassToggles::all()),
        counting_passes(calls.clone()),
    );
    let router = app(optimizer, PAGE);

    let request = Request::builder()
        .uri("/")
        .header(header::COOKIE, "wordpress_logged_in_abc=editor")
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(
        response.extensions().get::<PageOutcome>(),
        Some(&PageOutcome::Passed {
            reason: "authenticated"
        })
    );
    assert_eq!(body_text(response).await, PAGE);

    let request = Request::builder()
        .uri("/")
        .header(
            header::COOKIE,
            HeaderValue::from_bytes("city=Kraków; wordpress_logged_in_abc=editor".as_bytes())
                .expect("cookie header"),
        )
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(body_text(response).await, PAGE);

    let request = Request::builder()
        .uri("/")
        .header(header::AUTHORIZATION, "Bearer token")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(request).await.expect("response");
    assert_eq!(body_text(response).await, PAGE);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_pages_are_emitted_once_untouched() {
    let calls = Arc::new(AtomicUsize::new(0));
    let optimizer = Optimizer::new(
        Arc::new(PassToggles::all()),
        counting_passes(calls.clone()),
    );

    let response = app(optimizer, "")
        .oneshot(get_request("/"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn amp_pages_are_returned_unchanged() {
    let calls = Arc::new(AtomicUsize::new(0));
    let optimizer = Optimizer::new(
        Arc::new(PassToggles::all()),
        counting_passes(calls.clone()),
    );
    let amp = "<!doctype html><html ⚡ lang=\"en\"><head><style>a{}</style></head></html>";

    let response = app(optimizer, amp)
        .oneshot(get_request("/"))
        .await
        .expect("response");

    assert_eq!(body_text(response).await, amp);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_html_and_head_requests_are_not_captured() {
    let calls = Arc::new(AtomicUsize::new(0));
    let optimizer = Optimizer::new(
        Arc::new(PassToggles::all()),
        counting_passes(calls.clone()),
    );
    let router = app(optimizer, PAGE);

    let json = router
        .clone()
        .oneshot(get_request("/data.json"))
        .await
        .expect("response");
    assert_eq!(body_text(json).await, "{\"a\":1}");

    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(head).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rewritten_pages_drop_stale_validators() {
    let calls = Arc::new(AtomicUsize::new(0));
    let optimizer = Optimizer::new(
        Arc::new(PassToggles::only(Pass::CombineFonts)),
        counting_passes(calls.clone()),
    );

    let response = app(optimizer, PAGE)
        .oneshot(get_request("/tagged"))
        .await
        .expect("response");

    assert!(response.headers().get(header::ETAG).is_none());
    assert_eq!(
        body_text(response).await,
        format!("{PAGE}<!--combine_fonts-->")
    );
}

#[tokio::test]
async fn failing_pass_becomes_server_error() {
    let mut passes = counting_passes(Arc::new(AtomicUsize::new(0)));
    passes.combine_js = Arc::new(|_: String| -> Result<String, TransformError> {
        Err(TransformError::rewrite("broken markup"))
    });
    let optimizer = Optimizer::new(Arc::new(PassToggles::only(Pass::CombineJs)), passes);

    let response = app(optimizer, PAGE)
        .oneshot(get_request("/"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn only_css_combination_touches_only_stylesheets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("public");
    std::fs::create_dir_all(root.join("css")).expect("mkdir");
    std::fs::write(root.join("css/a.css"), "body{color:red}").expect("write a");
    std::fs::write(root.join("css/b.css"), "p{margin:0}").expect("write b");

    let store = Arc::new(
        FsAssetStore::new(root, dir.path().join("out"), "/_pagewright/combined")
            .expect("store"),
    );
    let passes = build_passes(&PassConfig::default(), store);
    let optimizer = Optimizer::new(Arc::new(PassToggles::only(Pass::CombineCss)), passes);

    let page = concat!(
        "<html><head>",
        "<link rel=\"stylesheet\" href=\"/css/a.css\">",
        "<link rel=\"stylesheet\" href=\"/css/b.css\">",
        "<style>a{}</style>",
        "<script src=\"/js/one.js\"></script>",
        "<script src=\"/js/two.js\"></script>",
        "</head><body>  <p>x</p>  </body></html>"
    );

    let response = app(optimizer, page)
        .oneshot(get_request("/"))
        .await
        .expect("response");
    let html = body_text(response).await;

    assert_eq!(html.matches("rel=\"stylesheet\"").count(), 1);
    assert!(html.contains("href=\"/_pagewright/combined/"));
    assert!(html.contains("<style>a{}</style>"));
    assert!(html.contains("<script src=\"/js/one.js\"></script><script src=\"/js/two.js\"></script>"));
    assert!(html.contains("<body>  <p>x</p>  </body>"));
}
