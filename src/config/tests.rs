use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.optimizer.combine_css = Some(true);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        passes: PassOverrides {
            combine_css: Some(false),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(!settings.optimizer.combine_css);
}

#[test]
fn passes_default_to_disabled_without_configuration() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(!settings.optimizer.optimize_html);
    assert!(!settings.optimizer.combine_css);
    assert!(!settings.optimizer.combine_javascript);
    assert!(!settings.optimizer.combine_google_fonts);
    assert!(!settings.optimizer.dns_prefetch);
    assert_eq!(
        settings.optimizer.max_body_bytes.get() as u64,
        DEFAULT_MAX_BODY_BYTES
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_body_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.optimizer.max_body_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero limit");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "optimizer.max_body_bytes",
            ..
        }
    ));
}

#[test]
fn upstream_requires_http_scheme() {
    let mut raw = RawSettings::default();
    raw.upstream.url = Some("ftp://origin.test".to_string());

    let err = Settings::from_raw(raw).expect_err("bad scheme");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "upstream.url",
            ..
        }
    ));
}

#[test]
fn public_prefix_is_normalized() {
    let mut raw = RawSettings::default();
    raw.combine.public_prefix = Some("/assets/combined/".to_string());
    raw.combine.site_host = Some(" Example.COM ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.combine.public_prefix, "/assets/combined");
    assert_eq!(settings.combine.site_host.as_deref(), Some("example.com"));

    let mut relative = RawSettings::default();
    relative.combine.public_prefix = Some("combined".to_string());
    assert!(Settings::from_raw(relative).is_err());
}

#[test]
fn auth_prefixes_default_to_wordpress_session() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(
        settings.auth.session_cookie_prefixes,
        vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()]
    );

    let mut raw = RawSettings::default();
    raw.auth.session_cookie_prefixes = Some(vec![" ".to_string(), "sid".to_string()]);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.session_cookie_prefixes, vec!["sid".to_string()]);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pagewright"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_optimize_arguments() {
    let args = CliArgs::parse_from([
        "pagewright",
        "optimize",
        "--combine-css",
        "true",
        "--optimize-html",
        "off",
        "--asset-root",
        "/srv/www",
        "-o",
        "/tmp/out.html",
        "--report",
        "page.html",
    ]);

    match args.command.expect("optimize command") {
        Command::Optimize(optimize) => {
            assert_eq!(optimize.passes.combine_css, Some(true));
            assert_eq!(optimize.passes.optimize_html, Some(false));
            assert_eq!(optimize.passes.dns_prefetch, None);
            assert_eq!(
                optimize.asset_root.as_deref(),
                Some(std::path::Path::new("/srv/www"))
            );
            assert_eq!(
                optimize.output.as_deref(),
                Some(std::path::Path::new("/tmp/out.html"))
            );
            assert!(optimize.report);
            assert_eq!(optimize.file, std::path::Path::new("page.html"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn optimize_overrides_apply_asset_root_and_passes() {
    let args = CliArgs::parse_from([
        "pagewright",
        "optimize",
        "--dns-prefetch",
        "yes",
        "--asset-root",
        "/srv/www",
        "page.html",
    ]);
    let Some(Command::Optimize(optimize)) = args.command else {
        panic!("wrong command parsed");
    };

    let mut raw = RawSettings::default();
    raw.apply_optimize_overrides(&optimize);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.optimizer.dns_prefetch);
    assert_eq!(settings.combine.asset_root, PathBuf::from("/srv/www"));
}

#[test]
fn bundle_max_age_defaults_and_zero_disables() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(
        settings.combine.bundle_max_age,
        Some(Duration::from_secs(30 * 24 * 60 * 60))
    );

    let mut raw = RawSettings::default();
    raw.combine.bundle_max_age_days = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.combine.bundle_max_age, None);
}
