use std::{fs, path::Path, process::Command};

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("pagewright.toml");
    let contents = format!(
        r#"
[optimizer]
optimize_html = false
combine_css = false
combine_javascript = false
combine_google_fonts = false
dns_prefetch = false

[combine]
asset_root = "{root}"
output_dir = "{out}"

[dns_prefetch]
hosts = ["cdn.example.com"]
"#,
        root = dir.join("public").display(),
        out = dir.join("out").display(),
    );
    fs::write(&config, contents).expect("write config");
    config
}

fn pagewright() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pagewright"))
}

#[test]
fn optimize_writes_result_and_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let page = dir.path().join("page.html");
    fs::write(&page, "<html><head><title>x</title></head><body></body></html>").expect("write page");
    let output = dir.path().join("out.html");

    let result = pagewright()
        .arg("--config-file")
        .arg(&config)
        .arg("optimize")
        .args(["--dns-prefetch", "true", "--report", "-o"])
        .arg(&output)
        .arg(&page)
        .output()
        .expect("run pagewright");

    assert!(result.status.success(), "stderr: {}", String::from_utf8_lossy(&result.stderr));
    let html = fs::read_to_string(&output).expect("read output");
    assert_eq!(
        html,
        "<html><head><link rel=\"dns-prefetch\" href=\"//cdn.example.com\"><title>x</title></head><body></body></html>"
    );

    let stderr = String::from_utf8_lossy(&result.stderr);
    let report = stderr
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json report on stderr");
    let report: serde_json::Value = serde_json::from_str(report).expect("report json");
    assert_eq!(report["amp"], false);
    assert_eq!(report["applied"], serde_json::json!(["dns_prefetch"]));
}

#[test]
fn optimize_leaves_amp_pages_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());
    let page = dir.path().join("amp.html");
    let amp = "<html amp lang=\"en\"><head>  <title>x</title>  </head></html>";
    fs::write(&page, amp).expect("write page");

    let result = pagewright()
        .arg("--config-file")
        .arg(&config)
        .arg("optimize")
        .args(["--optimize-html", "true", "--dns-prefetch", "true"])
        .arg(&page)
        .output()
        .expect("run pagewright");

    assert!(result.status.success());
    assert_eq!(String::from_utf8_lossy(&result.stdout), amp);
}

#[test]
fn missing_input_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path());

    let result = pagewright()
        .arg("--config-file")
        .arg(&config)
        .arg("optimize")
        .arg(dir.path().join("missing.html"))
        .output()
        .expect("run pagewright");

    assert!(!result.status.success());
}
