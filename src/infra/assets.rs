//! Filesystem-backed site assets and combined bundle storage.

use std::{
    fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use axum::{
    body::Body,
    extract::{Path as PathParam, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use mime_guess::Mime;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::{
    assets::{AssetError, AssetStore, BundleKind},
    error::ErrorReport,
};

/// Hex characters of the content digest kept in bundle file names.
const BUNDLE_DIGEST_CHARS: usize = 16;

/// Reads assets below a document root and writes content-addressed bundles
/// into an output directory served under `public_prefix`.
#[derive(Debug)]
pub struct FsAssetStore {
    asset_root: PathBuf,
    output_dir: PathBuf,
    public_prefix: String,
}

impl FsAssetStore {
    /// Create the store, making sure the bundle directory exists.
    pub fn new(
        asset_root: PathBuf,
        output_dir: PathBuf,
        public_prefix: impl Into<String>,
    ) -> Result<Self, io::Error> {
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            asset_root,
            output_dir,
            public_prefix: public_prefix.into(),
        })
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Read a previously written bundle by file name.
    pub async fn read_bundle(&self, name: &str) -> Result<Bytes, AssetError> {
        let absolute = resolve(&self.output_dir, name)?;
        match tokio::fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(AssetError::NotFound {
                path: name.to_string(),
            }),
            Err(err) => Err(AssetError::Io(err)),
        }
    }

    /// Delete bundles whose modification time is older than `max_age`.
    ///
    /// Reusing a bundle refreshes its modification time, so only bundles no
    /// page has produced for `max_age` are removed. Returns how many were.
    pub fn prune_bundles(&self, max_age: Duration) -> Result<usize, io::Error> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let age = now
                .duration_since(metadata.modified()?)
                .unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        if removed > 0 {
            counter!("pagewright_bundle_pruned_total").increment(removed as u64);
        }
        Ok(removed)
    }
}

/// Prune the bundle directory once now and then every `interval`.
pub async fn prune_bundles_periodically(
    store: Arc<FsAssetStore>,
    max_age: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.prune_bundles(max_age)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(removed)) => debug!(
                target = "pagewright::infra::assets",
                removed,
                "stale bundles pruned"
            ),
            Ok(Err(err)) => warn!(
                target = "pagewright::infra::assets",
                error = %err,
                "failed to prune bundles"
            ),
            Err(err) => warn!(
                target = "pagewright::infra::assets",
                error = %err,
                "bundle pruning task failed"
            ),
        }
    }
}

impl AssetStore for FsAssetStore {
    fn read(&self, url_path: &str) -> Result<String, AssetError> {
        let absolute = resolve(&self.asset_root, url_path)?;
        let bytes = match fs::read(&absolute) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound {
                    path: url_path.to_string(),
                });
            }
            Err(err) => return Err(AssetError::Io(err)),
        };

        let mut text = String::from_utf8(bytes).map_err(|_| AssetError::Encoding {
            path: url_path.to_string(),
        })?;
        if text.starts_with('\u{feff}') {
            text.drain(..'\u{feff}'.len_utf8());
        }
        Ok(text)
    }

    fn store_bundle(&self, kind: BundleKind, contents: &str) -> Result<String, AssetError> {
        let digest = hex::encode(Sha256::digest(contents.as_bytes()));
        let name = format!("{}.{}", &digest[..BUNDLE_DIGEST_CHARS], kind.extension());
        let absolute = self.output_dir.join(&name);

        if !absolute.exists() {
            // Write-then-rename so concurrent requests never observe a partial bundle.
            let staging = self.output_dir.join(format!(".{}.tmp", Uuid::new_v4()));
            let mut file = fs::File::create(&staging)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            drop(file);
            if let Err(err) = fs::rename(&staging, &absolute) {
                let _ = fs::remove_file(&staging);
                return Err(AssetError::Io(err));
            }

            counter!("pagewright_bundle_written_total", "kind" => kind.extension()).increment(1);
            debug!(
                target = "pagewright::infra::assets",
                bundle = %name,
                bytes = contents.len(),
                "bundle written"
            );
        } else if let Err(err) = touch(&absolute) {
            debug!(
                target = "pagewright::infra::assets",
                bundle = %name,
                error = %err,
                "failed to refresh bundle timestamp"
            );
        }

        Ok(format!("{}/{}", self.public_prefix, name))
    }
}

fn touch(path: &Path) -> Result<(), io::Error> {
    fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

/// Join a URL-style path onto `root`, refusing anything that could escape it.
fn resolve(root: &Path, url_path: &str) -> Result<PathBuf, AssetError> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    let escapes = relative.as_os_str().is_empty()
        || relative.is_absolute()
        || relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        });
    if escapes {
        return Err(AssetError::InvalidPath {
            path: url_path.to_string(),
        });
    }

    Ok(root.join(relative))
}

/// Serve a combined bundle from the output directory.
pub async fn serve_bundle(
    State(store): State<Arc<FsAssetStore>>,
    PathParam(file): PathParam<String>,
) -> Response {
    let source = "infra::assets::serve_bundle";
    match store.read_bundle(&file).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            build_response(bytes, mime)
        }
        Err(AssetError::NotFound { .. }) => {
            let mut response = StatusCode::NOT_FOUND.into_response();
            ErrorReport::from_message(source, StatusCode::NOT_FOUND, "Bundle not found")
                .attach(&mut response);
            response
        }
        Err(err @ AssetError::InvalidPath { .. }) => {
            let mut response = StatusCode::BAD_REQUEST.into_response();
            ErrorReport::from_error(source, StatusCode::BAD_REQUEST, &err).attach(&mut response);
            response
        }
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(source, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}
