//! Asset access used by the combinator passes.

use thiserror::Error;

/// Errors raised while reading site assets or persisting bundles.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset path `{path}` is outside the asset root")]
    InvalidPath { path: String },
    #[error("asset `{path}` not found")]
    NotFound { path: String },
    #[error("asset `{path}` is not valid UTF-8")]
    Encoding { path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Kind of combined bundle; selects the file extension and content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Css,
    Js,
}

impl BundleKind {
    pub fn extension(self) -> &'static str {
        match self {
            BundleKind::Css => "css",
            BundleKind::Js => "js",
        }
    }
}

/// Read access to the site's static assets plus storage for combined bundles.
///
/// Implementations are shared between concurrent requests and called from
/// blocking worker threads.
pub trait AssetStore: Send + Sync {
    /// Read an asset addressed by its root-relative URL path (e.g. `/css/site.css`).
    fn read(&self, url_path: &str) -> Result<String, AssetError>;

    /// Persist a bundle and return the root-relative URL it is served from.
    ///
    /// Storing identical contents twice must yield the same URL.
    fn store_bundle(&self, kind: BundleKind, contents: &str) -> Result<String, AssetError>;
}
