//! Identifiers for the optional optimization passes.

use std::fmt;

use serde::Serialize;

/// One of the optional rewrites applied to a captured page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    MinifyHtml,
    CombineCss,
    CombineJs,
    CombineFonts,
    DnsPrefetch,
}

impl Pass {
    /// Fixed execution order. Later passes see the output of earlier ones.
    pub const ORDER: [Pass; 5] = [
        Pass::MinifyHtml,
        Pass::CombineCss,
        Pass::CombineJs,
        Pass::CombineFonts,
        Pass::DnsPrefetch,
    ];

    /// Option key under which the pass is toggled.
    pub fn key(self) -> &'static str {
        match self {
            Pass::MinifyHtml => "optimize_html",
            Pass::CombineCss => "combine_css",
            Pass::CombineJs => "combine_javascript",
            Pass::CombineFonts => "combine_google_fonts",
            Pass::DnsPrefetch => "dns_prefetch",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ORDER.into_iter().find(|pass| pass.key() == key)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Pass::MinifyHtml => "minify_html",
            Pass::CombineCss => "combine_css",
            Pass::CombineJs => "combine_js",
            Pass::CombineFonts => "combine_fonts",
            Pass::DnsPrefetch => "dns_prefetch",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
