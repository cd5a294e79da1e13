//! Transform sequencer.
//!
//! Applies the optional optimization passes to a captured page in the fixed
//! order of [`Pass::ORDER`]. AMP documents short-circuit before any pass runs.

use std::{sync::Arc, time::Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    application::assets::AssetError,
    domain::{amp::is_amp_document, pass::Pass},
};

/// Failure raised by a single pass.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("html rewrite failed: {message}")]
    Rewrite { message: String },
    #[error("minified output is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl TransformError {
    pub fn rewrite(message: impl Into<String>) -> Self {
        Self::Rewrite {
            message: message.into(),
        }
    }
}

impl From<lol_html::errors::RewritingError> for TransformError {
    fn from(error: lol_html::errors::RewritingError) -> Self {
        Self::rewrite(error.to_string())
    }
}

/// Failure of the sequencer; carries the pass that raised it.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("{pass} pass failed")]
    Pass {
        pass: Pass,
        #[source]
        source: TransformError,
    },
}

/// A rewrite of a whole HTML document.
pub trait Transform: Send + Sync {
    fn transform(&self, html: String) -> Result<String, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(String) -> Result<String, TransformError> + Send + Sync,
{
    fn transform(&self, html: String) -> Result<String, TransformError> {
        self(html)
    }
}

/// Boolean settings that switch individual passes on.
pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, pass: Pass) -> bool;
}

/// Static pass toggles resolved from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassToggles {
    pub optimize_html: bool,
    pub combine_css: bool,
    pub combine_javascript: bool,
    pub combine_google_fonts: bool,
    pub dns_prefetch: bool,
}

impl PassToggles {
    pub fn all() -> Self {
        Self {
            optimize_html: true,
            combine_css: true,
            combine_javascript: true,
            combine_google_fonts: true,
            dns_prefetch: true,
        }
    }

    pub fn only(pass: Pass) -> Self {
        Self::default().with(pass, true)
    }

    pub fn with(mut self, pass: Pass, enabled: bool) -> Self {
        *self.slot(pass) = enabled;
        self
    }

    fn slot(&mut self, pass: Pass) -> &mut bool {
        match pass {
            Pass::MinifyHtml => &mut self.optimize_html,
            Pass::CombineCss => &mut self.combine_css,
            Pass::CombineJs => &mut self.combine_javascript,
            Pass::CombineFonts => &mut self.combine_google_fonts,
            Pass::DnsPrefetch => &mut self.dns_prefetch,
        }
    }
}

impl From<&crate::config::OptimizerSettings> for PassToggles {
    fn from(settings: &crate::config::OptimizerSettings) -> Self {
        Self {
            optimize_html: settings.optimize_html,
            combine_css: settings.combine_css,
            combine_javascript: settings.combine_javascript,
            combine_google_fonts: settings.combine_google_fonts,
            dns_prefetch: settings.dns_prefetch,
        }
    }
}

impl FeatureFlags for PassToggles {
    fn is_enabled(&self, pass: Pass) -> bool {
        match pass {
            Pass::MinifyHtml => self.optimize_html,
            Pass::CombineCss => self.combine_css,
            Pass::CombineJs => self.combine_javascript,
            Pass::CombineFonts => self.combine_google_fonts,
            Pass::DnsPrefetch => self.dns_prefetch,
        }
    }
}

/// The five collaborators, one per [`Pass`].
#[derive(Clone)]
pub struct Passes {
    pub minify_html: Arc<dyn Transform>,
    pub combine_css: Arc<dyn Transform>,
    pub combine_js: Arc<dyn Transform>,
    pub combine_fonts: Arc<dyn Transform>,
    pub dns_prefetch: Arc<dyn Transform>,
}

impl Passes {
    pub fn get(&self, pass: Pass) -> &dyn Transform {
        match pass {
            Pass::MinifyHtml => self.minify_html.as_ref(),
            Pass::CombineCss => self.combine_css.as_ref(),
            Pass::CombineJs => self.combine_js.as_ref(),
            Pass::CombineFonts => self.combine_fonts.as_ref(),
            Pass::DnsPrefetch => self.dns_prefetch.as_ref(),
        }
    }
}

/// Result of a sequencer run.
#[derive(Debug, Clone, Serialize)]
pub struct Optimized {
    #[serde(skip)]
    pub html: String,
    pub amp: bool,
    pub applied: Vec<Pass>,
}

pub struct Optimizer {
    flags: Arc<dyn FeatureFlags>,
    passes: Passes,
}

impl Optimizer {
    pub fn new(flags: Arc<dyn FeatureFlags>, passes: Passes) -> Self {
        Self { flags, passes }
    }

    /// Run the pipeline and return only the resulting markup.
    pub fn run(&self, html: String) -> Result<String, OptimizeError> {
        self.optimize(html).map(|optimized| optimized.html)
    }

    /// Run the pipeline, recording the AMP decision and the passes applied.
    #[instrument(skip_all, fields(bytes = html.len()))]
    pub fn optimize(&self, html: String) -> Result<Optimized, OptimizeError> {
        if is_amp_document(&html) {
            counter!("pagewright_amp_bypass_total").increment(1);
            debug!(
                target = "pagewright::optimizer",
                "amp document, skipping optimizations"
            );
            return Ok(Optimized {
                html,
                amp: true,
                applied: Vec::new(),
            });
        }

        let started = Instant::now();
        let mut html = html;
        let mut applied = Vec::new();

        for pass in Pass::ORDER {
            if !self.flags.is_enabled(pass) {
                continue;
            }
            html = self
                .passes
                .get(pass)
                .transform(html)
                .map_err(|source| OptimizeError::Pass { pass, source })?;
            counter!("pagewright_pass_applied_total", "pass" => pass.as_str()).increment(1);
            applied.push(pass);
        }

        counter!("pagewright_pages_optimized_total").increment(1);
        histogram!("pagewright_optimize_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            target = "pagewright::optimizer",
            passes = applied.len(),
            bytes = html.len(),
            "page optimized"
        );

        Ok(Optimized {
            html,
            amp: false,
            applied,
        })
    }
}
