//! HTML response optimizer.
//!
//! Pages travelling from an origin to anonymous visitors are minified, have
//! their stylesheets, scripts and Google Fonts links combined, and get DNS
//! prefetch hints, each step behind its own switch. AMP pages are left alone.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
