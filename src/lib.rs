//! Depot installer
//!
//! Turns "install this app" into a verified installation inside an emulated
//! container filesystem: CDN token handling, manifest retrieval, chunked and
//! verified downloads, bootstrap archive extraction and post-install
//! validation, driven by a staged pipeline.

pub mod appstate;
pub mod archive;
pub mod auth;
pub mod cdn;
pub mod config;
pub mod depot;
pub mod download;
pub mod integrity;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod retry;
pub mod runtime;
pub mod validator;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
