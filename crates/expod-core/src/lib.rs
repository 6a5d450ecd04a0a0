//! # expod-core - Core Domain Types
//!
//! Foundation crate for expod. Provides domain types, URL construction and
//! error handling.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing, url).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`HostType`] - How devices reach the server (LAN, tunnel, localhost)
//! - [`BundlerKind`] - Native (metro) or web (webpack) bundler
//! - [`BundlerStartOptions`] - Options passed once when a bundler server starts
//! - [`ServerLocation`] - Where a started server is bound
//! - [`Platform`], [`RuntimeTarget`] - What `start` can open and where
//!
//! ### URLs (`url_creator`)
//! - [`UrlCreator`] - Server URL, loading page and deep-link construction
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with usage / transient / fatal classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context

pub mod error;
pub mod logging;
pub mod network;
pub mod types;
pub mod url_creator;

/// Prelude for common imports used throughout all expod crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use types::{
    slugify, BundlerKind, BundlerStartOptions, HostType, LocationOptions, Mode, Platform,
    ProjectInfo, Protocol, RuntimeTarget, ServerLocation,
};
pub use url_creator::{encode_uri_component, TunnelUrlGetter, UrlCreator, UrlOverrides};
