//! signet library exports
//!
//! Build-time modules (resolver, table, template, pipeline, signing) sit
//! behind the `build` and `sign` features. Generated launchers only link the
//! runtime half: `hasher`, `locate` and `launcher`.

pub mod error;
pub mod hasher;
pub mod launcher;
pub mod locate;

#[cfg(feature = "build")]
pub mod config;
#[cfg(feature = "build")]
pub mod pipeline;
#[cfg(feature = "build")]
pub mod resolver;
#[cfg(feature = "build")]
pub mod resource;
#[cfg(feature = "build")]
pub mod table;
#[cfg(feature = "build")]
pub mod template;

#[cfg(feature = "sign")]
pub mod signing;

pub use launcher::{DetectionLevel, EmbeddedSignature};

#[cfg(feature = "build")]
pub use error::BuildError;
#[cfg(feature = "sign")]
pub use error::SignError;
