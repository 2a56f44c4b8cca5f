//! Core primitives shared by rust-obs device drivers.
//!
//! This crate deliberately stays small: it holds the pieces every driver
//! needs but none should own.
//!
//! - [`serial`] — async serial-port plumbing (`serial` feature): shared
//!   type-erased ports, an open helper, and a stale-input drain.
//! - [`clock`] — injectable monotonic time sources, so deadline logic can
//!   be tested without sleeping.
//!
//! Error handling follows one convention across the workspace: typed
//! `thiserror` enums at protocol boundaries, `anyhow` for construction and
//! connection paths. The common imports are re-exported here so driver
//! crates can write `use obs_core::{anyhow, Result};`.

pub mod clock;
#[cfg(feature = "serial")]
pub mod serial;

pub use anyhow::{anyhow, Result};
pub use thiserror::Error;
