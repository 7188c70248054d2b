//! rootpack library exports.
//!
//! The CLI in `main.rs` is a thin layer over these modules; integration
//! tests drive them directly.

pub mod commands;
pub mod common;
pub mod config;
pub mod error;
pub mod image;
pub mod manifest;
pub mod preflight;
pub mod process;
pub mod staging;
pub mod timing;
pub mod units;
pub mod verify;

pub use error::PackagingError;
pub use image::{package, PackReport, PackRequest};
