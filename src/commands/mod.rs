//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `pack` - Build the filesystem image from a staging directory
//! - `stage` - Assemble a staging directory from a BusyBox install
//! - `manifest` - Print a tree's manifest
//! - `verify` - Compare an image with its staging directory
//! - `extract` - Copy an image's contents out
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod extract;
pub mod manifest;
pub mod pack;
mod preflight;
pub mod show;
pub mod stage;
pub mod verify;

pub use extract::cmd_extract;
pub use manifest::cmd_manifest;
pub use pack::{cmd_pack, PackOptions};
pub use preflight::cmd_preflight;
pub use show::{cmd_show, ShowTarget};
pub use stage::{cmd_stage, StageOptions};
pub use verify::cmd_verify;
