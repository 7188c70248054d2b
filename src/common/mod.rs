//! Shared filesystem helpers.

pub mod files;
pub mod paths;
pub mod temp;

pub use files::{write_file_mode, write_file_with_dirs};
pub use paths::{ensure_parent_exists, is_dir_empty, with_suffix};
pub use temp::{cleanup_work_dir, prepare_work_dir};
