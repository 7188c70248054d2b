//! Typed errors for staging and packaging.
//!
//! Library code returns [`PackagingError`] so callers can tell a missing
//! staging tree from an oversized one or a failed formatter. The CLI wraps
//! these in `anyhow` and downcasts at the top to pick an exit code.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackagingError>;

/// Everything that can stop a `stage` or `pack` run.
#[derive(Error, Debug)]
pub enum PackagingError {
    /// Staging directory does not exist or is not a directory.
    #[error("staging directory not found: {}", path.display())]
    StagingDirNotFound { path: PathBuf },

    /// Staging directory exists but has nothing in it.
    #[error("staging directory is empty: {}", path.display())]
    StagingDirEmpty { path: PathBuf },

    /// Refusing to stage over existing content without `--force`.
    #[error("staging directory is not empty: {} (use --force to replace it)", path.display())]
    StagingDirNotEmpty { path: PathBuf },

    /// BusyBox install tree missing or without `bin/busybox`.
    #[error("BusyBox install tree not found: {} (run `make install` in the BusyBox tree first)", path.display())]
    BusyboxNotFound { path: PathBuf },

    /// A staging entry whose name cannot be written into the image.
    #[error("cannot pack {path}: {reason}")]
    UnsupportedName { path: String, reason: &'static str },

    /// Projected (or final) image does not fit the RAM window.
    #[error(
        "image needs {} but the limit is {}",
        crate::units::human_bytes(*projected),
        crate::units::human_bytes(*max)
    )]
    SizeExceeded { projected: u64, max: u64 },

    /// The image formatter or debugfs is missing or exited non-zero.
    #[error("{tool} failed: {message}")]
    FormatFailure { tool: String, message: String },

    /// Not enough privilege for the requested step.
    #[error("permission denied while {action} {}", path.display())]
    PermissionDenied { action: String, path: PathBuf },

    /// Any other I/O failure. The OS error is the source.
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PackagingError {
    /// Short, stable name of the failure kind for the error stream.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StagingDirNotFound { .. } => "staging-dir-not-found",
            Self::StagingDirEmpty { .. } => "staging-dir-empty",
            Self::StagingDirNotEmpty { .. } => "staging-dir-not-empty",
            Self::BusyboxNotFound { .. } => "busybox-not-found",
            Self::UnsupportedName { .. } => "unsupported-name",
            Self::SizeExceeded { .. } => "size-exceeded",
            Self::FormatFailure { .. } => "format-failure",
            Self::PermissionDenied { .. } => "permission-denied",
            Self::Io { .. } => "io",
        }
    }

    /// Process exit code for this failure kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::StagingDirNotFound { .. }
            | Self::StagingDirEmpty { .. }
            | Self::StagingDirNotEmpty { .. }
            | Self::BusyboxNotFound { .. }
            | Self::UnsupportedName { .. } => 2,
            Self::SizeExceeded { .. } => 3,
            Self::FormatFailure { .. } => 4,
            Self::PermissionDenied { .. } => 5,
            Self::Io { .. } => 1,
        }
    }

    /// Classify an I/O error: EACCES/EPERM become `PermissionDenied`.
    pub fn io(action: &str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                action: action.to_string(),
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                context: format!("{} {}", action, path.display()),
                source,
            }
        }
    }

    pub fn format_failure(tool: &str, message: impl Into<String>) -> Self {
        Self::FormatFailure {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Attach an action and a path to an `io::Result`.
pub trait IoResultExt<T> {
    fn during(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn during(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|e| PackagingError::io(action, path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_are_classified() {
        let err = PackagingError::io(
            "reading",
            Path::new("/staging/dev/console"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), "permission-denied");
        assert_eq!(err.exit_code(), 5);
        assert!(err.to_string().contains("/staging/dev/console"));
    }

    #[test]
    fn test_other_io_errors_keep_context() {
        let err = PackagingError::io(
            "renaming",
            Path::new("/out/rootfs.img"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.kind(), "io");
        assert_eq!(err.to_string(), "renaming /out/rootfs.img");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_size_exceeded_message_is_human_readable() {
        let err = PackagingError::SizeExceeded {
            projected: 120 * 1024 * 1024,
            max: 100 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "image needs 120.0 MiB but the limit is 100.0 MiB");
        assert_eq!(err.exit_code(), 3);
    }
}
