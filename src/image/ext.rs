//! ext2/ext4 formatting with `mkfs -d`.
//!
//! `mkfs.ext4 -d <dir>` populates the new filesystem straight from the
//! staging tree without mounting it, carrying over permissions,
//! ownership, symlinks and device nodes. No root needed.

use std::path::Path;

use crate::config::ImageFormat;
use crate::error::{PackagingError, Result};
use crate::process::Cmd;

use super::plan::{ImagePlan, BLOCK_SIZE, INODE_SIZE};

/// Identifiers pinned for reproducible output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uuid: String,
    pub hash_seed: String,
    /// Seconds since the epoch used for every timestamp.
    pub epoch: u64,
}

/// Format 16 bytes as a UUID string, marking it as a name-based (v5) UUID.
pub fn uuid_from_bytes(bytes: &[u8]) -> String {
    let mut b = [0u8; 16];
    b.copy_from_slice(&bytes[..16]);
    b[6] = (b[6] & 0x0f) | 0x50;
    b[8] = (b[8] & 0x3f) | 0x80;
    let hex: String = b.iter().map(|x| format!("{:02x}", x)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

impl Identity {
    /// Derive UUID and hash seed from a manifest digest.
    pub fn from_digest(digest: &[u8; 32], epoch: u64) -> Self {
        Self {
            uuid: uuid_from_bytes(&digest[..16]),
            hash_seed: uuid_from_bytes(&digest[16..]),
            epoch,
        }
    }
}

/// Everything that shapes the `mkfs` command line.
#[derive(Debug, Clone)]
pub struct FormatOptions<'a> {
    pub format: ImageFormat,
    pub label: &'a str,
    pub all_root: bool,
    pub plan: &'a ImagePlan,
    pub identity: &'a Identity,
}

/// Arguments for `mkfs.<format>`, minus the staging dir and image path.
pub fn mkfs_args(opts: &FormatOptions<'_>) -> Vec<String> {
    let mut args = vec![
        "-q".to_string(),
        "-F".to_string(),
        "-b".to_string(),
        BLOCK_SIZE.to_string(),
        "-I".to_string(),
        INODE_SIZE.to_string(),
        "-N".to_string(),
        opts.plan.inodes.to_string(),
        // no blocks reserved for root on a RAM-loaded image
        "-m".to_string(),
        "0".to_string(),
        "-L".to_string(),
        opts.label.to_string(),
        "-U".to_string(),
        opts.identity.uuid.clone(),
    ];

    if opts.format == ImageFormat::Ext4 {
        args.push("-O".to_string());
        args.push("^has_journal".to_string());
    }

    let mut extended = vec![
        format!("hash_seed={}", opts.identity.hash_seed),
        "lazy_itable_init=0".to_string(),
    ];
    if opts.all_root {
        extended.push("root_owner=0:0".to_string());
    }
    args.push("-E".to_string());
    args.push(extended.join(","));

    args
}

/// Environment that pins e2fsprogs timestamps.
pub fn reproducible_env(identity: &Identity) -> [(&'static str, String); 2] {
    [
        ("E2FSPROGS_FAKE_TIME", identity.epoch.to_string()),
        ("SOURCE_DATE_EPOCH", identity.epoch.to_string()),
    ]
}

/// Create `image` (already sized by the caller) populated from `staging`.
pub fn format_image(staging: &Path, image: &Path, opts: &FormatOptions<'_>) -> Result<()> {
    let tool = opts.format.mkfs_tool();

    let mut cmd = Cmd::new(tool)
        .args(mkfs_args(opts))
        .arg("-d")
        .arg_path(staging)
        .arg_path(image)
        .error_msg(format!("{} could not build the image", tool));
    for (key, value) in reproducible_env(opts.identity) {
        cmd = cmd.env(key, value);
    }

    cmd.run()
        .map_err(|e| PackagingError::format_failure(tool, format!("{:#}", e)))?;
    Ok(())
}

/// Fail with `FormatFailure` if a needed tool is not in PATH.
pub fn require_tool(tool: &str) -> Result<()> {
    if crate::process::exists(tool) {
        Ok(())
    } else {
        Err(PackagingError::format_failure(
            tool,
            "not found in PATH (install e2fsprogs)",
        ))
    }
}
