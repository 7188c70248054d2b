//! Static `/dev` nodes for the root filesystem skeleton.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{lchown, PermissionsExt};
use std::path::Path;

use crate::error::{IoResultExt, PackagingError, Result};
use crate::manifest::{makedev, EntryKind};

/// A device node the root filesystem needs before devtmpfs is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Absolute path inside the image, e.g. `/dev/console`.
    pub path: String,
    pub kind: EntryKind,
    pub major: u32,
    pub minor: u32,
    /// Permission bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl DeviceNode {
    pub fn char(path: &str, major: u32, minor: u32, mode: u32) -> Self {
        Self {
            path: path.to_string(),
            kind: EntryKind::Char,
            major,
            minor,
            mode,
            uid: 0,
            gid: 0,
        }
    }

    /// Directory part of the path (`/dev`).
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) | None => "/",
            Some(i) => &self.path[..i],
        }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Full `st_mode` including the file type bits.
    pub fn st_mode(&self) -> u32 {
        self.kind.type_bits() | (self.mode & 0o7777)
    }
}

/// Nodes a BusyBox init needs to reach a shell on the serial console.
pub fn default_device_table() -> Vec<DeviceNode> {
    vec![
        DeviceNode::char("/dev/console", 5, 1, 0o600),
        DeviceNode::char("/dev/null", 1, 3, 0o666),
        DeviceNode::char("/dev/zero", 1, 5, 0o666),
        DeviceNode::char("/dev/random", 1, 8, 0o666),
        DeviceNode::char("/dev/urandom", 1, 9, 0o666),
        DeviceNode::char("/dev/tty", 5, 0, 0o666),
        DeviceNode::char("/dev/ttyS0", 4, 64, 0o660),
    ]
}

/// Create the nodes under `root` with mknod(2) and chown them.
///
/// Needs CAP_MKNOD and CAP_CHOWN; EPERM surfaces as `PermissionDenied`.
/// Nodes that already exist are left alone.
pub fn create_nodes(root: &Path, nodes: &[DeviceNode]) -> Result<usize> {
    let mut created = 0;
    for node in nodes {
        let path = root.join(node.path.trim_start_matches('/'));
        if path.symlink_metadata().is_ok() {
            tracing::debug!(path = %path.display(), "device node already present");
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).during("creating", parent)?;
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| PackagingError::Io {
            context: format!("device node path contains NUL: {}", path.display()),
            source: io::Error::from(io::ErrorKind::InvalidInput),
        })?;
        // SAFETY: c_path is a valid NUL-terminated string for the call's duration.
        let rc = unsafe {
            libc::mknod(
                c_path.as_ptr(),
                node.st_mode() as libc::mode_t,
                makedev(node.major, node.minor) as libc::dev_t,
            )
        };
        if rc != 0 {
            return Err(PackagingError::io(
                "creating device node",
                &path,
                io::Error::last_os_error(),
            ));
        }

        // mknod applies the umask; set the exact bits afterwards
        fs::set_permissions(&path, fs::Permissions::from_mode(node.mode))
            .during("setting permissions of", &path)?;
        lchown(&path, Some(node.uid), Some(node.gid)).during("changing owner of", &path)?;

        created += 1;
    }
    Ok(created)
}

/// True when running with an effective uid of 0.
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}
