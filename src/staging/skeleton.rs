//! Fixed skeleton around the BusyBox applets.
//!
//! Mount points, BusyBox init configuration and the handful of `/etc`
//! files a shell login needs. Existing files in the staging tree always
//! win; the skeleton only fills gaps.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use crate::common::write_file_mode;
use crate::error::{IoResultExt, Result};

/// Directories every image gets, with their permission bits.
const DIRS: &[(&str, u32)] = &[
    ("dev", 0o755),
    ("proc", 0o555),
    ("sys", 0o555),
    ("tmp", 0o1777),
    ("root", 0o700),
    ("mnt", 0o755),
    ("run", 0o755),
    ("etc", 0o755),
    ("etc/init.d", 0o755),
    ("var", 0o755),
    ("var/log", 0o755),
];

#[derive(Debug, Clone)]
pub struct SkeletonOptions {
    pub hostname: String,
    /// Serial console the shell is spawned on.
    pub console: String,
}

impl Default for SkeletonOptions {
    fn default() -> Self {
        Self {
            hostname: "busybox".to_string(),
            console: "ttyS0".to_string(),
        }
    }
}

/// Create the skeleton directories; returns how many were new.
pub fn create_directories(root: &Path) -> Result<usize> {
    let mut created = 0;
    for (dir, mode) in DIRS {
        let path = root.join(dir);
        if path.symlink_metadata().is_ok() {
            continue;
        }
        fs::create_dir_all(&path).during("creating", &path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(*mode))
            .during("setting permissions of", &path)?;
        created += 1;
    }
    Ok(created)
}

pub fn inittab(console: &str) -> String {
    format!(
        "::sysinit:/etc/init.d/rcS\n\
         {console}::respawn:-/bin/sh\n\
         ::ctrlaltdel:/sbin/reboot\n\
         ::shutdown:/bin/umount -a -r\n\
         ::restart:/sbin/init\n"
    )
}

pub fn rcs() -> &'static str {
    r#"#!/bin/sh
mount -t proc proc /proc
mount -t sysfs sysfs /sys
mount -t devtmpfs devtmpfs /dev 2>/dev/null
mkdir -p /dev/pts
mount -t devpts devpts /dev/pts
mount -t tmpfs tmpfs /tmp
[ -f /etc/hostname ] && hostname -F /etc/hostname
"#
}

const FSTAB: &str = "\
proc    /proc   proc    defaults    0 0
sysfs   /sys    sysfs   defaults    0 0
tmpfs   /tmp    tmpfs   defaults    0 0
";

const PASSWD: &str = "root::0:0:root:/root:/bin/sh\n";
const GROUP: &str = "root:x:0:\n";

const PROFILE: &str = r#"export PATH=/bin:/sbin:/usr/bin:/usr/sbin
export HOME=/root
export PS1='\u@\h:\w\$ '
"#;

/// Write skeleton config files that are not already present.
pub fn write_config_files(root: &Path, opts: &SkeletonOptions) -> Result<usize> {
    let files: [(&str, String, u32); 7] = [
        ("etc/inittab", inittab(&opts.console), 0o644),
        ("etc/init.d/rcS", rcs().to_string(), 0o755),
        ("etc/fstab", FSTAB.to_string(), 0o644),
        ("etc/passwd", PASSWD.to_string(), 0o644),
        ("etc/group", GROUP.to_string(), 0o644),
        ("etc/hostname", format!("{}\n", opts.hostname), 0o644),
        ("etc/profile", PROFILE.to_string(), 0o644),
    ];

    let mut written = 0;
    for (rel, content, mode) in files {
        let path = root.join(rel);
        if path.symlink_metadata().is_ok() {
            tracing::debug!(path = rel, "keeping existing file");
            continue;
        }
        write_file_mode(&path, content, mode)?;
        written += 1;
    }
    Ok(written)
}

/// Links BusyBox init answers to, relative to the image root.
const BOOT_LINKS: &[(&str, &str)] = &[("init", "bin/busybox"), ("linuxrc", "bin/busybox")];

/// `/init` and `/linuxrc` pointing at BusyBox, so the image boots both as
/// a block-device root and initramfs-style. Returns how many were new.
pub fn create_boot_links(root: &Path) -> Result<usize> {
    let mut created = 0;
    for (name, target) in BOOT_LINKS {
        let link = root.join(name);
        if link.symlink_metadata().is_ok() {
            continue;
        }
        symlink(target, &link).during("creating", &link)?;
        created += 1;
    }
    Ok(created)
}
