//! Shared test utilities for rootpack tests.
#![allow(dead_code, unused_macros)]

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use rootpack::process::{self, Cmd};

/// Test environment with a BusyBox install tree, a staging path and an
/// output directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Mock `make install` output
    pub busybox: PathBuf,
    /// Staging directory (not created)
    pub staging: PathBuf,
    /// Where images are written
    pub out_dir: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with temporary directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let busybox = base.join("_install");
        let staging = base.join("rootfs");
        let out_dir = base.join("out");

        create_mock_busybox(&busybox);
        fs::create_dir_all(&out_dir).expect("Failed to create out dir");

        Self {
            _temp_dir: temp_dir,
            busybox,
            staging,
            out_dir,
        }
    }

    pub fn image(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    /// Staging directory holding only a few plain files.
    pub fn simple_staging(&self) -> &Path {
        let dirs = ["bin", "etc", "dev"];
        for dir in dirs {
            fs::create_dir_all(self.staging.join(dir)).expect("Failed to create staging dir");
        }
        create_mock_binary(&self.staging.join("bin/busybox"));
        symlink("busybox", self.staging.join("bin/sh")).expect("Failed to create symlink");
        fs::write(self.staging.join("etc/hostname"), "board\n").expect("Failed to write hostname");
        &self.staging
    }
}

/// Create a tree shaped like BusyBox `make install` output.
pub fn create_mock_busybox(root: &Path) {
    for dir in ["bin", "sbin", "usr/bin", "usr/sbin"] {
        fs::create_dir_all(root.join(dir)).expect("Failed to create mock busybox dir");
    }

    create_mock_binary(&root.join("bin/busybox"));

    let links = [
        ("bin/sh", "busybox"),
        ("bin/ls", "busybox"),
        ("bin/mount", "busybox"),
        ("sbin/init", "../bin/busybox"),
        ("sbin/reboot", "../bin/busybox"),
        ("usr/bin/env", "../../bin/busybox"),
        ("usr/sbin/chroot", "../../bin/busybox"),
        ("linuxrc", "bin/busybox"),
    ];
    for (link, target) in links {
        symlink(target, root.join(link)).expect("Failed to create applet link");
    }
}

/// Create a mock executable binary file.
pub fn create_mock_binary(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir for binary");
    }

    // Only needs to exist and be executable
    fs::write(path, "#!/bin/sh\necho mock busybox\n").expect("Failed to create mock binary");

    let mut perms = fs::metadata(path).expect("Failed to get metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("Failed to set permissions");
}

/// Write an executable shell script named `name` into `dir`, standing in
/// for a host tool.
pub fn create_mock_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("Failed to create mock tool dir");
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write mock tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("Failed to set permissions");
    path
}

/// Create a sparse file of `size` bytes.
pub fn create_sparse_file(path: &Path, size: u64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    let file = fs::File::create(path).expect("Failed to create sparse file");
    file.set_len(size).expect("Failed to size sparse file");
}

/// mkfs.ext4, debugfs and an mke2fs that can populate from a directory.
pub fn e2fsprogs_available() -> bool {
    if !(process::exists("mkfs.ext4") && process::exists("debugfs") && process::exists("mke2fs")) {
        return false;
    }
    Cmd::new("mke2fs")
        .allow_fail()
        .run()
        .map(|out| out.stderr.contains("-d root-directory"))
        .unwrap_or(false)
}

/// Installed e2fsprogs version, from `mke2fs -V`.
pub fn e2fsprogs_version() -> Option<(u32, u32, u32)> {
    let out = Cmd::new("mke2fs").arg("-V").allow_fail().run().ok()?;
    rootpack::preflight::parse_version(&out.stderr)
        .or_else(|| rootpack::preflight::parse_version(&out.stdout))
}

/// Skip the calling test when e2fsprogs cannot build images here.
macro_rules! require_e2fsprogs {
    () => {
        if !helpers::e2fsprogs_available() {
            eprintln!("SKIP: e2fsprogs with mke2fs -d support not installed");
            return;
        }
    };
}

/// Assert that a symlink exists and points to the expected target.
pub fn assert_symlink(path: &Path, expected_target: &str) {
    assert!(
        path.is_symlink(),
        "Expected symlink at {}, but it's not a symlink",
        path.display()
    );

    let target = fs::read_link(path).expect("Failed to read symlink");
    assert_eq!(
        target.to_string_lossy(),
        expected_target,
        "Symlink {} points to {:?}, expected {}",
        path.display(),
        target,
        expected_target
    );
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("Failed to read file: {}", path.display()));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a directory exists.
pub fn assert_dir_exists(path: &Path) {
    assert!(
        path.is_dir(),
        "Expected directory to exist: {}",
        path.display()
    );
}

/// Assert the permission bits of a path (symlinks not followed).
pub fn assert_mode(path: &Path, expected: u32) {
    let mode = fs::symlink_metadata(path)
        .unwrap_or_else(|_| panic!("Failed to stat {}", path.display()))
        .permissions()
        .mode()
        & 0o7777;
    assert_eq!(
        mode, expected,
        "{} has mode {:o}, expected {:o}",
        path.display(),
        mode,
        expected
    );
}
