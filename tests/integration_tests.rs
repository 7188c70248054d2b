//! Integration tests for staging and packing.
//!
//! Tests that build real images need `mkfs.ext4`, `debugfs` and an
//! `mke2fs` with `-d`; they print SKIP and return when those are missing.

#[macro_use]
mod helpers;

use helpers::{
    assert_dir_exists, assert_file_contains, assert_mode, assert_symlink, create_sparse_file,
    TestEnv,
};
use rootpack::config::{DevicePolicy, ImageFormat, Sizing};
use rootpack::image::debugfs::list_image;
use rootpack::manifest::{Difference, EntryKind};
use rootpack::staging::{self, default_device_table, DeviceNode, StageRequest};
use rootpack::units::MIB;
use rootpack::verify::{extract_image, verify_image, VerifyOptions};
use rootpack::{package, PackRequest, PackagingError};
use std::fs;
use std::process::Command;

fn stage_default(env: &TestEnv) {
    let mut request = StageRequest::new(&env.busybox, &env.staging);
    request.devices = DevicePolicy::Image;
    staging::stage(&request).expect("staging should succeed");
}

fn pack_request(env: &TestEnv, name: &str) -> PackRequest {
    let mut request = PackRequest::new(&env.staging, env.image(name), 100 * MIB);
    request.devices = default_device_table();
    request
}

// =============================================================================
// Packager failures (no tools needed)
// =============================================================================

#[test]
fn test_pack_missing_staging_dir() {
    let env = TestEnv::new();
    let err = package(&pack_request(&env, "rootfs.img")).unwrap_err();
    assert!(matches!(err, PackagingError::StagingDirNotFound { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(!env.image("rootfs.img").exists());
}

#[test]
fn test_pack_empty_staging_dir() {
    let env = TestEnv::new();
    fs::create_dir_all(&env.staging).unwrap();
    let err = package(&pack_request(&env, "rootfs.img")).unwrap_err();
    assert!(matches!(err, PackagingError::StagingDirEmpty { .. }));
    assert!(!env.image("rootfs.img").exists());
}

#[test]
fn test_pack_oversized_leaves_existing_image_untouched() {
    let env = TestEnv::new();
    env.simple_staging();
    create_sparse_file(&env.staging.join("opt/payload"), 120 * MIB);

    let image = env.image("rootfs.img");
    fs::write(&image, b"old image bytes").unwrap();

    let err = package(&pack_request(&env, "rootfs.img")).unwrap_err();
    assert!(matches!(err, PackagingError::SizeExceeded { .. }));
    assert_eq!(fs::read(&image).unwrap(), b"old image bytes");
    assert!(!env.image("rootfs.img.work").exists());
}

#[test]
fn test_pack_oversized_writes_no_file() {
    let env = TestEnv::new();
    env.simple_staging();
    create_sparse_file(&env.staging.join("opt/payload"), 120 * MIB);

    assert!(package(&pack_request(&env, "rootfs.img")).is_err());
    assert!(fs::read_dir(&env.out_dir).unwrap().next().is_none());
}

// =============================================================================
// Stager
// =============================================================================

#[test]
fn test_stage_builds_skeleton() {
    let env = TestEnv::new();
    let mut request = StageRequest::new(&env.busybox, &env.staging);
    request.devices = DevicePolicy::Image;
    let report = staging::stage(&request).unwrap();

    for dir in ["dev", "proc", "sys", "tmp", "root", "etc/init.d", "var/log"] {
        assert_dir_exists(&env.staging.join(dir));
    }
    assert_mode(&env.staging.join("tmp"), 0o1777);
    assert_mode(&env.staging.join("root"), 0o700);
    assert_mode(&env.staging.join("etc/init.d/rcS"), 0o755);

    assert_file_contains(&env.staging.join("etc/inittab"), "ttyS0::respawn:-/bin/sh");
    assert_file_contains(&env.staging.join("etc/init.d/rcS"), "mount -t proc proc /proc");
    assert_file_contains(&env.staging.join("etc/passwd"), "root::0:0");

    assert_symlink(&env.staging.join("init"), "bin/busybox");
    assert_symlink(&env.staging.join("bin/sh"), "busybox");
    assert_symlink(&env.staging.join("sbin/init"), "../bin/busybox");

    // the install tree already had linuxrc
    assert_eq!(report.links_created, 1);
    assert_eq!(report.devices_deferred, default_device_table().len());
    assert!(!env.staging.join("dev/console").exists());
    assert!(!env.staging.with_extension("work").exists());
}

#[test]
fn test_stage_refuses_non_empty_target() {
    let env = TestEnv::new();
    fs::create_dir_all(&env.staging).unwrap();
    fs::write(env.staging.join("keep-me"), "x").unwrap();

    let err = staging::stage(&StageRequest::new(&env.busybox, &env.staging)).unwrap_err();
    assert!(matches!(err, PackagingError::StagingDirNotEmpty { .. }));
    assert!(env.staging.join("keep-me").exists());
}

#[test]
fn test_stage_force_replaces_target() {
    let env = TestEnv::new();
    fs::create_dir_all(&env.staging).unwrap();
    fs::write(env.staging.join("stale"), "x").unwrap();

    let mut request = StageRequest::new(&env.busybox, &env.staging);
    request.force = true;
    staging::stage(&request).unwrap();

    assert!(!env.staging.join("stale").exists());
    assert!(env.staging.join("bin/busybox").is_file());
}

#[test]
fn test_stage_without_busybox() {
    let env = TestEnv::new();
    fs::remove_file(env.busybox.join("bin/busybox")).unwrap();
    let err = staging::stage(&StageRequest::new(&env.busybox, &env.staging)).unwrap_err();
    assert!(matches!(err, PackagingError::BusyboxNotFound { .. }));
    assert!(!env.staging.exists());
}

// =============================================================================
// Real images (need e2fsprogs)
// =============================================================================

#[test]
fn test_pack_80_mib_fits() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);
    create_sparse_file(&env.staging.join("opt/payload"), 80 * MIB);

    let report = package(&pack_request(&env, "rootfs.img")).unwrap();
    let len = fs::metadata(env.image("rootfs.img")).unwrap().len();
    assert!(len <= 100 * MIB, "image is {} bytes", len);
    assert_eq!(report.image_size, len);
    assert!(!env.image("rootfs.img.work").exists());
}

#[test]
fn test_pack_fill_uses_whole_limit() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);

    let mut request = pack_request(&env, "rootfs.img");
    request.max_size = 16 * MIB;
    request.sizing = Sizing::Fill;
    let report = package(&request).unwrap();
    assert_eq!(report.image_size, 16 * MIB);
}

#[test]
fn test_pack_replaces_existing_image() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);
    fs::write(env.image("rootfs.img"), b"old").unwrap();

    package(&pack_request(&env, "rootfs.img")).unwrap();
    assert!(fs::metadata(env.image("rootfs.img")).unwrap().len() > 3);
}

#[test]
fn test_image_round_trips_the_tree() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);
    let request = pack_request(&env, "rootfs.img");
    package(&request).unwrap();

    let report = verify_image(
        &request.output,
        &env.staging,
        &VerifyOptions {
            all_root: true,
            devices: default_device_table(),
        },
    )
    .unwrap();
    assert!(
        report.is_clean(),
        "differences: {:?}",
        report.differences
    );
}

#[test]
fn test_device_nodes_and_ownership_in_image() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);
    let request = pack_request(&env, "rootfs.img");
    package(&request).unwrap();

    let listed = list_image(&request.output).unwrap();
    let console = listed.iter().find(|e| e.path == "/dev/console").unwrap();
    assert_eq!(EntryKind::from_mode(console.mode), Some(EntryKind::Char));
    assert_eq!(console.mode & 0o7777, 0o600);
    assert_eq!(console.rdev, Some((5, 1)));
    assert!(listed.iter().all(|e| e.uid == 0 && e.gid == 0));
}

#[test]
fn test_verify_catches_wrong_device_numbers() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);
    let request = pack_request(&env, "rootfs.img");
    package(&request).unwrap();

    let devices = default_device_table()
        .into_iter()
        .map(|node| {
            if node.path == "/dev/null" {
                DeviceNode::char("/dev/null", 9, 9, node.mode)
            } else {
                node
            }
        })
        .collect();
    let report = verify_image(
        &request.output,
        &env.staging,
        &VerifyOptions {
            all_root: true,
            devices,
        },
    )
    .unwrap();
    assert!(
        matches!(&report.differences[..],
            [Difference::Changed { path, field: "rdev", expected, actual }]
                if path == "/dev/null" && expected == "9:9" && actual == "1:3"),
        "differences: {:?}",
        report.differences
    );
}

#[test]
fn test_names_with_quotes_pack_and_verify() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    env.simple_staging();
    fs::write(env.staging.join("etc/say\"hi"), "quoted\n").unwrap();
    fs::create_dir(env.staging.join("a \"b\" c")).unwrap();
    fs::write(env.staging.join("a \"b\" c/inner"), "x").unwrap();

    let request = pack_request(&env, "rootfs.img");
    package(&request).unwrap();

    let listed = list_image(&request.output).unwrap();
    assert!(listed.iter().any(|e| e.path == "/etc/say\"hi"));
    assert!(listed.iter().any(|e| e.path == "/a \"b\" c/inner"));

    let report = verify_image(
        &request.output,
        &env.staging,
        &VerifyOptions {
            all_root: true,
            devices: default_device_table(),
        },
    )
    .unwrap();
    assert!(report.is_clean(), "differences: {:?}", report.differences);
}

#[test]
fn test_ext2_image() {
    require_e2fsprogs!();
    if !rootpack::process::exists("mkfs.ext2") {
        eprintln!("SKIP: mkfs.ext2 not installed");
        return;
    }
    let env = TestEnv::new();
    env.simple_staging();
    let mut request = pack_request(&env, "rootfs.ext2");
    request.format = ImageFormat::Ext2;
    package(&request).unwrap();

    let report = verify_image(
        &request.output,
        &env.staging,
        &VerifyOptions {
            all_root: true,
            devices: default_device_table(),
        },
    )
    .unwrap();
    assert!(report.is_clean(), "differences: {:?}", report.differences);
}

#[test]
fn test_extract_restores_files_and_links() {
    require_e2fsprogs!();
    let env = TestEnv::new();
    stage_default(&env);
    let request = pack_request(&env, "rootfs.img");
    package(&request).unwrap();

    let dest = env.out_dir.join("extracted");
    extract_image(&request.output, &dest).unwrap();

    assert_eq!(
        fs::read(dest.join("bin/busybox")).unwrap(),
        fs::read(env.staging.join("bin/busybox")).unwrap()
    );
    assert_symlink(&dest.join("init"), "bin/busybox");
    assert_file_contains(&dest.join("etc/hostname"), "busybox");
    assert!(!dest.join("lost+found").exists());
}

#[test]
fn test_identical_inputs_give_identical_images() {
    require_e2fsprogs!();
    match helpers::e2fsprogs_version() {
        Some(v) if v >= (1, 47, 1) => {}
        other => {
            eprintln!("SKIP: e2fsprogs {:?} does not pin every timestamp", other);
            return;
        }
    }
    let env = TestEnv::new();
    stage_default(&env);

    let first = package(&pack_request(&env, "a.img")).unwrap();
    let second = package(&pack_request(&env, "b.img")).unwrap();
    assert_eq!(first.uuid, second.uuid);
    assert_eq!(
        fs::read(env.image("a.img")).unwrap(),
        fs::read(env.image("b.img")).unwrap()
    );
}

// =============================================================================
// CLI
// =============================================================================

fn rootpack() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rootpack"));
    for (key, _) in std::env::vars() {
        if key.starts_with("ROOTPACK_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn test_cli_size_exceeded_exit_code() {
    let env = TestEnv::new();
    env.simple_staging();
    create_sparse_file(&env.staging.join("opt/payload"), 120 * MIB);

    let output = rootpack()
        .current_dir(&env.out_dir)
        .arg("pack")
        .arg("--src")
        .arg(&env.staging)
        .arg("--out")
        .arg(env.image("rootfs.img"))
        .args(["--max-size", "100M"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[size-exceeded]"), "stderr: {}", stderr);
    assert!(!env.image("rootfs.img").exists());
}

#[test]
fn test_cli_missing_staging_exit_code() {
    let env = TestEnv::new();
    let output = rootpack()
        .current_dir(&env.out_dir)
        .arg("pack")
        .arg("--src")
        .arg(&env.staging)
        .arg("--out")
        .arg(env.image("rootfs.img"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[staging-dir-not-found]"), "stderr: {}", stderr);
}

#[test]
fn test_cli_ram_window_sets_limit() {
    let env = TestEnv::new();
    env.simple_staging();
    // 120 MiB does not fit the 110 MiB window either
    create_sparse_file(&env.staging.join("opt/payload"), 120 * MIB);

    let output = rootpack()
        .current_dir(&env.out_dir)
        .arg("pack")
        .arg("--src")
        .arg(&env.staging)
        .arg("--out")
        .arg(env.image("rootfs.img"))
        .args(["--ram-window", "0x89000000-0x8FE00000"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("110.0 MiB"), "stderr: {}", stderr);
}
