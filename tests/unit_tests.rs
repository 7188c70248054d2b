//! Unit tests for rootpack's pure pieces.
//!
//! These run without e2fsprogs: size parsing, configuration, manifests and
//! the size projection.

mod helpers;

use helpers::{create_sparse_file, TestEnv};
use rootpack::config::{Config, Sizing};
use rootpack::image::ImagePlan;
use rootpack::manifest::{DiffOptions, Difference, Manifest};
use rootpack::staging::default_device_table;
use rootpack::units::{parse_size, RamWindow, MIB};
use rootpack::PackagingError;
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;

// =============================================================================
// units
// =============================================================================

#[test]
fn test_size_spellings_agree() {
    let expected = 100 * MIB;
    for input in ["100M", "100MiB", "104857600", "0x6400000"] {
        assert_eq!(parse_size(input).unwrap(), expected, "input {}", input);
    }
}

#[test]
fn test_board_ram_window() {
    let window: RamWindow = "0x89000000-0x8FE00000".parse().unwrap();
    assert_eq!(window.len(), 115_343_360);
    assert_eq!(window.to_string(), "0x89000000-0x8FE00000");
}

// =============================================================================
// config
// =============================================================================

const ENV_KEYS: [&str; 3] = ["ROOTPACK_MAX_SIZE", "ROOTPACK_RAM_WINDOW", "ROOTPACK_SRC"];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_reads_process_environment() {
    clear_env();
    std::env::set_var("ROOTPACK_MAX_SIZE", "0x6400000");
    std::env::set_var("ROOTPACK_SRC", "/work/rootfs");

    let config = Config::load().unwrap();
    assert_eq!(config.effective_max_size(), 100 * MIB);
    assert_eq!(config.src.as_deref(), Some(std::path::Path::new("/work/rootfs")));

    clear_env();
}

#[test]
#[serial]
fn test_config_defaults_without_environment() {
    clear_env();
    let config = Config::load().unwrap();
    assert_eq!(config.effective_max_size(), 100 * MIB);
    assert!(config.all_root);
}

#[test]
#[serial]
fn test_bad_environment_value_is_an_error() {
    clear_env();
    std::env::set_var("ROOTPACK_MAX_SIZE", "lots");
    let err = Config::load().unwrap_err();
    assert!(format!("{:#}", err).contains("ROOTPACK_MAX_SIZE"));
    clear_env();
}

// =============================================================================
// manifest
// =============================================================================

#[test]
fn test_manifest_digest_is_stable_across_rescans() {
    let env = TestEnv::new();
    let staging = env.simple_staging();

    let first = Manifest::scan_with_contents(staging).unwrap();
    let second = Manifest::scan_with_contents(staging).unwrap();
    assert_eq!(first.digest_hex(), second.digest_hex());
    assert_eq!(first.digest_hex().len(), 64);
}

#[test]
fn test_manifest_diff_sees_mode_change() {
    let env = TestEnv::new();
    let staging = env.simple_staging();
    let before = Manifest::scan(staging).unwrap();

    fs::set_permissions(
        staging.join("bin/busybox"),
        fs::Permissions::from_mode(0o700),
    )
    .unwrap();
    let after = Manifest::scan(staging).unwrap();

    let diffs = before.diff(&after, &DiffOptions::default());
    assert_eq!(diffs.len(), 1);
    assert!(matches!(&diffs[0],
        Difference::Changed { path, field: "mode", .. } if path == "/bin/busybox"));
    assert_ne!(before.digest(), after.digest());
}

// =============================================================================
// size projection
// =============================================================================

#[test]
fn test_80_mib_staging_fits_100_mib() {
    let env = TestEnv::new();
    let staging = env.simple_staging();
    create_sparse_file(&staging.join("opt/payload"), 80 * MIB);

    let manifest = Manifest::scan(staging).unwrap();
    let plan = ImagePlan::new(&manifest, &default_device_table(), 100 * MIB, Sizing::Fit).unwrap();
    assert!(plan.image_size <= 100 * MIB);
    assert!(plan.projected >= 80 * MIB);
}

#[test]
fn test_120_mib_staging_exceeds_100_mib() {
    let env = TestEnv::new();
    let staging = env.simple_staging();
    create_sparse_file(&staging.join("opt/payload"), 120 * MIB);

    let manifest = Manifest::scan(staging).unwrap();
    let err = ImagePlan::new(&manifest, &[], 100 * MIB, Sizing::Fit).unwrap_err();
    assert!(matches!(err, PackagingError::SizeExceeded { max, .. } if max == 100 * MIB));
}

#[test]
fn test_fill_matches_ram_window() {
    let env = TestEnv::new();
    let staging = env.simple_staging();
    let window: RamWindow = "0x89000000-0x8FE00000".parse().unwrap();

    let manifest = Manifest::scan(staging).unwrap();
    let plan = ImagePlan::new(&manifest, &[], window.len(), Sizing::Fill).unwrap();
    assert_eq!(plan.image_size, window.len());
}
