//! Packaging environment checks (privilege, output location, staging tree).

use std::fs;
use std::path::Path;

use crate::common::is_dir_empty;
use crate::config::{Config, DevicePolicy};
use crate::staging::devices::running_as_root;

use super::types::CheckResult;

/// Check privilege and the configured paths.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(check_privilege(config.devices, running_as_root()));

    match &config.out {
        Some(out) => results.push(check_output_writable(out)),
        None => results.push(CheckResult::skip(
            "output directory writable",
            "no output path configured (ROOTPACK_OUT)",
        )),
    }

    match &config.src {
        Some(src) => results.push(check_staging_present(src)),
        None => results.push(CheckResult::skip(
            "staging directory",
            "no staging directory configured (ROOTPACK_SRC)",
        )),
    }

    if let Some(warning) = config.load_command_warning() {
        results.push(CheckResult::warn("load command", &warning));
    }

    results
}

/// Root is only needed for creating device nodes in the staging tree.
pub fn check_privilege(devices: DevicePolicy, is_root: bool) -> CheckResult {
    match (is_root, devices) {
        (true, _) => CheckResult::pass_with("effective uid", "root"),
        (false, DevicePolicy::Mknod) => CheckResult::fail(
            "effective uid",
            "not root - the mknod device policy needs root (use --devices image instead)",
        ),
        (false, _) => CheckResult::warn(
            "effective uid",
            "not root - fine for packing, needed only for --devices mknod",
        ),
    }
}

/// The output's directory must accept new files.
pub fn check_output_writable(out: &Path) -> CheckResult {
    let name = "output directory writable";
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    if !dir.exists() {
        if let Err(e) = fs::create_dir_all(dir) {
            return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
        }
    }

    let marker = dir.join(".rootpack-preflight");
    match fs::write(&marker, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&marker);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

/// Missing staging is only a warning: `stage` may create it later.
pub fn check_staging_present(src: &Path) -> CheckResult {
    let name = "staging directory";
    if !src.is_dir() {
        return CheckResult::warn(
            name,
            &format!("{} does not exist yet (run `rootpack stage`)", src.display()),
        );
    }
    match is_dir_empty(src) {
        Ok(true) => CheckResult::warn(name, &format!("{} is empty", src.display())),
        Ok(false) => CheckResult::pass_with(name, &src.display().to_string()),
        Err(e) => CheckResult::fail(name, &e.to_string()),
    }
}
