//! Host tool availability checks.

use crate::config::ImageFormat;
use crate::process::{self, Cmd};

use super::types::CheckResult;

/// First e2fsprogs release whose mke2fs and debugfs both honor a pinned
/// build time.
const REPRODUCIBLE_SINCE: (u32, u32, u32) = (1, 47, 1);

/// Check the e2fsprogs tools the packager runs.
pub fn check_host_tools(format: ImageFormat) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for candidate in [ImageFormat::Ext4, ImageFormat::Ext2] {
        let tool = candidate.mkfs_tool();
        let required = candidate == format;
        let purpose = if required {
            format!("Required to create {} images", candidate)
        } else {
            format!("Only needed with --format {}", candidate)
        };
        results.push(check_tool_exists(tool, "e2fsprogs", &purpose, required));
    }

    results.push(check_tool_exists(
        "debugfs",
        "e2fsprogs",
        "Required to write device nodes and ownership into the image",
        true,
    ));

    results.extend(check_mke2fs());
    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

/// `-d` support and version of mke2fs.
fn check_mke2fs() -> Vec<CheckResult> {
    if !process::exists("mke2fs") {
        return vec![CheckResult::fail(
            "mke2fs -d",
            "mke2fs not found. Install 'e2fsprogs' package.",
        )];
    }

    let mut results = Vec::new();

    // Without arguments mke2fs prints its usage and exits non-zero.
    let usage = Cmd::new("mke2fs").allow_fail().run();
    match usage {
        Ok(out) if supports_populate(&out.stderr) => {
            results.push(CheckResult::pass("mke2fs -d"));
        }
        Ok(_) => results.push(CheckResult::fail(
            "mke2fs -d",
            "mke2fs cannot populate from a directory. e2fsprogs 1.43 or newer is required.",
        )),
        Err(e) => results.push(CheckResult::fail("mke2fs -d", &format!("{:#}", e))),
    }

    let banner = Cmd::new("mke2fs").arg("-V").allow_fail().run();
    let version = banner
        .ok()
        .and_then(|out| parse_version(&out.stderr).or_else(|| parse_version(&out.stdout)));
    match version {
        Some(v) if v >= REPRODUCIBLE_SINCE => results.push(CheckResult::pass_with(
            "e2fsprogs version",
            &format!("{}.{}.{}", v.0, v.1, v.2),
        )),
        Some(v) => results.push(CheckResult::warn(
            "e2fsprogs version",
            &format!(
                "{}.{}.{} - images may not be byte-identical across runs (1.47.1+ pins all timestamps)",
                v.0, v.1, v.2
            ),
        )),
        None => results.push(CheckResult::warn(
            "e2fsprogs version",
            "Could not determine mke2fs version",
        )),
    }

    results
}

fn supports_populate(usage: &str) -> bool {
    usage.contains("-d root-directory")
}

/// Parse `mke2fs 1.47.0 (5-Feb-2023)` into (1, 47, 0).
pub fn parse_version(banner: &str) -> Option<(u32, u32, u32)> {
    let line = banner.lines().find(|l| l.trim_start().starts_with("mke2fs "))?;
    let version = line.split_whitespace().nth(1)?;
    let mut parts = version.split('.').map(|p| {
        let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}
