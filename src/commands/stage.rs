//! Stage command - BusyBox install tree to staging directory.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::staging::{self, SkeletonOptions, StageRequest};
use crate::timing::Timer;

#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    /// Replace a non-empty staging directory.
    pub force: bool,
    pub hostname: Option<String>,
    pub console: Option<String>,
}

/// Execute the stage command.
pub fn cmd_stage(config: &Config, opts: &StageOptions) -> Result<()> {
    let Some(busybox) = config.busybox.clone() else {
        bail!("no BusyBox install tree: pass --busybox or set ROOTPACK_BUSYBOX");
    };
    let Some(staging) = config.src.clone() else {
        bail!("no staging directory: pass --src or set ROOTPACK_SRC");
    };

    let mut request = StageRequest::new(busybox, staging);
    request.devices = config.devices;
    request.force = opts.force;
    let defaults = SkeletonOptions::default();
    request.skeleton = SkeletonOptions {
        hostname: opts.hostname.clone().unwrap_or(defaults.hostname),
        console: opts.console.clone().unwrap_or(defaults.console),
    };

    println!("=== Staging Root Filesystem ===\n");
    println!("  BusyBox: {}", request.busybox.display());
    println!("  Staging: {}", request.staging.display());
    println!("  Devices: {:?}\n", request.devices);

    let timer = Timer::start("stage");
    let report = staging::stage(&request)?;
    timer.finish();

    println!("\n=== Staging Complete ===");
    println!(
        "  Copied: {} dirs, {} files, {} symlinks",
        report.copied.dirs, report.copied.files, report.copied.symlinks
    );
    if report.copied.skipped > 0 {
        println!("  Skipped: {} (sockets and other unsupported entries)", report.copied.skipped);
    }
    println!(
        "  Skeleton: {} dirs, {} config files, {} boot links",
        report.dirs_created, report.files_written, report.links_created
    );
    if report.devices_created > 0 {
        println!("  Device nodes created: {}", report.devices_created);
    }
    if report.devices_deferred > 0 {
        println!(
            "  Device nodes deferred to pack: {}",
            report.devices_deferred
        );
    }
    Ok(())
}
