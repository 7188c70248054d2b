//! Pack command - staging directory to image.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::common::write_file_with_dirs;
use crate::config::Config;
use crate::image::{self, PackReport};
use crate::manifest::Manifest;
use crate::timing::Timer;
use crate::units::human_bytes;
use crate::verify::{self, VerifyOptions};

/// Extras around the core packaging run.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Also write the staging manifest as JSON here.
    pub manifest: Option<PathBuf>,
    /// Read the image back and compare it with the staging tree.
    pub verify: bool,
}

/// Execute the pack command.
pub fn cmd_pack(config: &Config, opts: &PackOptions) -> Result<()> {
    let request = config.pack_request()?;

    println!("=== Packing Root Filesystem Image ===\n");
    println!("  Staging: {}", request.staging.display());
    println!("  Output:  {}", request.output.display());
    println!(
        "  Limit:   {} ({} bytes)",
        human_bytes(request.max_size),
        request.max_size
    );
    println!("  Format:  {} ({:?})", request.format, request.sizing);
    if let Some(warning) = config.load_command_warning() {
        println!("  WARNING: {}", warning);
    }
    println!();

    let timer = Timer::start("package");
    let report = image::package(&request)?;
    timer.finish();

    print_report(&report);

    if let Some(ref path) = opts.manifest {
        let manifest = Manifest::scan_with_contents(&request.staging)?;
        let json = manifest.to_json().context("Failed to serialize manifest")?;
        write_file_with_dirs(path, json)?;
        println!("  Manifest: {}", path.display());
    }

    if opts.verify {
        println!("\nVerifying image against staging directory...");
        let timer = Timer::start("verify");
        let verified = verify::verify_image(
            &request.output,
            &request.staging,
            &VerifyOptions {
                all_root: request.all_root,
                devices: request.devices.clone(),
            },
        )?;
        timer.finish();
        if !verified.is_clean() {
            for diff in &verified.differences {
                println!("  {}", diff);
            }
            bail!(
                "Image does not match staging directory: {} difference(s)",
                verified.differences.len()
            );
        }
        println!("  {} entries match", verified.expected_entries);
    }

    Ok(())
}

fn print_report(report: &PackReport) {
    println!("\n=== Image Complete ===");
    println!("  Output: {}", report.output.display());
    println!(
        "  Size: {} of {} allowed (projected {})",
        human_bytes(report.image_size),
        human_bytes(report.max_size),
        human_bytes(report.projected)
    );
    println!(
        "  Tree: {} dirs, {} files, {} symlinks, {} special ({})",
        report.stats.dirs,
        report.stats.files,
        report.stats.symlinks,
        report.stats.specials,
        human_bytes(report.stats.bytes)
    );
    if report.devices_injected > 0 {
        println!("  Device nodes added: {}", report.devices_injected);
    }
    println!("  UUID: {}", report.uuid);
    println!("  Manifest digest: {}", report.digest);
}
