//! Verify command - compare an image with its staging directory.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::timing::Timer;
use crate::verify::{verify_image, VerifyOptions};

/// Execute the verify command.
pub fn cmd_verify(image: &Path, config: &Config) -> Result<()> {
    let Some(staging) = config.src.as_deref() else {
        bail!("no staging directory: pass --src or set ROOTPACK_SRC");
    };

    println!("=== Verifying Image ===\n");
    println!("  Image:   {}", image.display());
    println!("  Staging: {}\n", staging.display());

    let timer = Timer::start("verify");
    let report = verify_image(
        image,
        staging,
        &VerifyOptions {
            all_root: config.all_root,
            devices: config.injected_devices(),
        },
    )?;
    timer.finish();

    if report.is_clean() {
        println!(
            "\nImage matches staging directory ({} entries).",
            report.expected_entries
        );
        return Ok(());
    }

    println!();
    for diff in &report.differences {
        println!("  {}", diff);
    }
    bail!(
        "Image does not match staging directory: {} difference(s)",
        report.differences.len()
    )
}
