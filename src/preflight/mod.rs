//! Preflight checks for rootpack.
//!
//! Validates host tools and the configured paths before packing.
//! Run with `rootpack preflight` to check everything is ready.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use host_tools::parse_version;
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(config.format));

    println!("Checking environment...");
    checks.extend(environment::check_environment(config));

    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
///
/// With `strict`, warnings fail too.
pub fn run_preflight_or_fail(config: &Config, strict: bool) -> Result<()> {
    let report = run_preflight(config);
    report.print();
    check_report(&report, strict)?;
    println!("All preflight checks passed!\n");
    Ok(())
}

fn check_report(report: &PreflightReport, strict: bool) -> Result<()> {
    if !report.all_passed() {
        bail!(
            "Preflight failed: {}. Fix the issues above before packing.",
            report.names(CheckStatus::Fail).join(", ")
        );
    }
    if strict && report.warn_count() > 0 {
        bail!(
            "Preflight failed in strict mode: {}",
            report.names(CheckStatus::Warn).join(", ")
        );
    }
    Ok(())
}
