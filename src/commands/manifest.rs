//! Manifest command - print a tree's manifest.

use anyhow::{Context, Result};
use std::path::Path;

use crate::common::write_file_with_dirs;
use crate::manifest::Manifest;

/// Execute the manifest command.
///
/// Prints JSON to stdout, or only the digest with `digest_only`.
pub fn cmd_manifest(dir: &Path, contents: bool, digest_only: bool, output: Option<&Path>) -> Result<()> {
    crate::image::check_staging(dir)?;

    let manifest = if contents || digest_only {
        Manifest::scan_with_contents(dir)?
    } else {
        Manifest::scan(dir)?
    };

    if digest_only {
        println!("{}", manifest.digest_hex());
        return Ok(());
    }

    let json = manifest.to_json().context("Failed to serialize manifest")?;
    match output {
        Some(path) => {
            write_file_with_dirs(path, &json)?;
            let stats = manifest.stats();
            println!(
                "Wrote {} entries to {}",
                stats.entries(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
