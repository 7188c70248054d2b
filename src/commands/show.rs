//! Show command - displays information.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::image::debugfs::list_image;
use crate::units::human_bytes;

/// Show target for the show command.
pub enum ShowTarget<'a> {
    /// Show configuration
    Config,
    /// List an image's inodes
    Image(&'a Path),
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget<'_>, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Image(image) => {
            let entries = list_image(image)?;
            for entry in &entries {
                let size = match entry.rdev {
                    Some((major, minor)) => format!("{}, {}", major, minor),
                    None => entry.size.map(human_bytes).unwrap_or_default(),
                };
                println!(
                    "{:06o} {:>5}:{:<5} {:>10}  {}",
                    entry.mode, entry.uid, entry.gid, size, entry.path
                );
            }
            println!("\n{} entries", entries.len());
        }
    }
    Ok(())
}
