//! Extract command - copy an image's contents into a directory.

use anyhow::{bail, Result};
use std::path::Path;

use crate::common::is_dir_empty;
use crate::verify::extract_image;

/// Execute the extract command.
pub fn cmd_extract(image: &Path, dest: &Path) -> Result<()> {
    if dest.is_dir() && !is_dir_empty(dest)? {
        bail!("{} is not empty", dest.display());
    }

    println!("Extracting {} to {}...", image.display(), dest.display());
    let count = extract_image(image, dest)?;
    println!("Extracted {} top-level entries.", count);
    println!("Note: device nodes and ownership need root to recreate and are not extracted.");
    Ok(())
}
