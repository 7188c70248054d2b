//! Preflight command - runs preflight checks.

use anyhow::Result;

use crate::config::Config;
use crate::preflight;

/// Execute the preflight command. Failed checks always fail the command;
/// `strict` makes warnings fail it too.
pub fn cmd_preflight(config: &Config, strict: bool) -> Result<()> {
    preflight::run_preflight_or_fail(config, strict)
}
