//! Byte sizes and RAM window parsing.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Parse a byte count: `104857600`, `0x6400000`, `100M`, `100MiB`, `512K`, `1G`.
///
/// Suffixes are binary (K = 1024).
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty size");
    }

    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex size '{}'", input))?
    } else {
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        if digits.is_empty() {
            bail!("invalid size '{}': expected a number", input);
        }
        let number: u64 = digits
            .parse()
            .with_context(|| format!("invalid size '{}'", input))?;
        let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kib" => KIB,
            "m" | "mib" => MIB,
            "g" | "gib" => GIB,
            other => bail!(
                "invalid size suffix '{}' in '{}' (use K, M, G, KiB, MiB or GiB)",
                other,
                input
            ),
        };
        number
            .checked_mul(multiplier)
            .with_context(|| format!("size '{}' overflows", input))?
    };

    if value == 0 {
        bail!("size must be greater than zero");
    }
    Ok(value)
}

/// Parse an address in hex (`0x89000000`) or decimal.
pub fn parse_address(input: &str) -> Result<u64> {
    let s = input.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid address '{}'", input))
}

/// Render a byte count for humans, e.g. `100.0 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Round `value` up to a multiple of `align` (a power of two or not).
pub fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// RAM region reserved by the boot loader for the image, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamWindow {
    pub start: u64,
    pub end: u64,
}

impl RamWindow {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if end <= start {
            bail!(
                "RAM window end 0x{:X} must be above start 0x{:X}",
                end,
                start
            );
        }
        Ok(Self { start, end })
    }

    /// Bytes available in the window.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

impl FromStr for RamWindow {
    type Err = anyhow::Error;

    /// `0x89000000-0x8FE00000`
    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .with_context(|| format!("invalid RAM window '{}': expected START-END", s))?;
        Self::new(parse_address(start)?, parse_address(end)?)
    }
}

impl fmt::Display for RamWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}-0x{:08X}", self.start, self.end)
    }
}
