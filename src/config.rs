//! Configuration management for rootpack.
//!
//! Values come from, in increasing precedence: built-in defaults, a `.env`
//! file, process environment variables (`ROOTPACK_*`), then CLI flags.
//! Everything is parsed and validated here so the packager only ever sees
//! a complete [`PackRequest`](crate::image::PackRequest).

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::image::PackRequest;
use crate::staging::devices::{default_device_table, DeviceNode};
use crate::units::{self, human_bytes, RamWindow, MIB};

/// Limit used when neither a size nor a RAM window is configured.
pub const DEFAULT_MAX_SIZE: u64 = 100 * MIB;

/// Default pinned timestamp (seconds since the epoch) for reproducible images.
pub const DEFAULT_EPOCH: u64 = 0;

pub const DEFAULT_LABEL: &str = "rootfs";

/// Filesystem written into the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageFormat {
    Ext4,
    Ext2,
}

impl ImageFormat {
    /// Formatter binary for this format.
    pub fn mkfs_tool(self) -> &'static str {
        match self {
            Self::Ext4 => "mkfs.ext4",
            Self::Ext2 => "mkfs.ext2",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ext4 => "ext4",
            Self::Ext2 => "ext2",
        })
    }
}

/// How large the image file is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Sizing {
    /// Projected content size plus slack, never above the limit.
    Fit,
    /// Exactly the limit (the whole RAM window).
    Fill,
}

/// Where the skeleton's `/dev` nodes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DevicePolicy {
    /// Written into the image with debugfs; no privilege needed.
    Image,
    /// Created in the staging tree with mknod(2); needs root.
    Mknod,
    /// No static nodes; rely on devtmpfs at boot.
    #[value(name = "none")]
    Devtmpfs,
}

fn parse_enum<T: ValueEnum>(key: &str, value: &str) -> Result<T> {
    T::from_str(value, true).map_err(|_| {
        let choices: Vec<String> = T::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        anyhow::anyhow!(
            "invalid {} '{}' (expected one of: {})",
            key,
            value,
            choices.join(", ")
        )
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("invalid {} '{}' (expected true or false)", key, value),
    }
}

/// rootpack configuration from `.env` and the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Staging directory (`ROOTPACK_SRC`)
    pub src: Option<PathBuf>,
    /// Output image path (`ROOTPACK_OUT`)
    pub out: Option<PathBuf>,
    /// Size limit in bytes (`ROOTPACK_MAX_SIZE`)
    pub max_size: Option<u64>,
    /// RAM window the limit is derived from (`ROOTPACK_RAM_WINDOW`)
    pub ram_window: Option<RamWindow>,
    pub format: ImageFormat,
    pub sizing: Sizing,
    /// Force uid/gid 0 on every inode (`ROOTPACK_ALL_ROOT`)
    pub all_root: bool,
    pub devices: DevicePolicy,
    /// Pinned timestamp for reproducible output (`ROOTPACK_EPOCH`)
    pub epoch: u64,
    pub label: String,
    /// Boot-loader command the image is loaded with. Informational only.
    pub load_command: Option<String>,
    /// BusyBox `make install` output (`ROOTPACK_BUSYBOX`)
    pub busybox: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src: None,
            out: None,
            max_size: None,
            ram_window: None,
            format: ImageFormat::Ext4,
            sizing: Sizing::Fit,
            all_root: true,
            devices: DevicePolicy::Image,
            epoch: DEFAULT_EPOCH,
            label: DEFAULT_LABEL.to_string(),
            load_command: None,
            busybox: None,
        }
    }
}

impl Config {
    /// Load from the process environment (call `dotenvy::dotenv()` first).
    pub fn load() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("ROOTPACK_"))
            .collect();
        Self::from_vars(&vars)
    }

    /// Build a config from a variable map; unknown keys are ignored.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        config.src = get("ROOTPACK_SRC").map(PathBuf::from);
        config.out = get("ROOTPACK_OUT").map(PathBuf::from);
        config.busybox = get("ROOTPACK_BUSYBOX").map(PathBuf::from);
        config.load_command = get("ROOTPACK_LOAD_COMMAND").map(str::to_string);

        if let Some(v) = get("ROOTPACK_MAX_SIZE") {
            config.max_size =
                Some(units::parse_size(v).context("ROOTPACK_MAX_SIZE")?);
        }
        if let Some(v) = get("ROOTPACK_RAM_WINDOW") {
            config.ram_window = Some(v.parse().context("ROOTPACK_RAM_WINDOW")?);
        }
        if let Some(v) = get("ROOTPACK_FORMAT") {
            config.format = parse_enum("ROOTPACK_FORMAT", v)?;
        }
        if let Some(v) = get("ROOTPACK_SIZING") {
            config.sizing = parse_enum("ROOTPACK_SIZING", v)?;
        }
        if let Some(v) = get("ROOTPACK_DEVICES") {
            config.devices = parse_enum("ROOTPACK_DEVICES", v)?;
        }
        if let Some(v) = get("ROOTPACK_ALL_ROOT") {
            config.all_root = parse_bool("ROOTPACK_ALL_ROOT", v)?;
        }
        if let Some(v) = get("ROOTPACK_EPOCH") {
            config.epoch = v
                .parse()
                .with_context(|| format!("invalid ROOTPACK_EPOCH '{}'", v))?;
        }
        if let Some(v) = get("ROOTPACK_LABEL") {
            config.label = v.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides on top of the loaded values.
    pub fn apply(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(ref src) = overrides.src {
            self.src = Some(src.clone());
        }
        if let Some(ref out) = overrides.out {
            self.out = Some(out.clone());
        }
        if let Some(ref busybox) = overrides.busybox {
            self.busybox = Some(busybox.clone());
        }
        if let Some(max) = overrides.max_size {
            self.max_size = Some(max);
        }
        if let Some(window) = overrides.ram_window {
            self.ram_window = Some(window);
            // A window on the command line replaces an environment limit.
            if overrides.max_size.is_none() {
                self.max_size = None;
            }
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        if let Some(sizing) = overrides.sizing {
            self.sizing = sizing;
        }
        if let Some(devices) = overrides.devices {
            self.devices = devices;
        }
        if let Some(all_root) = overrides.all_root {
            self.all_root = all_root;
        }
        if let Some(epoch) = overrides.epoch {
            self.epoch = epoch;
        }
        if let Some(ref label) = overrides.label {
            self.label = label.clone();
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if let (Some(max), Some(window)) = (self.max_size, self.ram_window) {
            if max > window.len() {
                bail!(
                    "size limit {} is larger than the RAM window {} ({})",
                    human_bytes(max),
                    window,
                    human_bytes(window.len())
                );
            }
        }
        // ext labels are at most 16 bytes
        if self.label.len() > 16 {
            bail!("volume label '{}' is longer than 16 bytes", self.label);
        }
        Ok(())
    }

    /// Effective size limit: explicit size, else the RAM window, else the default.
    pub fn effective_max_size(&self) -> u64 {
        self.max_size
            .or_else(|| self.ram_window.map(|w| w.len()))
            .unwrap_or(DEFAULT_MAX_SIZE)
    }

    /// A warning when the configured load command cannot read this format.
    ///
    /// The board notes load an ext4 image with `fatload`; that pairing is
    /// reported rather than silently changed on either side.
    pub fn load_command_warning(&self) -> Option<String> {
        let cmd = self.load_command.as_deref()?;
        let loader = cmd.split_whitespace().next()?;
        if loader.starts_with("fat") {
            Some(format!(
                "load command '{}' reads FAT filesystems but the image is {}; \
                 pick a loader that matches the image (e.g. ext4load) or change the format",
                loader, self.format
            ))
        } else {
            None
        }
    }

    /// Resolve into a packaging request; source and output must be set.
    pub fn pack_request(&self) -> Result<PackRequest> {
        let Some(src) = self.src.clone() else {
            bail!("no staging directory: pass --src or set ROOTPACK_SRC");
        };
        let Some(out) = self.out.clone() else {
            bail!("no output image path: pass --out or set ROOTPACK_OUT");
        };

        let mut request = PackRequest::new(src, out, self.effective_max_size());
        request.format = self.format;
        request.sizing = self.sizing;
        request.all_root = self.all_root;
        request.epoch = self.epoch;
        request.label = self.label.clone();
        request.devices = self.injected_devices();
        Ok(request)
    }

    /// Device nodes the packager writes into the image.
    pub fn injected_devices(&self) -> Vec<DeviceNode> {
        match self.devices {
            DevicePolicy::Image => default_device_table(),
            DevicePolicy::Mknod | DevicePolicy::Devtmpfs => Vec::new(),
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(unset)".to_string())
        };
        println!("Configuration:");
        println!("  ROOTPACK_SRC: {}", show(&self.src));
        println!("  ROOTPACK_OUT: {}", show(&self.out));
        println!("  ROOTPACK_BUSYBOX: {}", show(&self.busybox));
        match self.ram_window {
            Some(window) => println!("  ROOTPACK_RAM_WINDOW: {} ({})", window, human_bytes(window.len())),
            None => println!("  ROOTPACK_RAM_WINDOW: (unset)"),
        }
        println!(
            "  Size limit: {} ({} bytes)",
            human_bytes(self.effective_max_size()),
            self.effective_max_size()
        );
        println!("  ROOTPACK_FORMAT: {}", self.format);
        println!("  ROOTPACK_SIZING: {:?}", self.sizing);
        println!("  ROOTPACK_DEVICES: {:?}", self.devices);
        println!("  ROOTPACK_ALL_ROOT: {}", self.all_root);
        println!("  ROOTPACK_EPOCH: {}", self.epoch);
        println!("  ROOTPACK_LABEL: {}", self.label);
        println!(
            "  ROOTPACK_LOAD_COMMAND: {}",
            self.load_command.as_deref().unwrap_or("(unset)")
        );
        if let Some(warning) = self.load_command_warning() {
            println!("  WARNING: {}", warning);
        }
    }
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub src: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub busybox: Option<PathBuf>,
    pub max_size: Option<u64>,
    pub ram_window: Option<RamWindow>,
    pub format: Option<ImageFormat>,
    pub sizing: Option<Sizing>,
    pub devices: Option<DevicePolicy>,
    pub all_root: Option<bool>,
    pub epoch: Option<u64>,
    pub label: Option<String>,
}
