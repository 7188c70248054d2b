//! rootpack - packs a BusyBox root filesystem into a RAM-loadable image.
//!
//! Turns a staging directory into one ext4 (or ext2) image whose size never
//! exceeds the boot loader's RAM window, without mounting anything or
//! needing root.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rootpack::commands::{self, PackOptions, ShowTarget, StageOptions};
use rootpack::config::{Config, DevicePolicy, ImageFormat, Overrides, Sizing};
use rootpack::units::{parse_size, RamWindow};
use rootpack::PackagingError;

#[derive(Parser)]
#[command(name = "rootpack")]
#[command(about = "Root filesystem image packager for RAM-loaded boards")]
#[command(
    after_help = "QUICK START:\n  rootpack preflight                         Check host tools\n  rootpack stage --busybox _install --src rootfs\n  rootpack pack --src rootfs --out rootfs.img --max-size 100M\n  rootpack verify rootfs.img --src rootfs"
)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a staging directory into a filesystem image
    Pack {
        #[command(flatten)]
        image: ImageArgs,

        /// Output image path (ROOTPACK_OUT)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum image size: bytes, K/M/G, KiB/MiB/GiB or hex (ROOTPACK_MAX_SIZE)
        #[arg(long, value_parser = parse_size)]
        max_size: Option<u64>,

        /// RAM load window START-END; the limit becomes END - START (ROOTPACK_RAM_WINDOW)
        #[arg(long)]
        ram_window: Option<RamWindow>,

        #[arg(long, value_enum)]
        format: Option<ImageFormat>,

        /// fit: as small as the content allows; fill: exactly the limit
        #[arg(long, value_enum)]
        sizing: Option<Sizing>,

        /// Pinned timestamp for every inode (ROOTPACK_EPOCH)
        #[arg(long)]
        epoch: Option<u64>,

        /// Volume label, at most 16 bytes
        #[arg(long)]
        label: Option<String>,

        /// Also write the staging manifest as JSON
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Read the image back and compare it with the staging directory
        #[arg(long)]
        verify: bool,
    },

    /// Build a staging directory from a BusyBox install tree
    Stage {
        /// BusyBox `make install` output (ROOTPACK_BUSYBOX)
        #[arg(long)]
        busybox: Option<PathBuf>,

        /// Staging directory to create (ROOTPACK_SRC)
        #[arg(long)]
        src: Option<PathBuf>,

        #[arg(long, value_enum)]
        devices: Option<DevicePolicy>,

        /// Replace a non-empty staging directory
        #[arg(long)]
        force: bool,

        /// Contents of /etc/hostname (default: busybox)
        #[arg(long)]
        hostname: Option<String>,

        /// Serial console for the login shell (default: ttyS0)
        #[arg(long)]
        console: Option<String>,
    },

    /// Print the manifest of a directory tree as JSON
    Manifest {
        dir: PathBuf,

        /// Include SHA-256 of every regular file
        #[arg(long)]
        contents: bool,

        /// Print only the manifest digest
        #[arg(long)]
        digest: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare an image with the staging directory it was packed from
    Verify {
        image: PathBuf,

        #[command(flatten)]
        image_args: ImageArgs,
    },

    /// Copy an image's files, directories and symlinks into a directory
    Extract { image: PathBuf, dest: PathBuf },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },

    /// Run preflight checks (host tools, privilege, paths)
    Preflight {
        /// Fail on warnings as well as failures
        #[arg(long)]
        strict: bool,

        #[arg(long, value_enum)]
        format: Option<ImageFormat>,

        #[arg(long, value_enum)]
        devices: Option<DevicePolicy>,
    },
}

/// Options shared by commands that describe an image's content.
#[derive(Args)]
struct ImageArgs {
    /// Staging directory (ROOTPACK_SRC)
    #[arg(long)]
    src: Option<PathBuf>,

    /// Where /dev nodes come from (ROOTPACK_DEVICES)
    #[arg(long, value_enum)]
    devices: Option<DevicePolicy>,

    /// Own every inode as root (default)
    #[arg(long, overrides_with = "no_all_root")]
    all_root: bool,

    /// Keep the staging tree's uid/gid
    #[arg(long, overrides_with = "all_root")]
    no_all_root: bool,
}

impl ImageArgs {
    fn all_root(&self) -> Option<bool> {
        if self.no_all_root {
            Some(false)
        } else if self.all_root {
            Some(true)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show resolved configuration
    Config,
    /// List every inode of an image
    Image { image: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err),
    }
}

fn run(command: Commands) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    match command {
        Commands::Pack {
            image,
            out,
            max_size,
            ram_window,
            format,
            sizing,
            epoch,
            label,
            manifest,
            verify,
        } => {
            config.apply(&Overrides {
                src: image.src.clone(),
                out,
                max_size,
                ram_window,
                format,
                sizing,
                devices: image.devices,
                all_root: image.all_root(),
                epoch,
                label,
                ..Default::default()
            })?;
            commands::cmd_pack(&config, &PackOptions { manifest, verify })?;
        }
        Commands::Stage {
            busybox,
            src,
            devices,
            force,
            hostname,
            console,
        } => {
            config.apply(&Overrides {
                src,
                busybox,
                devices,
                ..Default::default()
            })?;
            commands::cmd_stage(
                &config,
                &StageOptions {
                    force,
                    hostname,
                    console,
                },
            )?;
        }
        Commands::Manifest {
            dir,
            contents,
            digest,
            output,
        } => {
            commands::cmd_manifest(&dir, contents, digest, output.as_deref())?;
        }
        Commands::Verify { image, image_args } => {
            config.apply(&Overrides {
                src: image_args.src.clone(),
                devices: image_args.devices,
                all_root: image_args.all_root(),
                ..Default::default()
            })?;
            commands::cmd_verify(&image, &config)?;
        }
        Commands::Extract { image, dest } => {
            commands::cmd_extract(&image, &dest)?;
        }
        Commands::Show { what } => match what {
            ShowCommand::Config => commands::cmd_show(ShowTarget::Config, &config)?,
            ShowCommand::Image { image } => {
                commands::cmd_show(ShowTarget::Image(&image), &config)?
            }
        },
        Commands::Preflight {
            strict,
            format,
            devices,
        } => {
            config.apply(&Overrides {
                format,
                devices,
                ..Default::default()
            })?;
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}

/// Print `error[kind]: message` and map the failure kind to an exit code.
fn report_error(err: &anyhow::Error) -> ExitCode {
    match err.chain().find_map(|e| e.downcast_ref::<PackagingError>()) {
        Some(packaging) => {
            eprintln!("error[{}]: {:#}", packaging.kind(), err);
            ExitCode::from(packaging.exit_code())
        }
        None => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
