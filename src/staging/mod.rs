//! Staging directory assembly.
//!
//! Replaces the hand-edited `rootfs.sh`: copy the BusyBox install tree,
//! add the skeleton, and optionally create `/dev` nodes.
//!
//! # Atomicity
//!
//! The tree is built in `<staging>.work` and only renamed onto the
//! staging path once every step succeeded, so an interrupted run never
//! leaves a half-populated staging directory behind.

pub mod busybox;
pub mod devices;
pub mod skeleton;

use std::fs;
use std::path::PathBuf;

use crate::common::{cleanup_work_dir, is_dir_empty, prepare_work_dir, with_suffix};
use crate::config::DevicePolicy;
use crate::error::{IoResultExt, PackagingError, Result};

pub use busybox::CopyStats;
pub use devices::{default_device_table, DeviceNode};
pub use skeleton::SkeletonOptions;

#[derive(Debug, Clone)]
pub struct StageRequest {
    /// BusyBox `make install` output (`CONFIG_PREFIX`).
    pub busybox: PathBuf,
    pub staging: PathBuf,
    pub devices: DevicePolicy,
    /// Replace a non-empty staging directory.
    pub force: bool,
    pub skeleton: SkeletonOptions,
}

impl StageRequest {
    pub fn new(busybox: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            busybox: busybox.into(),
            staging: staging.into(),
            devices: DevicePolicy::Image,
            force: false,
            skeleton: SkeletonOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub staging: PathBuf,
    pub copied: CopyStats,
    pub dirs_created: usize,
    pub files_written: usize,
    /// `/init` and `/linuxrc` links added.
    pub links_created: usize,
    pub devices_created: usize,
    /// Nodes left for the packager to write into the image.
    pub devices_deferred: usize,
}

/// Build the staging directory described by `req`.
pub fn stage(req: &StageRequest) -> Result<StageReport> {
    busybox::check_install_tree(&req.busybox)?;

    if req.staging.symlink_metadata().is_ok() {
        let occupied = !req.staging.is_dir() || !is_dir_empty(&req.staging)?;
        if occupied && !req.force {
            return Err(PackagingError::StagingDirNotEmpty {
                path: req.staging.clone(),
            });
        }
    }

    if req.devices == DevicePolicy::Mknod && !devices::running_as_root() {
        return Err(PackagingError::PermissionDenied {
            action: "creating device nodes (mknod needs root) in".to_string(),
            path: req.staging.clone(),
        });
    }

    let work = with_suffix(&req.staging, ".work");
    prepare_work_dir(&work)?;

    let built = (|| -> Result<StageReport> {
        let mut report = StageReport {
            staging: req.staging.clone(),
            ..Default::default()
        };

        report.copied = busybox::copy_tree(&req.busybox, &work)?;
        report.dirs_created = skeleton::create_directories(&work)?;
        report.files_written = skeleton::write_config_files(&work, &req.skeleton)?;
        report.links_created = skeleton::create_boot_links(&work)?;

        let table = default_device_table();
        match req.devices {
            DevicePolicy::Mknod => {
                report.devices_created = devices::create_nodes(&work, &table)?;
            }
            DevicePolicy::Image => report.devices_deferred = table.len(),
            DevicePolicy::Devtmpfs => {}
        }
        Ok(report)
    })();

    let report = match built {
        Ok(report) => report,
        Err(e) => {
            cleanup_work_dir(&work);
            return Err(e);
        }
    };

    if req.staging.symlink_metadata().is_ok() {
        if req.staging.is_dir() {
            fs::remove_dir_all(&req.staging).during("removing", &req.staging)?;
        } else {
            fs::remove_file(&req.staging).during("removing", &req.staging)?;
        }
    }
    fs::rename(&work, &req.staging).during("renaming staging work directory onto", &req.staging)?;

    tracing::info!(
        staging = %req.staging.display(),
        files = report.copied.files,
        symlinks = report.copied.symlinks,
        "staging directory ready"
    );
    Ok(report)
}
