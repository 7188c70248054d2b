//! Image size projection.
//!
//! Estimates how many bytes an ext2/ext4 filesystem (4 KiB blocks, 256
//! byte inodes, no journal) needs to hold a manifest, so oversized trees
//! are rejected before any tool runs.

use std::collections::{BTreeMap, HashSet};

use crate::config::Sizing;
use crate::error::{PackagingError, Result};
use crate::manifest::{EntryKind, Manifest};
use crate::staging::DeviceNode;
use crate::units::{round_up, MIB};

pub const BLOCK_SIZE: u64 = 4096;
pub const INODE_SIZE: u64 = 256;
const BLOCKS_PER_GROUP: u64 = 8 * BLOCK_SIZE;
/// Symlink targets shorter than this live inside the inode.
const FAST_SYMLINK_MAX: u64 = 59;
/// Reserved inodes (1..=10) plus lost+found.
const RESERVED_INODES: u64 = 11;
/// Superblock, group descriptors, reserved GDT blocks.
const FIXED_OVERHEAD: u64 = MIB;
/// Images smaller than this are not worth formatting.
pub const MIN_IMAGE_SIZE: u64 = 4 * MIB;

/// Sizes worked out for one packaging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePlan {
    /// Estimated bytes the filesystem needs.
    pub projected: u64,
    /// Bytes the image file will have.
    pub image_size: u64,
    /// Inode count passed to mkfs.
    pub inodes: u64,
    pub max_size: u64,
}

/// Directory entry size on disk: 8 byte header plus name, 4-byte aligned.
fn dirent_len(name: &str) -> u64 {
    round_up(8 + name.len() as u64, 4)
}

impl ImagePlan {
    /// Project the size of `manifest` plus `extra_devices` and check it
    /// against `max_size`.
    pub fn new(
        manifest: &Manifest,
        extra_devices: &[DeviceNode],
        max_size: u64,
        sizing: Sizing,
    ) -> Result<Self> {
        let inodes = Self::inode_count(manifest, extra_devices);
        let projected = Self::project(manifest, extra_devices, inodes);

        if projected > max_size {
            return Err(PackagingError::SizeExceeded {
                projected,
                max: max_size,
            });
        }

        let max_blocks = max_size / BLOCK_SIZE * BLOCK_SIZE;
        let image_size = match sizing {
            Sizing::Fill => max_blocks,
            Sizing::Fit => round_up(projected, MIB).max(MIN_IMAGE_SIZE).min(max_blocks),
        };

        Ok(Self {
            projected,
            image_size,
            inodes,
            max_size,
        })
    }

    /// Inodes for every entry with a quarter on top for later edits.
    pub fn inode_count(manifest: &Manifest, extra_devices: &[DeviceNode]) -> u64 {
        let used = manifest.stats().entries() as u64 + extra_devices.len() as u64;
        let wanted = used + used / 4 + RESERVED_INODES;
        wanted.max(128)
    }

    fn project(manifest: &Manifest, extra_devices: &[DeviceNode], inodes: u64) -> u64 {
        let mut blocks: u64 = 0;
        let mut seen_inodes = HashSet::new();
        let mut dir_bytes: BTreeMap<&str, u64> = BTreeMap::new();

        for entry in &manifest.entries {
            match entry.kind {
                EntryKind::File => {
                    let first = entry.inode.map_or(true, |id| seen_inodes.insert(id));
                    if first {
                        blocks += entry.size.div_ceil(BLOCK_SIZE);
                    }
                }
                EntryKind::Symlink if entry.size > FAST_SYMLINK_MAX => blocks += 1,
                EntryKind::Dir => {
                    // "." and ".."
                    *dir_bytes.entry(entry.path.as_str()).or_insert(0) += 24;
                }
                _ => {}
            }
            if let Some(parent) = entry.parent() {
                *dir_bytes.entry(parent).or_insert(0) += dirent_len(entry.name());
            }
        }
        for node in extra_devices {
            *dir_bytes.entry(node.parent()).or_insert(0) += dirent_len(node.name());
        }

        // lost+found is preallocated with 4 blocks
        blocks += 4;
        blocks += dir_bytes
            .values()
            .map(|bytes| bytes.div_ceil(BLOCK_SIZE).max(1))
            .sum::<u64>();
        blocks += (inodes * INODE_SIZE).div_ceil(BLOCK_SIZE);

        // two bitmaps per group, one extra pass since bitmaps add blocks too
        let groups = (blocks + blocks / 8).div_ceil(BLOCKS_PER_GROUP).max(1);
        blocks += groups * 2;

        let bytes = blocks * BLOCK_SIZE + FIXED_OVERHEAD;
        // 5% slack for extent blocks and allocator fragmentation
        round_up(bytes + bytes / 20, BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use std::path::PathBuf;

    fn entry(path: &str, kind: EntryKind, size: u64) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            kind,
            mode: 0o755,
            uid: 0,
            gid: 0,
            size,
            target: None,
            rdev: None,
            sha256: None,
            inode: None,
            host_path: PathBuf::from(path.trim_start_matches('/')),
        }
    }

    fn tree_with_payload(bytes: u64) -> Manifest {
        Manifest::from_entries(
            PathBuf::from("/staging"),
            vec![
                entry("/", EntryKind::Dir, 0),
                entry("/bin", EntryKind::Dir, 0),
                entry("/bin/busybox", EntryKind::File, bytes),
                entry("/bin/sh", EntryKind::Symlink, 7),
            ],
        )
    }

    #[test]
    fn test_80_mib_fits_in_100_mib() {
        let manifest = tree_with_payload(80 * MIB);
        let plan = ImagePlan::new(&manifest, &[], 100 * MIB, Sizing::Fit).unwrap();
        assert!(plan.projected > 80 * MIB);
        assert!(plan.image_size <= 100 * MIB);
        assert!(plan.image_size >= plan.projected);
        assert_eq!(plan.image_size % MIB, 0);
    }

    #[test]
    fn test_120_mib_exceeds_100_mib() {
        let manifest = tree_with_payload(120 * MIB);
        let err = ImagePlan::new(&manifest, &[], 100 * MIB, Sizing::Fit).unwrap_err();
        match err {
            PackagingError::SizeExceeded { projected, max } => {
                assert!(projected > 120 * MIB);
                assert_eq!(max, 100 * MIB);
            }
            other => panic!("expected SizeExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_fill_uses_whole_window() {
        let manifest = tree_with_payload(MIB);
        let window = 0x06E0_0000;
        let plan = ImagePlan::new(&manifest, &[], window, Sizing::Fill).unwrap();
        assert_eq!(plan.image_size, window);
    }

    #[test]
    fn test_small_trees_get_minimum_size() {
        let manifest = tree_with_payload(10);
        let plan = ImagePlan::new(&manifest, &[], 100 * MIB, Sizing::Fit).unwrap();
        assert_eq!(plan.image_size, MIN_IMAGE_SIZE);
    }

    #[test]
    fn test_fit_never_exceeds_limit() {
        let manifest = tree_with_payload(10);
        let plan = ImagePlan::new(&manifest, &[], 3 * MIB, Sizing::Fit).unwrap();
        assert_eq!(plan.image_size, 3 * MIB);
    }

    #[test]
    fn test_hard_links_are_not_double_counted() {
        let mut a = entry("/bin/busybox", EntryKind::File, 10 * MIB);
        a.inode = Some((1, 42));
        let mut b = entry("/bin/ash", EntryKind::File, 10 * MIB);
        b.inode = Some((1, 42));
        let linked = Manifest::from_entries(
            PathBuf::from("/staging"),
            vec![entry("/", EntryKind::Dir, 0), entry("/bin", EntryKind::Dir, 0), a, b],
        );
        let plan = ImagePlan::new(&linked, &[], 100 * MIB, Sizing::Fit).unwrap();
        assert!(plan.projected < 15 * MIB);
    }

    #[test]
    fn test_inode_count_has_headroom() {
        let manifest = tree_with_payload(MIB);
        let devices = crate::staging::default_device_table();
        let inodes = ImagePlan::inode_count(&manifest, &devices);
        assert!(inodes >= 128);
        assert!(inodes > (4 + devices.len()) as u64);
    }
}
