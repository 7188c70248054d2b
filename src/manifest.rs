//! Deterministic description of a root filesystem tree.
//!
//! A manifest lists every entry below a root (sorted, symlinks not
//! followed) with the metadata that must survive packaging: kind,
//! permission bits, ownership, size, symlink target and device numbers.
//! Timestamps are deliberately absent so the digest only changes when
//! the tree's content does.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{IoResultExt, PackagingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    Char,
    Block,
    Fifo,
    Socket,
}

impl EntryKind {
    /// Kind from the `S_IFMT` bits of a mode.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & 0o170000 {
            0o040000 => Some(Self::Dir),
            0o100000 => Some(Self::File),
            0o120000 => Some(Self::Symlink),
            0o020000 => Some(Self::Char),
            0o060000 => Some(Self::Block),
            0o010000 => Some(Self::Fifo),
            0o140000 => Some(Self::Socket),
            _ => None,
        }
    }

    /// `S_IFMT` bits for this kind.
    pub fn type_bits(self) -> u32 {
        match self {
            Self::Dir => 0o040000,
            Self::File => 0o100000,
            Self::Symlink => 0o120000,
            Self::Char => 0o020000,
            Self::Block => 0o060000,
            Self::Fifo => 0o010000,
            Self::Socket => 0o140000,
        }
    }

    pub fn is_device(self) -> bool {
        matches!(self, Self::Char | Self::Block)
    }

    pub fn is_special(self) -> bool {
        matches!(self, Self::Char | Self::Block | Self::Fifo | Self::Socket)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::File => "file",
            Self::Symlink => "symlink",
            Self::Char => "char",
            Self::Block => "block",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
        }
    }
}

/// One file, directory, link or node in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// Absolute path inside the image, `/` for the root.
    pub path: String,
    pub kind: EntryKind,
    /// Permission bits including setuid/setgid/sticky.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// File length, or target length for symlinks; 0 otherwise.
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// (major, minor) for device nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdev: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Host inode identity, for hard link accounting.
    #[serde(skip)]
    pub inode: Option<(u64, u64)>,
    /// Path below the scanned root as the host spells it; `path` is a
    /// lossy rendering when the name is not UTF-8. Empty for the root.
    #[serde(skip)]
    pub host_path: PathBuf,
}

impl ManifestEntry {
    /// Last path component; empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Path of the containing directory; `None` for the root.
    pub fn parent(&self) -> Option<&str> {
        if self.path == "/" {
            return None;
        }
        match self.path.rfind('/') {
            Some(0) => Some("/"),
            Some(i) => Some(&self.path[..i]),
            None => None,
        }
    }

    fn canonical_line(&self) -> String {
        let rdev = self
            .rdev
            .map(|(ma, mi)| format!("{}:{}", ma, mi))
            .unwrap_or_default();
        format!(
            "{}\t{}\t{:o}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            self.path,
            self.kind.as_str(),
            self.mode,
            self.uid,
            self.gid,
            self.size,
            self.target.as_deref().unwrap_or(""),
            rdev,
            self.sha256.as_deref().unwrap_or(""),
        )
    }
}

/// Totals over a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub dirs: usize,
    pub files: usize,
    pub symlinks: usize,
    pub specials: usize,
    /// Sum of regular file lengths, hard links counted once.
    pub bytes: u64,
}

impl TreeStats {
    pub fn entries(&self) -> usize {
        self.dirs + self.files + self.symlinks + self.specials
    }
}

/// Sorted list of entries below a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    #[serde(skip)]
    pub root: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

/// Split a Linux `dev_t` into (major, minor).
pub fn dev_major_minor(dev: u64) -> (u32, u32) {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    (major as u32, minor as u32)
}

/// Combine (major, minor) into a Linux `dev_t`.
pub fn makedev(major: u32, minor: u32) -> u64 {
    let (major, minor) = (major as u64, minor as u64);
    ((major & 0xffff_f000) << 32)
        | ((major & 0xfff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0xff)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).during("reading", path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).during("reading", path)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn walk_error(root: &Path, err: walkdir::Error) -> PackagingError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(source) => PackagingError::io("reading", &path, source),
        None => PackagingError::Io {
            context: format!("filesystem loop while walking {}", path.display()),
            source: io::Error::from(io::ErrorKind::Other),
        },
    }
}

/// Image path for a path relative to the scanned root.
fn image_path(rel: &Path) -> String {
    if rel.as_os_str().is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rel.to_string_lossy())
    }
}

impl Manifest {
    /// Walk `root` recording metadata only.
    pub fn scan(root: &Path) -> Result<Self> {
        Self::scan_inner(root, false)
    }

    /// Walk `root` and also hash every regular file.
    pub fn scan_with_contents(root: &Path) -> Result<Self> {
        Self::scan_inner(root, true)
    }

    fn scan_inner(root: &Path, hash_contents: bool) -> Result<Self> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            let meta = entry.metadata().map_err(|e| walk_error(root, e))?;
            let ft = meta.file_type();

            let kind = if ft.is_dir() {
                EntryKind::Dir
            } else if ft.is_file() {
                EntryKind::File
            } else if ft.is_symlink() {
                EntryKind::Symlink
            } else if ft.is_char_device() {
                EntryKind::Char
            } else if ft.is_block_device() {
                EntryKind::Block
            } else if ft.is_fifo() {
                EntryKind::Fifo
            } else {
                EntryKind::Socket
            };

            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let mut record = ManifestEntry {
                path: image_path(&rel),
                kind,
                mode: meta.mode() & 0o7777,
                uid: meta.uid(),
                gid: meta.gid(),
                size: 0,
                target: None,
                rdev: None,
                sha256: None,
                inode: None,
                host_path: rel,
            };

            match kind {
                EntryKind::File => {
                    record.size = meta.len();
                    if meta.nlink() > 1 {
                        record.inode = Some((meta.dev(), meta.ino()));
                    }
                    if hash_contents {
                        record.sha256 = Some(sha256_file(entry.path())?);
                    }
                }
                EntryKind::Symlink => {
                    let target = fs::read_link(entry.path()).during("reading link", entry.path())?;
                    let target = target.to_string_lossy().into_owned();
                    record.size = target.len() as u64;
                    record.target = Some(target);
                }
                EntryKind::Char | EntryKind::Block => {
                    record.rdev = Some(dev_major_minor(meta.rdev()));
                }
                _ => {}
            }

            entries.push(record);
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// Hash the regular files of a manifest taken with [`Manifest::scan`].
    pub fn with_contents(mut self) -> Result<Self> {
        for entry in &mut self.entries {
            if entry.kind == EntryKind::File && entry.sha256.is_none() {
                entry.sha256 = Some(sha256_file(&self.root.join(&entry.host_path))?);
            }
        }
        Ok(self)
    }

    /// Build from already collected entries (sorted by path).
    pub fn from_entries(root: PathBuf, mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { root, entries }
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        let mut seen = HashSet::new();
        for entry in &self.entries {
            match entry.kind {
                EntryKind::Dir => stats.dirs += 1,
                EntryKind::File => {
                    stats.files += 1;
                    let first = entry.inode.map_or(true, |id| seen.insert(id));
                    if first {
                        stats.bytes += entry.size;
                    }
                }
                EntryKind::Symlink => stats.symlinks += 1,
                _ => stats.specials += 1,
            }
        }
        stats
    }

    /// SHA-256 over the canonical entry lines.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.canonical_line().as_bytes());
        }
        hasher.finalize().into()
    }

    pub fn digest_hex(&self) -> String {
        self.digest().iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Set every entry's owner to root.
    pub fn with_root_ownership(mut self) -> Self {
        for entry in &mut self.entries {
            entry.uid = 0;
            entry.gid = 0;
        }
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Compare `self` (expected) with `actual`.
    pub fn diff(&self, actual: &Manifest, opts: &DiffOptions) -> Vec<Difference> {
        let keep = |e: &&ManifestEntry| opts.special_files || !e.kind.is_special();
        let expected: BTreeMap<&str, &ManifestEntry> = self
            .entries
            .iter()
            .filter(keep)
            .map(|e| (e.path.as_str(), e))
            .collect();
        let found: BTreeMap<&str, &ManifestEntry> = actual
            .entries
            .iter()
            .filter(keep)
            .filter(|e| !opts.ignore.iter().any(|p| p == &e.path))
            .map(|e| (e.path.as_str(), e))
            .collect();

        let mut diffs = Vec::new();
        for (path, want) in &expected {
            let Some(got) = found.get(path) else {
                diffs.push(Difference::Missing(path.to_string()));
                continue;
            };

            let mut changed = |field: &'static str, expected: String, actual: String| {
                if expected != actual {
                    diffs.push(Difference::Changed {
                        path: path.to_string(),
                        field,
                        expected,
                        actual,
                    });
                }
            };

            changed("kind", want.kind.as_str().into(), got.kind.as_str().into());
            if want.kind != got.kind {
                continue;
            }
            changed("mode", format!("{:04o}", want.mode), format!("{:04o}", got.mode));
            if opts.ownership {
                changed(
                    "owner",
                    format!("{}:{}", want.uid, want.gid),
                    format!("{}:{}", got.uid, got.gid),
                );
            }
            match want.kind {
                EntryKind::File => {
                    changed("size", want.size.to_string(), got.size.to_string());
                    if let (Some(a), Some(b)) = (&want.sha256, &got.sha256) {
                        changed("content", a.clone(), b.clone());
                    }
                }
                EntryKind::Symlink => changed(
                    "target",
                    want.target.clone().unwrap_or_default(),
                    got.target.clone().unwrap_or_default(),
                ),
                EntryKind::Char | EntryKind::Block => {
                    if let Some((major, minor)) = want.rdev {
                        changed(
                            "rdev",
                            format!("{}:{}", major, minor),
                            got.rdev
                                .map(|(ma, mi)| format!("{}:{}", ma, mi))
                                .unwrap_or_else(|| "unknown".to_string()),
                        );
                    }
                }
                _ => {}
            }
        }

        for path in found.keys() {
            if !expected.contains_key(path) {
                diffs.push(Difference::Extra(path.to_string()));
            }
        }

        diffs
    }
}

/// What [`Manifest::diff`] compares.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub ownership: bool,
    pub special_files: bool,
    /// Paths in the actual tree to skip (e.g. `/lost+found`).
    pub ignore: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ownership: true,
            special_files: true,
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    Missing(String),
    Extra(String),
    Changed {
        path: String,
        field: &'static str,
        expected: String,
        actual: String,
    },
}

impl std::fmt::Display for Difference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(path) => write!(f, "missing: {}", path),
            Self::Extra(path) => write!(f, "unexpected: {}", path),
            Self::Changed {
                path,
                field,
                expected,
                actual,
            } => write!(f, "{} differs at {}: expected {}, found {}", field, path, expected, actual),
        }
    }
}
