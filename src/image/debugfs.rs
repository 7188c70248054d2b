//! Editing and reading ext images with `debugfs`, without mounting.
//!
//! Writes are batched into one command file run with `debugfs -w -f`, so
//! device nodes and root ownership land in the image without privilege.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{IoResultExt, PackagingError, Result};
use crate::manifest::{EntryKind, Manifest, ManifestEntry};
use crate::process::Cmd;
use crate::staging::DeviceNode;

use super::ext::{reproducible_env, Identity};

pub const TOOL: &str = "debugfs";

/// Quote a path for debugfs' command parser.
///
/// Inside quotes the parser reads `""` as one literal quote; backslash
/// is not an escape.
fn quote(path: &str) -> String {
    format!("\"{}\"", path.replace('"', "\"\""))
}

/// Reject entries whose names cannot be spelled in a debugfs command.
///
/// Commands are newline-separated and parsed as UTF-8 text, so neither
/// newlines nor undecodable bytes survive the trip.
pub fn check_names(manifest: &Manifest) -> Result<()> {
    for entry in &manifest.entries {
        let reason = if entry.host_path.to_str().is_none() {
            "name is not valid UTF-8"
        } else if entry.path.contains('\n') {
            "name contains a newline"
        } else {
            continue;
        };
        return Err(PackagingError::UnsupportedName {
            path: entry.path.clone(),
            reason,
        });
    }
    Ok(())
}

/// A batch of debugfs write commands.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Script {
    lines: Vec<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Add device nodes the staging tree does not already have.
    ///
    /// `mknod` links into the current directory, so each node is created
    /// after a `cd` into its parent.
    pub fn add_devices(&mut self, nodes: &[DeviceNode], present: &Manifest) -> usize {
        let mut added = 0;
        let mut cwd = String::from("/");

        for node in nodes {
            if present.contains(&node.path) {
                continue;
            }
            let parent = node.parent();
            if !present.contains(parent) && parent != "/" && !self.creates_dir(parent) {
                let (grand, name) = match parent.rfind('/') {
                    Some(0) | None => ("/", parent.trim_start_matches('/')),
                    Some(i) => (&parent[..i], &parent[i + 1..]),
                };
                self.push(format!("cd {}", quote(grand)));
                self.push(format!("mkdir {}", quote(name)));
                self.push(format!("sif {} mode 040755", quote(parent)));
                cwd = grand.to_string();
            }
            if cwd != parent {
                self.push(format!("cd {}", quote(parent)));
                cwd = parent.to_string();
            }
            let kind = match node.kind {
                EntryKind::Block => "b",
                _ => "c",
            };
            self.push(format!(
                "mknod {} {} {} {}",
                quote(node.name()),
                kind,
                node.major,
                node.minor
            ));
            self.push(format!("sif {} mode 0{:o}", quote(&node.path), node.st_mode()));
            self.push(format!("sif {} uid {}", quote(&node.path), node.uid));
            self.push(format!("sif {} gid {}", quote(&node.path), node.gid));
            added += 1;
        }
        if cwd != "/" {
            self.push("cd \"/\"".to_string());
        }
        added
    }

    fn creates_dir(&self, dir: &str) -> bool {
        let marker = format!("sif {} mode 040755", quote(dir));
        self.lines.iter().any(|l| *l == marker)
    }

    /// Give the image's root inode the staging root's mode and owner.
    ///
    /// mke2fs creates `/` itself, so `-d` does not carry these over.
    pub fn add_root_dir(&mut self, root: &ManifestEntry, all_root: bool) {
        let (uid, gid) = if all_root { (0, 0) } else { (root.uid, root.gid) };
        self.push(format!("sif \"/\" mode 0{:o}", root.kind.type_bits() | root.mode));
        self.push(format!("sif \"/\" uid {}", uid));
        self.push(format!("sif \"/\" gid {}", gid));
    }

    /// Set uid/gid 0 on every entry of `manifest` that is not already root.
    /// The root directory itself is left to [`Script::add_root_dir`].
    pub fn add_root_ownership(&mut self, manifest: &Manifest) -> usize {
        let mut changed = 0;
        for entry in manifest.entries.iter().filter(|e| e.path != "/") {
            if entry.uid != 0 {
                self.push(format!("sif {} uid 0", quote(&entry.path)));
            }
            if entry.gid != 0 {
                self.push(format!("sif {} gid 0", quote(&entry.path)));
            }
            if entry.uid != 0 || entry.gid != 0 {
                changed += 1;
            }
        }
        changed
    }

    /// Pin access, change and modification times of `paths` to `epoch`.
    ///
    /// `mkfs -d` copies timestamps from the staging tree; pinning them
    /// keeps the image independent of when the tree was staged.
    pub fn pin_timestamps<'a>(&mut self, paths: impl IntoIterator<Item = &'a str>, epoch: u64) {
        for path in paths {
            let path = quote(path);
            for field in ["atime", "ctime", "mtime"] {
                self.push(format!("sif {} {} @{}", path, field, epoch));
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{}", line);
        }
        out
    }

    /// Run the batch against `image` in write mode.
    pub fn apply(&self, image: &Path, identity: &Identity) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let script = write_script(&self.render())?;

        let mut cmd = Cmd::new(TOOL)
            .arg("-w")
            .arg("-f")
            .arg_path(script.path())
            .arg_path(image)
            .env("DEBUGFS_PAGER", "__none__");
        for (key, value) in reproducible_env(identity) {
            cmd = cmd.env(key, value);
        }
        let output = cmd
            .run()
            .map_err(|e| PackagingError::format_failure(TOOL, format!("{:#}", e)))?;

        // debugfs exits 0 even when a command fails; errors only show on stderr
        if let Some(line) = first_error(&output.stderr) {
            return Err(PackagingError::format_failure(TOOL, line));
        }
        Ok(())
    }
}

fn write_script(text: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("rootpack-")
        .suffix(".debugfs")
        .tempfile()
        .during("creating", &std::env::temp_dir())?;
    file.write_all(text.as_bytes()).during("writing", file.path())?;
    file.flush().during("writing", file.path())?;
    Ok(file)
}

/// First stderr line that is not the version banner.
fn first_error(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("debugfs "))
        .map(str::to_string)
        .next()
}

/// One line of `ls -p` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: String,
    /// Full `i_mode`, type bits included.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Present for non-directories.
    pub size: Option<u64>,
    /// Major and minor number of device nodes.
    pub rdev: Option<(u32, u32)>,
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parse `ls -p <dir>` lines: `/ino/mode/uid/gid/name/size/`.
///
/// `.` maps to the directory itself only when listing the root; `..`
/// is always dropped.
pub fn parse_ls_p(dir: &str, output: &str) -> Vec<ListedEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(body) = line.strip_prefix('/') else {
            continue;
        };
        let fields: Vec<&str> = body.split('/').collect();
        if fields.len() < 5 {
            continue;
        }
        let (Ok(mode), Ok(uid), Ok(gid)) = (
            u32::from_str_radix(fields[1], 8),
            fields[2].parse::<u32>(),
            fields[3].parse::<u32>(),
        ) else {
            continue;
        };
        let name = fields[4];
        let path = match name {
            "" | ".." => continue,
            "." if dir == "/" => "/".to_string(),
            "." => continue,
            _ => join(dir, name),
        };
        let size = fields.get(5).and_then(|s| s.parse::<u64>().ok());
        entries.push(ListedEntry {
            path,
            mode,
            uid,
            gid,
            size,
            rdev: None,
        });
    }
    entries
}

/// Device number from `stat` output.
///
/// debugfs prints it as `Device major/minor number: 01:03 (hex 01:03)`,
/// in decimal.
pub fn parse_device_number(output: &str) -> Option<(u32, u32)> {
    let rest = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Device major/minor number:"))?;
    let pair = rest.split_whitespace().next()?;
    let (major, minor) = pair.split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// List every entry of the image, walking directories breadth-first.
///
/// Device nodes get their major and minor numbers from a second batch
/// of `stat` commands.
pub fn list_image(image: &Path) -> Result<Vec<ListedEntry>> {
    let mut all = Vec::new();
    let mut pending = vec!["/".to_string()];

    while !pending.is_empty() {
        let mut script = String::new();
        for dir in &pending {
            let _ = writeln!(script, "ls -p {}", quote(dir));
        }
        let output = run_read_only(image, &script)?;

        let mut next = Vec::new();
        for (dir, chunk) in split_by_command(&output, "ls -p", &pending) {
            for entry in parse_ls_p(&dir, &chunk) {
                if entry.path != dir && EntryKind::from_mode(entry.mode) == Some(EntryKind::Dir) {
                    next.push(entry.path.clone());
                }
                all.push(entry);
            }
        }
        pending = next;
    }

    let devices: Vec<String> = all
        .iter()
        .filter(|e| EntryKind::from_mode(e.mode).is_some_and(|k| k.is_device()))
        .map(|e| e.path.clone())
        .collect();
    if !devices.is_empty() {
        let mut script = String::new();
        for path in &devices {
            let _ = writeln!(script, "stat {}", quote(path));
        }
        let output = run_read_only(image, &script)?;
        for (path, chunk) in split_by_command(&output, "stat", &devices) {
            if let Some(entry) = all.iter_mut().find(|e| e.path == path) {
                entry.rdev = parse_device_number(&chunk);
            }
        }
    }

    all.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(all)
}

/// Split script output into one chunk per `command` line, keyed by the
/// paths the commands were issued for, in order.
///
/// In `-f` mode debugfs echoes each command as `debugfs: <cmd>` before
/// its output.
fn split_by_command(output: &str, command: &str, paths: &[String]) -> Vec<(String, String)> {
    let echo = format!("debugfs: {} ", command);
    let mut chunks: Vec<(String, String)> = Vec::new();
    let mut index = 0;
    for line in output.lines() {
        if line.starts_with(&echo) {
            if let Some(path) = paths.get(index) {
                chunks.push((path.clone(), String::new()));
            }
            index += 1;
        } else if let Some((_, chunk)) = chunks.last_mut() {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    chunks
}

/// Copy the image's files, directories and symlinks into `dest`.
///
/// `rdump` cannot recreate device nodes or foreign ownership without
/// root; use [`list_image`] for those.
pub fn extract(image: &Path, dest: &Path) -> Result<usize> {
    let top: Vec<ListedEntry> = {
        let output = run_read_only(image, "ls -p \"/\"\n")?;
        parse_ls_p("/", &output)
            .into_iter()
            .filter(|e| e.path != "/" && e.path != super::LOST_AND_FOUND)
            .collect()
    };

    let dest_str = dest.to_string_lossy();
    let mut script = String::new();
    for entry in &top {
        let _ = writeln!(script, "rdump {} {}", quote(&entry.path), quote(&dest_str));
    }
    if !script.is_empty() {
        run_read_only(image, &script)?;
    }
    Ok(top.len())
}

fn run_read_only(image: &Path, script: &str) -> Result<String> {
    let script = write_script(script)?;
    let output = Cmd::new(TOOL)
        .arg("-f")
        .arg_path(script.path())
        .arg_path(image)
        .env("DEBUGFS_PAGER", "__none__")
        .run()
        .map_err(|e| PackagingError::format_failure(TOOL, format!("{:#}", e)))?;
    Ok(output.stdout)
}
