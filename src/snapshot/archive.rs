//! tar.gz and gzip helpers for payloads
//!
//! Tar payloads are laid out as:
//!
//! ```text
//! manifest.json
//! project/<path relative to the project root>
//! data/<path relative to the data directory>
//! RECOVERY.md            (emergency kits only)
//! ```

use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{StackError, StackResult};

/// Archive prefix for project-root files
pub const PROJECT_PREFIX: &str = "project";

/// Archive prefix for data-directory files
pub const DATA_PREFIX: &str = "data";

/// Archive path of the emergency runbook
pub const RUNBOOK_NAME: &str = "RECOVERY.md";

/// Where an archive entry's bytes come from
#[derive(Debug)]
pub enum EntrySource {
    /// A file on disk, archived with its metadata
    File(PathBuf),
    /// Generated content
    Bytes { data: Vec<u8>, mode: u32 },
}

/// One entry of a payload being built
#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub source: EntrySource,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::File(path),
        }
    }

    pub fn bytes(name: impl Into<String>, data: Vec<u8>, mode: u32) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::Bytes { data, mode },
        }
    }
}

/// Destination roots for unpacking a payload
#[derive(Debug, Clone)]
pub struct UnpackRoutes {
    pub project_root: PathBuf,
    pub data_dir: PathBuf,
}

/// Walk `root` and return `(archive name, path)` for every regular file
///
/// Symlinks are skipped. `exclude` is consulted for files and directories.
pub fn collect_files<F>(root: &Path, prefix: &str, exclude: F) -> StackResult<Vec<(String, PathBuf)>>
where
    F: Fn(&Path) -> bool,
{
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        if exclude(&path) {
            continue;
        }
        let metadata = fs::symlink_metadata(&path)?;
        if metadata.is_dir() {
            let mut children: Vec<PathBuf> = fs::read_dir(&path)?
                .map(|e| e.map(|e| e.path()))
                .collect::<Result<_, _>>()?;
            children.sort();
            stack.extend(children.into_iter().rev());
        } else if metadata.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let name = if rel.as_os_str().is_empty() {
                prefix.to_string()
            } else {
                format!("{}/{}", prefix, archive_path(rel))
            };
            out.push((name, path));
        } else {
            tracing::debug!(path = %path.display(), "skipping non-regular file");
        }
    }
    Ok(out)
}

/// Relative path rendered with `/` separators
pub fn archive_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write a gzip-compressed tar to `dest`
pub fn write_tar_gz(dest: &Path, entries: &[ArchiveEntry]) -> StackResult<()> {
    let file = File::create(dest).map_err(|e| {
        StackError::FileSystem(format!("Failed to create payload {}: {}", dest.display(), e))
    })?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in entries {
        match &entry.source {
            EntrySource::File(path) => {
                builder
                    .append_path_with_name(path, &entry.name)
                    .map_err(|e| {
                        StackError::FileSystem(format!(
                            "Failed to archive {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
            }
            EntrySource::Bytes { data, mode } => {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(*mode);
                header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
                header.set_entry_type(tar::EntryType::Regular);
                builder
                    .append_data(&mut header, &entry.name, data.as_slice())
                    .map_err(|e| {
                        StackError::FileSystem(format!("Failed to archive {}: {}", entry.name, e))
                    })?;
            }
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| StackError::FileSystem(format!("Failed to finish tar stream: {}", e)))?;
    let file = encoder
        .finish()
        .map_err(|e| StackError::FileSystem(format!("Failed to finish gzip stream: {}", e)))?;
    file.sync_all()?;
    Ok(())
}

/// Gzip `src` into `dest`
pub fn gzip_file(src: &Path, dest: &Path) -> StackResult<()> {
    let mut input = File::open(src)?;
    let output = File::create(dest)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()?;
    Ok(())
}

/// Whether bytes start with the gzip magic number
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

/// Decompress a gzip stream fully into memory
pub fn gunzip(data: &[u8]) -> StackResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| StackError::Integrity(format!("Payload is not valid gzip: {}", e)))?;
    Ok(out)
}

/// Decompress only the first `limit` bytes of a gzip stream
pub fn gunzip_prefix(data: &[u8], limit: usize) -> StackResult<Vec<u8>> {
    let mut out = Vec::with_capacity(limit);
    GzDecoder::new(data)
        .take(limit as u64)
        .read_to_end(&mut out)
        .map_err(|e| StackError::Integrity(format!("Payload is not valid gzip: {}", e)))?;
    Ok(out)
}

/// List entry names of a tar.gz held in memory
pub fn list_entries(tar_gz: &[u8]) -> StackResult<Vec<String>> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(tar_gz)));
    let mut names = Vec::new();
    for entry in archive.entries().map_err(corrupt_archive)? {
        let entry = entry.map_err(corrupt_archive)?;
        let path = entry.path().map_err(corrupt_archive)?;
        names.push(archive_path(&path));
    }
    Ok(names)
}

/// Read one entry of a tar.gz held in memory
pub fn read_entry(tar_gz: &[u8], name: &str) -> StackResult<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(tar_gz)));
    for entry in archive.entries().map_err(corrupt_archive)? {
        let mut entry = entry.map_err(corrupt_archive)?;
        let path = archive_path(&entry.path().map_err(corrupt_archive)?);
        if path == name {
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(corrupt_archive)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}

/// Unpack `project/` and `data/` entries over their destination roots
///
/// Entries with absolute paths or `..` components are rejected before anything
/// is written. Returns the written file paths.
pub fn unpack(tar_gz: &[u8], routes: &UnpackRoutes) -> StackResult<Vec<PathBuf>> {
    // Validate every path first so a hostile entry cannot leave a half-unpacked tree.
    for name in list_entries(tar_gz)? {
        if safe_relative(Path::new(&name)).is_none() {
            return Err(StackError::Integrity(format!(
                "Archive entry '{}' escapes the restore root",
                name
            )));
        }
    }

    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(tar_gz)));
    archive.set_overwrite(true);
    let mut written = Vec::new();

    for entry in archive.entries().map_err(corrupt_archive)? {
        let mut entry = entry.map_err(corrupt_archive)?;
        let path = entry.path().map_err(corrupt_archive)?.into_owned();
        let Some(dest) = route(&path, routes) else {
            continue;
        };

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&dest)?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&dest).map_err(|e| {
                    StackError::FileSystem(format!("Failed to unpack {}: {}", dest.display(), e))
                })?;
                written.push(dest);
            }
            other => {
                tracing::warn!(entry = %path.display(), kind = ?other, "skipping unsupported archive entry");
            }
        }
    }

    Ok(written)
}

/// Relative path with only normal components
pub fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn route(path: &Path, routes: &UnpackRoutes) -> Option<PathBuf> {
    let rel = safe_relative(path)?;
    let mut components = rel.components();
    let first = components.next()?.as_os_str().to_str()?.to_string();
    let rest: PathBuf = components.collect();
    if rest.as_os_str().is_empty() {
        return None;
    }
    match first.as_str() {
        PROJECT_PREFIX => Some(routes.project_root.join(rest)),
        DATA_PREFIX => Some(routes.data_dir.join(rest)),
        _ => None,
    }
}

fn corrupt_archive(e: std::io::Error) -> StackError {
    StackError::Integrity(format!("Payload archive is unreadable: {}", e))
}

/// Render the recovery runbook embedded in emergency kits
pub fn render_runbook(host: &str, created_at: &str, files: &[String]) -> String {
    let mut out = String::new();
    out.push_str("# Emergency recovery runbook\n\n");
    out.push_str(&format!("Host: {}\nCreated: {}\n\n", host, created_at));
    out.push_str(
        "This kit contains the stack's PRIVATE KEY. Keep it offline, on separate \
         media from the regular backups.\n\n",
    );
    out.push_str("## Restore on a fresh host\n\n");
    out.push_str("1. Install docker and the stackward binary.\n");
    out.push_str("2. Create the project directory and copy this kit into it.\n");
    out.push_str(
        "3. Run `stackward --root <project> restore <kit> --profile emergency`.\n",
    );
    out.push_str("4. Type RESTORE when prompted. Services are started automatically.\n");
    out.push_str("5. Check `stackward health check` until every service is healthy.\n");
    out.push_str("6. Re-run `stackward sync` to refresh the trust and allow lists.\n\n");
    out.push_str("## Contents\n\n");
    for file in files {
        out.push_str(&format!("- {}\n", file));
    }
    out
}
