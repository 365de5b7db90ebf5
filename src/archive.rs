//! Deterministic gzip-compressed tar archives.
//!
//! Compiled packages and rendered jobs are stored as `.tgz` blobs. Archives
//! produced here depend only on file paths, contents and the executable bit:
//! entries are sorted, and mtime, uid and gid are zeroed, so identical input
//! trees give byte-identical archives.

use anyhow::{Context, Result, anyhow};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path};
use tar::{EntryType, Header};

/// An in-memory file to place in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative, `/`-separated path inside the archive
    pub path: String,
    /// File content
    pub content: Vec<u8>,
    /// Whether the file should be executable once unpacked
    pub executable: bool,
}

impl ArchiveEntry {
    /// Create a regular, non-executable entry.
    pub fn file(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            executable: false,
        }
    }
}

/// Whether `path` names a gzip-compressed tarball.
pub fn is_tarball(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Pack a directory tree into a deterministic `.tgz`.
pub fn pack_dir(root: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);

    for entry in walkdir::WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry =
            entry.with_context(|| format!("Failed to walk directory: {}", root.display()))?;
        let path = entry.path();
        if path == root {
            continue;
        }
        let rel = normalize_archive_path(
            path.strip_prefix(root).context("Failed to relativize archive path")?,
        )?;
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        let mut header = canonical_header();
        if metadata.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &rel, std::io::empty())?;
        } else if metadata.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(if is_executable(&metadata) {
                0o755
            } else {
                0o644
            });
            header.set_size(metadata.len());
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            builder.append_data(&mut header, &rel, file)?;
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular file while packing");
        }
    }

    finish(builder)
}

/// Pack in-memory entries into a deterministic `.tgz`.
///
/// Entries are written sorted by path; parent directories are not emitted.
pub fn pack_entries(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&ArchiveEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in sorted {
        let rel = normalize_archive_path(Path::new(&entry.path))?;
        let mut header = canonical_header();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(if entry.executable {
            0o755
        } else {
            0o644
        });
        header.set_size(entry.content.len() as u64);
        builder.append_data(&mut header, &rel, entry.content.as_slice())?;
    }

    finish(builder)
}

/// Unpack a `.tgz` into `dest`, creating it if needed.
///
/// Entries that would escape `dest` are rejected by `tar`.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to unpack archive into {}", dest.display()))
}

fn canonical_header() -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn finish(builder: tar::Builder<GzEncoder<Vec<u8>>>) -> Result<Vec<u8>> {
    let mut encoder = builder.into_inner().context("Failed to finish tar stream")?;
    encoder.flush()?;
    encoder.finish().context("Failed to finish gzip stream")
}

fn normalize_archive_path(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| anyhow!("Non UTF-8 archive path: {}", path.display()))?
                    .to_string(),
            ),
            Component::CurDir => {}
            _ => return Err(anyhow!("Archive path must be relative: {}", path.display())),
        }
    }
    if parts.is_empty() {
        return Err(anyhow!("Archive entry path is empty"));
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pack_dir_is_deterministic() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        for root in [first.path(), second.path()] {
            fs::create_dir_all(root.join("bin")).unwrap();
            fs::write(root.join("bin/run"), "#!/bin/sh\n").unwrap();
            fs::write(root.join("README"), "hello").unwrap();
        }

        let a = pack_dir(first.path()).unwrap();
        let b = pack_dir(second.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pack_entries_ignores_input_order() {
        let a = pack_entries(&[ArchiveEntry::file("b.txt", "b"), ArchiveEntry::file("a.txt", "a")])
            .unwrap();
        let b = pack_entries(&[ArchiveEntry::file("a.txt", "a"), ArchiveEntry::file("b.txt", "b")])
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unpack_restores_tree() {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("lib")).unwrap();
        fs::write(source.path().join("lib/libfoo.so"), b"\x7fELF").unwrap();

        let bytes = pack_dir(source.path()).unwrap();
        let dest = TempDir::new().unwrap();
        unpack(&bytes, dest.path()).unwrap();

        assert_eq!(fs::read(dest.path().join("lib/libfoo.so")).unwrap(), b"\x7fELF");
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_survives() {
        use std::os::unix::fs::PermissionsExt;

        let bytes = pack_entries(&[ArchiveEntry {
            path: "bin/ctl".to_string(),
            content: b"#!/bin/sh\n".to_vec(),
            executable: true,
        }])
        .unwrap();
        let dest = TempDir::new().unwrap();
        unpack(&bytes, dest.path()).unwrap();

        let mode = fs::metadata(dest.path().join("bin/ctl")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_rejects_escaping_entry_paths() {
        assert!(pack_entries(&[ArchiveEntry::file("../evil", "x")]).is_err());
        assert!(pack_entries(&[ArchiveEntry::file("/etc/passwd", "x")]).is_err());
    }

    #[test]
    fn test_is_tarball() {
        assert!(is_tarball(Path::new("/tmp/release-1.tgz")));
        assert!(is_tarball(Path::new("release.tar.gz")));
        assert!(!is_tarball(Path::new("release")));
    }
}
