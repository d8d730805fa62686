//! Tar stream extraction into a build directory.
//!
//! [`TarExtractor`] unpacks plain or gzipped tar streams, such as the ones a container
//! runtime produces when copying a path out of a container. Entry paths are normalized
//! so nothing lands outside the destination, existing entries are replaced, and file
//! modification times are kept.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tar_rs as tar;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Normalizes a path from a tar archive to be safe for extraction
/// Removes any attempts to escape the root directory
fn normalize_tar_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    out
}

/// Joins `rel` onto `base` so the result stays under `base`, even when `rel` is
/// absolute or climbs with `..`.
pub fn join_under(base: &Path, rel: impl AsRef<Path>) -> PathBuf {
    base.join(normalize_tar_path(rel.as_ref()))
}

/// True when a directory between `dest` and `rel` is a symlink, so writing `rel`
/// would land wherever that link points.
fn has_symlink_ancestor(dest: &Path, rel: &Path) -> bool {
    let mut current = dest.to_path_buf();
    let Some(parent) = rel.parent() else {
        return false;
    };
    for comp in parent.components() {
        current.push(comp);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}

/// Replaces `dest` with a hardlink to `target`, copying when linking is not possible.
fn link_or_copy(target: &Path, dest: &Path) -> Result<()> {
    if !target.exists() {
        return Err(anyhow::anyhow!("hardlink target missing: {}", target.display()));
    }

    remove_existing(dest);

    if let Err(e) = fs::hard_link(target, dest) {
        log::debug!(
            "hardlink failed ({}), falling back to copy: {} -> {}",
            e,
            target.display(),
            dest.display()
        );
        fs::copy(target, dest)
            .with_context(|| format!("Failed to copy {} to {}", target.display(), dest.display()))?;
    }

    Ok(())
}

/// Removes whatever sits at `dest`, broken symlinks included.
fn remove_existing(dest: &Path) {
    if let Ok(metadata) = fs::symlink_metadata(dest) {
        if metadata.is_dir() && !metadata.is_symlink() {
            fs::remove_dir_all(dest).ok();
        } else {
            fs::remove_file(dest).ok();
        }
    }
}

struct PendingHardlink {
    rel_dest: PathBuf,
    rel_target: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct TarExtractor {
    exclusion: Option<Regex>,
}

impl TarExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries whose archive path matches `pattern` are skipped. `None` extracts everything.
    pub fn set_exclusion_pattern(&mut self, pattern: Option<Regex>) {
        self.exclusion = pattern;
    }

    fn is_excluded(&self, rel_path: &Path) -> bool {
        match (&self.exclusion, rel_path.to_str()) {
            (Some(re), Some(path)) => re.is_match(path),
            _ => false,
        }
    }

    /// Extracts a plain or gzipped tar stream into `dest`.
    ///
    /// When `progress` is given, every extracted entry is written to it on its own line.
    pub fn extract_stream<R: Read>(
        &self,
        dest: &Path,
        reader: R,
        progress: Option<&mut dyn Write>,
    ) -> Result<()> {
        let mut buf_reader = BufReader::new(reader);
        let is_gzip = buf_reader
            .fill_buf()
            .context("Failed to read tar stream")?
            .starts_with(&GZIP_MAGIC);

        if is_gzip {
            self.unpack(tar::Archive::new(GzDecoder::new(buf_reader)), dest, progress)
        } else {
            self.unpack(tar::Archive::new(buf_reader), dest, progress)
        }
    }

    fn unpack<R: Read>(
        &self,
        mut archive: tar::Archive<R>,
        dest: &Path,
        mut progress: Option<&mut dyn Write>,
    ) -> Result<()> {
        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

        // Hardlink targets may appear later in the stream
        let mut pending_hardlinks = Vec::new();

        for entry_result in archive.entries().context("Failed to read tar entries")? {
            let mut entry = entry_result.context("Failed to read tar entry")?;
            let entry_path = entry.path().context("Failed to get entry path")?;
            let rel_path = normalize_tar_path(&entry_path);

            if rel_path.as_os_str().is_empty() {
                continue;
            }
            if self.is_excluded(&rel_path) {
                log::debug!("Skipping excluded entry: {}", rel_path.display());
                continue;
            }

            if has_symlink_ancestor(dest, &rel_path) {
                log::warn!("Skipping entry below a symlink: {}", rel_path.display());
                continue;
            }

            let header = entry.header();
            let entry_type = header.entry_type();
            let mode = header.mode().ok();
            let mtime = header.mtime().ok();
            let target = dest.join(&rel_path);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }

            match entry_type {
                tar::EntryType::Directory => {
                    if target.is_symlink() || (target.exists() && !target.is_dir()) {
                        remove_existing(&target);
                    }
                    fs::create_dir_all(&target)
                        .with_context(|| format!("Failed to create directory: {}", target.display()))?;

                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let safe_mode = mode.unwrap_or(0o755) | 0o700;
                        let _ = fs::set_permissions(&target, fs::Permissions::from_mode(safe_mode));
                    }
                }
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    remove_existing(&target);

                    let mut out_file = File::create(&target)
                        .with_context(|| format!("Failed to create file: {}", target.display()))?;
                    std::io::copy(&mut entry, &mut out_file)
                        .with_context(|| format!("Failed to write file: {}", target.display()))?;

                    if let Some(mtime) = mtime {
                        let _ = out_file.set_modified(UNIX_EPOCH + Duration::from_secs(mtime));
                    }

                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        if let Some(mode) = mode {
                            let perms = fs::Permissions::from_mode((mode & 0o777) | 0o600);
                            let _ = fs::set_permissions(&target, perms);
                        }
                    }
                }
                tar::EntryType::Symlink => {
                    let link_name = entry
                        .link_name()
                        .context("Failed to get symlink target")?
                        .ok_or_else(|| anyhow::anyhow!("Symlink without target"))?;

                    remove_existing(&target);

                    #[cfg(unix)]
                    std::os::unix::fs::symlink(&link_name, &target).with_context(|| {
                        format!(
                            "Failed to create symlink {} -> {}",
                            target.display(),
                            link_name.display()
                        )
                    })?;

                    #[cfg(not(unix))]
                    log::warn!("Symlink support not implemented on this platform: {}", target.display());
                }
                tar::EntryType::Link => {
                    let link_name = entry
                        .link_name()
                        .context("Failed to get hardlink target")?
                        .ok_or_else(|| anyhow::anyhow!("Hardlink without target"))?;

                    pending_hardlinks.push(PendingHardlink {
                        rel_dest: rel_path.clone(),
                        rel_target: normalize_tar_path(&link_name),
                    });
                }
                _ => {
                    log::debug!("Skipping unsupported entry type: {:?}", entry_type);
                    continue;
                }
            }

            if let Some(out) = progress.as_mut() {
                writeln!(out, "{}", rel_path.display()).ok();
            }
        }

        // Symlinks created later in the stream may sit above either side of a link
        for hardlink in pending_hardlinks {
            if has_symlink_ancestor(dest, &hardlink.rel_dest)
                || has_symlink_ancestor(dest, &hardlink.rel_target)
            {
                log::warn!(
                    "Skipping hardlink through a symlink: {} -> {}",
                    hardlink.rel_dest.display(),
                    hardlink.rel_target.display()
                );
                continue;
            }

            let link_dest = dest.join(&hardlink.rel_dest);
            let link_target = dest.join(&hardlink.rel_target);
            if let Err(e) = link_or_copy(&link_target, &link_dest) {
                log::warn!(
                    "Skipping broken hardlink {} -> {}: {}",
                    link_dest.display(),
                    link_target.display(),
                    e
                );
            }
        }

        Ok(())
    }
}
