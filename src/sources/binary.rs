use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path};
use std::process::{Command, Stdio};

use crate::build_spec::BinaryInputDescriptor;
use crate::error::SourceError;

pub const DEFAULT_ARCHIVE_PROGRAM: &str = "bsdtar";

/// Materializes the binary input stream into `dir` as directed by `source`.
///
/// Without a descriptor this does nothing. With `asFile` set the stream is written to
/// that file, which must not exist yet; otherwise the stream is unpacked by
/// `archive_program` (a bsdtar-compatible tool) into `dir`.
pub fn extract_input_binary(
    input: &mut dyn Read,
    source: Option<&BinaryInputDescriptor>,
    dir: &Path,
    archive_program: &Path,
) -> Result<()> {
    let Some(source) = source else {
        return Ok(());
    };

    match source.as_file() {
        Some(name) => write_input_file(input, name, dir),
        None => extract_input_archive(input, dir, archive_program),
    }
}

fn is_plain_relative(name: &str) -> bool {
    let path = Path::new(name);
    path.components().count() > 0
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn write_input_file(input: &mut dyn Read, name: &str, dir: &Path) -> Result<()> {
    if !is_plain_relative(name) {
        return Err(SourceError::InvalidBinaryPath(name.to_string()).into());
    }

    info!("Receiving source from STDIN as file {}", name);
    let path = dir.join(name);

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o664);
    }

    let mut file = options
        .open(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let n = io::copy(input, &mut file)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!("Received {} bytes into {}", n, path.display());
    Ok(())
}

fn extract_input_archive(input: &mut dyn Read, dir: &Path, archive_program: &Path) -> Result<()> {
    info!("Receiving source from STDIN as archive ...");

    // stdout and stderr share one scratch file, so a chatty tool cannot block on a
    // full pipe while we are still feeding its stdin
    let mut output = tempfile::tempfile().context("Failed to create temporary file")?;
    let stdout = output.try_clone().context("Failed to share temporary file")?;
    let stderr = output.try_clone().context("Failed to share temporary file")?;

    let mut child = Command::new(archive_program)
        .args(["-x", "-o", "-m", "-f", "-", "-C"])
        .arg(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|e| {
            SourceError::BinaryExtraction(anyhow!(e).context(format!(
                "Failed to execute {}",
                archive_program.display()
            )))
        })?;

    let copied = child.stdin.take().map(|mut stdin| io::copy(input, &mut stdin));
    let status = child
        .wait()
        .map_err(|e| SourceError::BinaryExtraction(anyhow!(e)))?;

    if !status.success() {
        debug!("Extracting...\n{}", read_captured(&mut output));
        return Err(SourceError::BinaryExtraction(anyhow!("{}", status)).into());
    }
    if let Some(Err(e)) = copied {
        debug!("Extracting...\n{}", read_captured(&mut output));
        return Err(SourceError::BinaryExtraction(anyhow!(e)).into());
    }

    Ok(())
}

fn read_captured(file: &mut File) -> String {
    let mut out = String::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = file.read_to_string(&mut out);
    }
    out
}
