use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, FixedOffset};
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::clone_spec;
use crate::process::{join_reader, spawn_reader};
use crate::remote::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneOptions {
    pub recursive: bool,
    pub quiet: bool,
    pub shallow: bool,
}

/// Output of `git ls-remote`. The streams are kept even when the command failed,
/// since they carry the text that explains why.
#[derive(Debug)]
pub struct RemoteListing {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<()>,
}

impl RemoteListing {
    fn failed(err: anyhow::Error) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            result: Err(err),
        }
    }
}

/// Commit metadata of a checked out tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub git_ref: String,
    pub commit_id: String,
    pub date: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub message: String,
    pub location: String,
}

impl SourceInfo {
    /// Reads HEAD of the repository at `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        let repo = Repository::open(dir)
            .with_context(|| format!("Failed to open git repository at {}", dir.display()))?;
        let head = repo.head().context("Failed to get HEAD reference")?;
        let commit = head.peel_to_commit().context("Failed to resolve HEAD commit")?;

        let author = commit.author();
        let committer = commit.committer();
        let time = commit.time();
        let date = FixedOffset::east_opt(time.offset_minutes() * 60)
            .zip(DateTime::from_timestamp(time.seconds(), 0))
            .map(|(offset, utc)| utc.with_timezone(&offset).to_rfc3339())
            .unwrap_or_default();

        let location = repo
            .find_remote("origin")
            .ok()
            .and_then(|remote| remote.url().map(str::to_string))
            .unwrap_or_default();

        Ok(Self {
            git_ref: head.shorthand().unwrap_or("HEAD").to_string(),
            commit_id: commit.id().to_string(),
            date,
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
            committer_name: committer.name().unwrap_or_default().to_string(),
            committer_email: committer.email().unwrap_or_default().to_string(),
            message: commit.summary().unwrap_or_default().to_string(),
            location,
        })
    }
}

/// The git operations source fetching relies on.
///
/// Implementations must be shareable across threads: [`GitClient::list_remote`] runs
/// on a worker thread and should return promptly once `cancel` is triggered.
pub trait GitClient: Send + Sync {
    fn valid_clone_spec(&self, url: &str) -> bool;
    fn list_remote(&self, url: &str, args: &[&str], cancel: &CancelToken) -> RemoteListing;
    fn clone_with_options(&self, dir: &Path, url: &str, opts: CloneOptions) -> Result<()>;
    fn checkout(&self, dir: &Path, git_ref: &str) -> Result<()>;
    fn submodule_update(&self, dir: &Path, init: bool, recursive: bool) -> Result<()>;
    fn get_info(&self, dir: &Path) -> Result<SourceInfo>;
}

/// [`GitClient`] backed by the `git` binary, so proxy and credential settings of the
/// environment apply.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        // Fail instead of prompting for credentials
        cmd.env("GIT_TERMINAL_PROMPT", "0").stdin(Stdio::null());
        cmd
    }

    fn run<I, S>(&self, dir: Option<&Path>, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let display: Vec<_> = args.iter().map(|a| a.as_ref().to_string_lossy()).collect();

        let mut cmd = self.command();
        cmd.args(&args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute git command: {:?}", display))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed ({}): {}", display.join(" "), output.status, error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl GitClient for GitCli {
    fn valid_clone_spec(&self, url: &str) -> bool {
        clone_spec::is_valid_clone_spec(url)
    }

    fn list_remote(&self, url: &str, args: &[&str], cancel: &CancelToken) -> RemoteListing {
        let mut cmd = self.command();
        cmd.arg("ls-remote")
            .args(args)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RemoteListing::failed(
                    anyhow!(e).context("Failed to execute git ls-remote"),
                )
            }
        };

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let result = if status.success() {
                        Ok(())
                    } else {
                        Err(anyhow!("git ls-remote {} failed ({})", url, status))
                    };
                    return RemoteListing {
                        stdout: join_reader(stdout),
                        stderr: join_reader(stderr),
                        result,
                    };
                }
                Ok(None) if cancel.is_cancelled() => {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Helpers spawned by git may still hold the pipes, so the readers
                    // are not joined here; they end when the pipes close.
                    return RemoteListing::failed(anyhow!("git ls-remote {} was cancelled", url));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return RemoteListing::failed(
                        anyhow!(e).context("Failed to wait for git ls-remote"),
                    )
                }
            }
        }
    }

    fn clone_with_options(&self, dir: &Path, url: &str, opts: CloneOptions) -> Result<()> {
        let mut args: Vec<&OsStr> = vec![OsStr::new("clone")];
        if opts.recursive {
            args.push(OsStr::new("--recursive"));
        }
        if opts.quiet {
            args.push(OsStr::new("--quiet"));
        }
        if opts.shallow {
            args.push(OsStr::new("--depth=1"));
        }
        args.push(OsStr::new(url));
        args.push(dir.as_os_str());

        self.run(None, args)
            .with_context(|| format!("Failed to clone {}", url))?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, git_ref: &str) -> Result<()> {
        self.run(Some(dir), ["checkout", git_ref])
            .with_context(|| format!("Failed to checkout {}", git_ref))?;
        Ok(())
    }

    fn submodule_update(&self, dir: &Path, init: bool, recursive: bool) -> Result<()> {
        let mut args = vec!["submodule", "update"];
        if init {
            args.push("--init");
        }
        if recursive {
            args.push("--recursive");
        }
        self.run(Some(dir), args)
            .context("Failed to update submodules")?;
        Ok(())
    }

    fn get_info(&self, dir: &Path) -> Result<SourceInfo> {
        SourceInfo::read(dir)
    }
}
