//! Build input acquisition orchestrator.
//!
//! [`SourceFetcher`] turns a [`BuildSourceSpec`] into a populated build directory:
//! - unpacks the binary input stream (single file or archive),
//! - clones the git source after a time-bounded reachability check,
//! - copies paths out of each source image, in declaration order,
//! - and finally writes the inline Dockerfile, into the context directory when the
//!   tree came from git.
//!
//! Steps run strictly one after another. The first failing step ends the fetch; only
//! reading commit metadata and removing scratch containers are best-effort, and their
//! failures surface as [`crate::notifier::Diagnostic`]s on the [`Notifier`].

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::build_spec::BuildSourceSpec;
use crate::container::ContainerRuntime;
use crate::dockercfg::PullSecrets;
use crate::git::{GitClient, SourceInfo};
use crate::notifier::{Diagnostic, Notifier};
use crate::remote::{MarkerClassifier, RemoteClassifier};
use crate::sources;
use crate::tar_extractor::join_under;

/// Timeout for the remote reachability check when the caller has no opinion.
pub const DEFAULT_URL_CHECK_TIMEOUT: Duration = Duration::from_secs(16);

pub struct FetchConfig {
    /// bsdtar-compatible program used for binary archive input.
    pub archive_program: PathBuf,
    pub pull_secrets: PullSecrets,
    pub classifier: Box<dyn RemoteClassifier>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            archive_program: PathBuf::from(sources::DEFAULT_ARCHIVE_PROGRAM),
            pull_secrets: PullSecrets::default(),
            classifier: Box::new(MarkerClassifier),
        }
    }
}

/// Materializes every input of a build into one directory.
///
/// ### Type parameters
/// - `G`: the git client used for reachability checks, clones and commit metadata.
/// - `R`: the container runtime used to pull images and copy files out of them.
pub struct SourceFetcher<G: GitClient, R: ContainerRuntime> {
    git: G,
    runtime: R,
    notifier: Notifier,
    config: FetchConfig,
}

impl<G: GitClient, R: ContainerRuntime> SourceFetcher<G, R> {
    pub fn new(git: G, runtime: R) -> Self {
        Self::with_config(git, runtime, FetchConfig::default())
    }

    pub fn with_config(git: G, runtime: R, config: FetchConfig) -> Self {
        Self {
            git,
            runtime,
            notifier: Notifier::new(),
            config,
        }
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Retrieves all inputs declared by `spec` into `dir`.
    ///
    /// `input` is only read when the spec declares a binary source. `url_timeout`
    /// bounds the remote check done before cloning.
    ///
    /// # Returns
    /// Commit metadata of the cloned tree when a git source was fetched and its
    /// metadata could be read, `None` otherwise.
    ///
    /// # Errors
    /// The first failure of any step. Classified failures (bad clone URL, rejected
    /// credentials, missing repository, remote timeout, unreadable binary archive)
    /// downcast to [`crate::error::SourceError`]. Nothing written to `dir` before the
    /// failure is cleaned up.
    pub fn fetch(
        &self,
        spec: &BuildSourceSpec,
        dir: &Path,
        url_timeout: Duration,
        input: &mut dyn Read,
    ) -> Result<Option<SourceInfo>> {
        debug!("Fetching sources into {}", dir.display());

        sources::extract_input_binary(
            input,
            spec.binary.as_ref(),
            dir,
            &self.config.archive_program,
        )?;

        let has_git_source = sources::extract_git_source(
            &self.git,
            self.config.classifier.as_ref(),
            spec.git.as_ref(),
            spec.revision_commit(),
            dir,
            url_timeout,
        )?;

        let source_info = if has_git_source {
            self.collect_source_info(dir)
        } else {
            None
        };

        let force_pull = spec.force_pull();
        for (i, image) in spec.images.iter().enumerate() {
            let secret_index = image.pull_secret.as_ref().map(|_| i);
            sources::extract_source_from_image(
                &self.runtime,
                &self.notifier,
                &image.from,
                dir,
                secret_index,
                &self.config.pull_secrets,
                &image.paths,
                force_pull,
            )?;
        }

        if let Some(dockerfile) = &spec.dockerfile {
            let base_dir = match spec.context_dir() {
                Some(context_dir) if has_git_source => join_under(dir, context_dir),
                _ => dir.to_path_buf(),
            };
            write_dockerfile(&base_dir, dockerfile)?;
        }

        Ok(source_info)
    }

    fn collect_source_info(&self, dir: &Path) -> Option<SourceInfo> {
        match self.git.get_info(dir) {
            Ok(info) => {
                info!("Fetched commit {} ({})", info.commit_id, info.git_ref);
                Some(info)
            }
            Err(e) => {
                self.notifier.report(Diagnostic::SourceInfoUnavailable {
                    dir: dir.display().to_string(),
                    error: format!("{:#}", e),
                });
                None
            }
        }
    }
}

/// Writes `Dockerfile` into `dir`, replacing any existing one.
fn write_dockerfile(dir: &Path, content: &str) -> Result<()> {
    let path = dir.join("Dockerfile");
    debug!("Writing Dockerfile to {}", path.display());

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o660);
    }

    let mut file = options
        .open(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}
