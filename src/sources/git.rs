use anyhow::Result;
use log::{debug, info, log_enabled, Level};
use std::path::Path;
use std::time::Duration;

use crate::build_spec::GitSourceDescriptor;
use crate::error::SourceError;
use crate::git::{CloneOptions, GitClient};
use crate::remote::{check_remote_git, RemoteClassifier};

/// Clones the git source, if any, into `dir`.
///
/// Returns `Ok(false)` when no git source is configured and `Ok(true)` once the tree is
/// checked out. Any error means a git source was configured but could not be fetched.
///
/// Without a pinned ref or commit the clone is recursive and shallow. With one, the
/// full history is cloned so the checkout can reach any commit, and submodules are
/// initialized afterwards.
pub fn extract_git_source<G: GitClient + ?Sized>(
    git: &G,
    classifier: &dyn RemoteClassifier,
    source: Option<&GitSourceDescriptor>,
    revision_commit: Option<&str>,
    dir: &Path,
    timeout: Duration,
) -> Result<bool> {
    let Some(source) = source else {
        return Ok(false);
    };

    info!("Downloading {:?} ...", source.uri);

    if !git.valid_clone_spec(&source.uri) {
        return Err(SourceError::InvalidCloneSpec(source.uri.clone()).into());
    }
    check_remote_git(git, classifier, &source.uri, timeout)?;

    let revision_commit = revision_commit.filter(|c| !c.is_empty());
    let checkout_target = revision_commit.or(source.git_ref());
    let using_ref = checkout_target.is_some();

    debug!("Cloning source from {}", source.uri);
    let opts = CloneOptions {
        recursive: !using_ref,
        quiet: !log_enabled!(Level::Trace),
        shallow: !using_ref,
    };
    git.clone_with_options(dir, &source.uri, opts)?;

    if let Some(target) = checkout_target {
        git.checkout(dir, target)?;
        git.submodule_update(dir, true, true)?;
    }

    Ok(true)
}
