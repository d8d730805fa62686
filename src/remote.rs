//! Time-bounded reachability check of a git remote.
//!
//! [`check_remote_git`] runs `git ls-remote --heads` on a scoped worker thread and waits
//! for it at most `timeout`. When the timeout wins, the worker's [`CancelToken`] is
//! triggered so the git process is killed, and the worker is joined before returning.
//! The textual output of a finished listing is interpreted by a [`RemoteClassifier`].

use anyhow::Result;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::error::SourceError;
use crate::git::GitClient;

/// Shared flag asking a long-running operation to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Turns the combined stdout/stderr of a remote listing into a typed failure.
pub trait RemoteClassifier: Send + Sync {
    fn classify(&self, url: &str, output: &str) -> Option<SourceError>;
}

/// Recognizes the messages git prints for rejected credentials and missing repositories.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerClassifier;

const AUTH_FAILED_MARKER: &str = "Authentication failed";
const NOT_FOUND_MARKER: &str = "not found";

impl RemoteClassifier for MarkerClassifier {
    fn classify(&self, url: &str, output: &str) -> Option<SourceError> {
        if output.contains(AUTH_FAILED_MARKER) {
            Some(SourceError::GitAuthentication(url.to_string()))
        } else if output.contains(NOT_FOUND_MARKER) {
            Some(SourceError::GitNotFound(url.to_string()))
        } else {
            None
        }
    }
}

/// Validates that `url` answers `git ls-remote --heads` within `timeout`.
///
/// Returns [`SourceError::RemoteTimeout`], [`SourceError::GitAuthentication`] or
/// [`SourceError::GitNotFound`] for the classified cases, otherwise the listing's own
/// result.
pub fn check_remote_git<G: GitClient + ?Sized>(
    git: &G,
    classifier: &dyn RemoteClassifier,
    url: &str,
    timeout: Duration,
) -> Result<()> {
    debug!("git ls-remote --heads {}", url);

    let cancel = CancelToken::new();
    let listing = thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        let worker_cancel = cancel.clone();
        scope.spawn(move || {
            // The receiver is gone once the timeout fired
            let _ = tx.send(git.list_remote(url, &["--heads"], &worker_cancel));
        });

        match rx.recv_timeout(timeout) {
            Ok(listing) => Some(listing),
            Err(_) => {
                cancel.cancel();
                None
            }
        }
    });

    let Some(listing) = listing else {
        return Err(SourceError::RemoteTimeout(url.to_string()).into());
    };

    if !listing.stdout.is_empty() {
        debug!("{}", listing.stdout);
    }
    if !listing.stderr.is_empty() {
        debug!("{}", listing.stderr);
    }

    let combined = format!("{}{}", listing.stdout, listing.stderr);
    if let Some(err) = classifier.classify(url, &combined) {
        return Err(err.into());
    }

    listing.result
}
