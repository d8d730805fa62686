//! Logging setup and the sink for non-fatal diagnostics.
//!
//! Library code logs through the `log` macros. The binary maps its `-v` count to a
//! [`VerbosityLevel`] and installs `env_logger` through [`init_logging`].
//!
//! [`Notifier`] collects [`Diagnostic`]s: failures that are worth reporting but must
//! not change the outcome of a fetch (reading commit metadata, removing a scratch
//! container). Each report is logged at warn level and kept for later inspection.

use env_logger::Env;
use log::LevelFilter;
use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Warnings and errors only
    Info = 1,
    Debug = 2,
    Trace = 3, // Also makes git chatty
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Installs the global logger. `RUST_LOG` still wins for individual modules.
pub fn init_logging(verbosity: VerbosityLevel) {
    env_logger::Builder::from_env(Env::default())
        .filter_level(verbosity.to_log_level())
        .init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Commit metadata could not be read from a freshly cloned tree.
    SourceInfoUnavailable { dir: String, error: String },
    /// A scratch container created for copying files was not removed.
    ContainerRemovalFailed { container_id: String, error: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SourceInfoUnavailable { dir, error } => {
                write!(f, "Unable to retrieve Git info from {}: {}", dir, error)
            }
            Diagnostic::ContainerRemovalFailed {
                container_id,
                error,
            } => write!(f, "Unable to remove container {}: {}", container_id, error),
        }
    }
}

#[derive(Debug, Default)]
pub struct Notifier {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        log::warn!("{}", diagnostic);
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.borrow().is_empty()
    }
}
