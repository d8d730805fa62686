pub mod build_spec;
pub mod clone_spec;
pub mod container;
pub mod dockercfg;
pub mod error;
pub mod fetcher;
pub mod git;
pub mod notifier;
mod process;
pub mod remote;
pub mod sources;
pub mod tar_extractor;

// Re-exports for easy access
pub use build_spec::BuildSourceSpec;
pub use container::{ContainerRuntime, DockerCli};
pub use dockercfg::{DockerConfig, PullSecrets, RegistryAuth};
pub use error::SourceError;
pub use fetcher::{FetchConfig, SourceFetcher};
pub use git::{GitCli, GitClient, SourceInfo};
pub use notifier::{Diagnostic, Notifier};
pub use remote::{CancelToken, MarkerClassifier, RemoteClassifier};
pub use tar_extractor::TarExtractor;
