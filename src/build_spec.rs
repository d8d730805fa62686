//! Declarative description of the inputs of one build.
//!
//! [`BuildSourceSpec`] is read-only for this crate: the fetcher inspects it to
//! decide which sources to materialize and in which order. All types load from
//! camelCase JSON so a spec can be handed over as a file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BinaryInputDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSourceDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<SourceRevision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BuildStrategy>,
}

impl BuildSourceSpec {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read build spec: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build spec: {}", path.display()))
    }

    /// The force-pull flag of whichever strategy is configured, `false` without one.
    pub fn force_pull(&self) -> bool {
        self.strategy.as_ref().is_some_and(BuildStrategy::force_pull)
    }

    /// Commit pinned by the revision override, if it is non-empty.
    pub fn revision_commit(&self) -> Option<&str> {
        self.revision
            .as_ref()
            .and_then(|r| r.git.as_ref())
            .map(|g| g.commit.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Context subdirectory, ignoring an empty string.
    pub fn context_dir(&self) -> Option<&str> {
        self.context_dir.as_deref().filter(|d| !d.is_empty())
    }
}

/// Stdin is either written verbatim to `as_file` or, when that is empty,
/// unpacked as an archive into the build directory root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryInputDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_file: Option<String>,
}

impl BinaryInputDescriptor {
    pub fn as_file(&self) -> Option<&str> {
        self.as_file.as_deref().filter(|f| !f.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceDescriptor {
    pub uri: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

impl GitSourceDescriptor {
    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref().filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRevision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceRevision>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceRevision {
    #[serde(default)]
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<SourceControlUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer: Option<SourceControlUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceControlUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSourceDescriptor {
    pub from: String,
    /// Name of the pull secret. Only its presence matters here: the secret
    /// itself is resolved by position through [`crate::dockercfg::PullSecrets`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<String>,
    #[serde(default)]
    pub paths: Vec<ImageSourcePath>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSourcePath {
    pub source_path: String,
    #[serde(default)]
    pub destination_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuildStrategy {
    #[serde(rename_all = "camelCase")]
    Source {
        #[serde(default)]
        force_pull: bool,
    },
    #[serde(rename_all = "camelCase")]
    Docker {
        #[serde(default)]
        force_pull: bool,
    },
    #[serde(rename_all = "camelCase")]
    Custom {
        #[serde(default)]
        force_pull: bool,
    },
}

impl BuildStrategy {
    pub fn force_pull(&self) -> bool {
        match self {
            BuildStrategy::Source { force_pull }
            | BuildStrategy::Docker { force_pull }
            | BuildStrategy::Custom { force_pull } => *force_pull,
        }
    }
}
