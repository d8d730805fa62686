//! Registry credentials from docker config files.
//!
//! A [`DockerConfig`] is parsed from either the modern `config.json` layout
//! (`{"auths": {...}}`) or the legacy flat `.dockercfg` layout. [`PullSecrets`] maps
//! the position of an image source in a build spec to the config holding its pull
//! secret, so callers decide explicitly which credentials each image may use.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DOCKER_HUB_REGISTRY: &str = "docker.io";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub email: String,
    pub server_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct DockerConfig {
    auths: HashMap<String, AuthEntry>,
}

impl DockerConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read docker config: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse docker config: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        if let Ok(config) = serde_json::from_str::<ConfigFile>(content) {
            return Ok(Self {
                auths: config.auths,
            });
        }
        let auths: HashMap<String, AuthEntry> =
            serde_json::from_str(content).context("Invalid docker config JSON")?;
        Ok(Self { auths })
    }

    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    /// Credentials for the registry serving `image`, if this config has any.
    pub fn auth_for(&self, image: &str) -> Option<RegistryAuth> {
        let registry = registry_for_image(image);
        self.auths
            .iter()
            .find(|(server, _)| normalize_registry(server) == registry)
            .and_then(|(server, entry)| decode_entry(server, entry))
    }
}

fn decode_entry(server: &str, entry: &AuthEntry) -> Option<RegistryAuth> {
    let (username, password) = match (&entry.username, &entry.password) {
        (Some(user), Some(pass)) if !user.is_empty() => (user.clone(), pass.clone()),
        _ => {
            let encoded = entry.auth.as_deref().filter(|a| !a.is_empty())?;
            let decoded = match STANDARD.decode(encoded.trim()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::warn!("Ignoring malformed auth entry for {}: {}", server, e);
                    return None;
                }
            };
            let decoded = String::from_utf8_lossy(&decoded).to_string();
            let (user, pass) = decoded.split_once(':')?;
            (user.to_string(), pass.to_string())
        }
    };

    Some(RegistryAuth {
        username,
        password,
        email: entry.email.clone().unwrap_or_default(),
        server_address: server.to_string(),
    })
}

/// Reduces a config key such as `https://index.docker.io/v1/` to a bare registry host.
fn normalize_registry(server: &str) -> String {
    let without_scheme = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    let host = without_scheme.split('/').next().unwrap_or_default();
    match host {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DOCKER_HUB_REGISTRY.to_string()
        }
        _ => host.to_ascii_lowercase(),
    }
}

/// Registry host of an image reference. References without a host part live on Docker Hub.
pub fn registry_for_image(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            normalize_registry(first)
        }
        _ => DOCKER_HUB_REGISTRY.to_string(),
    }
}

/// Pull secrets keyed by the position of the image source they belong to.
#[derive(Debug, Clone, Default)]
pub struct PullSecrets {
    secrets: HashMap<usize, DockerConfig>,
}

impl PullSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, config: DockerConfig) {
        self.secrets.insert(index, config);
    }

    pub fn with(mut self, index: usize, config: DockerConfig) -> Self {
        self.insert(index, config);
        self
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Credentials for `image` from the secret at `index`. A missing secret, or one
    /// without an entry for the image's registry, yields `None`.
    pub fn auth_for(&self, index: usize, image: &str) -> Option<RegistryAuth> {
        self.secrets.get(&index).and_then(|c| c.auth_for(image))
    }
}
