use anyhow::{anyhow, bail, Context, Result};
use log::{debug, trace};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

use crate::dockercfg::{self, RegistryAuth};
use crate::process::{join_reader, spawn_reader};

/// The parts of an image's runtime config that matter when creating a scratch container.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
}

impl ImageConfig {
    pub fn has_entrypoint_or_cmd(&self) -> bool {
        let non_empty = |v: &Option<Vec<String>>| v.as_ref().is_some_and(|v| !v.is_empty());
        non_empty(&self.entrypoint) || non_empty(&self.cmd)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerConfig {
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
}

/// Container runtime operations needed to copy files out of an image.
pub trait ContainerRuntime {
    /// `Ok(None)` when the image is not present locally.
    fn inspect_image(&self, image: &str) -> Result<Option<ImageConfig>>;
    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()>;
    /// Creates a container without starting it and returns its id.
    fn create_container(&self, config: &ContainerConfig) -> Result<String>;
    fn remove_container(&self, id: &str) -> Result<()>;
    /// Writes `path` inside the container to `out` as a tar stream.
    fn download_from_container(&self, id: &str, path: &str, out: &mut dyn Write) -> Result<()>;
}

fn is_no_such_image(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such image")
}

/// [`ContainerRuntime`] driving the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("docker"),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run_command(&self, config_dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        if let Some(dir) = config_dir {
            cmd.arg("--config").arg(dir);
        }
        let output = cmd
            .args(args)
            .stdin(Stdio::null())
            .output()
            .context(format!("Failed to execute docker command: {:?}", args))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Docker command failed: {}", error.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Logs in against a throwaway config directory so the user's own docker config
    /// is left untouched.
    fn login(&self, config_dir: &Path, image: &str, auth: &RegistryAuth) -> Result<()> {
        let server = if auth.server_address.is_empty() {
            dockercfg::registry_for_image(image)
        } else {
            auth.server_address.clone()
        };

        let mut child = Command::new(&self.program)
            .arg("--config")
            .arg(config_dir)
            .args(["login", "--username", &auth.username, "--password-stdin", &server])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to execute docker login")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(auth.password.as_bytes())
                .context("Failed to pass registry password to docker login")?;
        }

        let output = child.wait_with_output().context("Failed to wait for docker login")?;
        if !output.status.success() {
            bail!(
                "docker login to {} failed: {}",
                server,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl ContainerRuntime for DockerCli {
    fn inspect_image(&self, image: &str) -> Result<Option<ImageConfig>> {
        let output = Command::new(&self.program)
            .args(["image", "inspect", "--format", "{{json .Config}}", image])
            .stdin(Stdio::null())
            .output()
            .context("Failed to execute docker image inspect")?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if is_no_such_image(&stderr) {
                return Ok(None);
            }
            bail!("Failed to inspect image {}: {}", image, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let config: Option<ImageConfig> = serde_json::from_str(stdout.trim())
            .with_context(|| format!("Failed to parse image config of {}", image))?;
        Ok(Some(config.unwrap_or_default()))
    }

    fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        match auth {
            Some(auth) => {
                let config_dir = TempDir::new().context("Failed to create temporary directory")?;
                self.login(config_dir.path(), image, auth)?;
                self.run_command(Some(config_dir.path()), &["pull", image])?;
            }
            None => {
                self.run_command(None, &["pull", image])?;
            }
        }
        Ok(())
    }

    fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let mut args = vec!["create"];
        if let Some(entrypoint) = config.entrypoint.as_ref().and_then(|e| e.first()) {
            args.push("--entrypoint");
            args.push(entrypoint);
        }
        args.push(&config.image);

        let id = self.run_command(None, &args)?.trim().to_string();
        if id.is_empty() {
            bail!("docker create returned no container id");
        }
        debug!("Created container {} from {}", id, config.image);
        Ok(id)
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        self.run_command(None, &["rm", id])?;
        Ok(())
    }

    fn download_from_container(&self, id: &str, path: &str, out: &mut dyn Write) -> Result<()> {
        let source = format!("{}:{}", id, path);
        trace!("docker cp {} -", source);

        let mut child = Command::new(&self.program)
            .args(["cp", &source, "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to execute docker cp")?;

        let stderr = spawn_reader(child.stderr.take());
        let copied = match child.stdout.take() {
            Some(mut stdout) => std::io::copy(&mut stdout, out).map(|_| ()),
            None => Ok(()),
        };
        if copied.is_err() {
            let _ = child.kill();
        }

        let status = child.wait().context("Failed to wait for docker cp")?;
        let stderr = join_reader(stderr);
        copied.with_context(|| format!("Failed to stream {} from container", path))?;
        if !status.success() {
            bail!(
                "Failed to download {} from container {}: {}",
                path,
                id,
                stderr.trim()
            );
        }
        Ok(())
    }
}
