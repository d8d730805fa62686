use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, log_enabled, trace, Level};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::build_spec::ImageSourcePath;
use crate::container::{ContainerConfig, ContainerRuntime};
use crate::dockercfg::{PullSecrets, RegistryAuth};
use crate::notifier::{Diagnostic, Notifier};
use crate::tar_extractor::{join_under, TarExtractor};

/// Entrypoint given to scratch containers of images that define neither entrypoint nor
/// command. The container is never started, it only has to be creatable.
pub const FAKE_ENTRYPOINT: &str = "/fake-entrypoint";

/// Removes the scratch container when dropped. Removal failures become diagnostics.
struct ContainerGuard<'a, R: ContainerRuntime + ?Sized> {
    runtime: &'a R,
    id: String,
    notifier: &'a Notifier,
}

impl<R: ContainerRuntime + ?Sized> Drop for ContainerGuard<'_, R> {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.remove_container(&self.id) {
            self.notifier.report(Diagnostic::ContainerRemovalFailed {
                container_id: self.id.clone(),
                error: format!("{:#}", e),
            });
        }
    }
}

fn log_auth(auth: &RegistryAuth) {
    trace!("Registry server Address: {}", auth.server_address);
    trace!("Registry server User Name: {}", auth.username);
    trace!("Registry server Email: {}", auth.email);
    let password_present = if auth.password.is_empty() {
        "<<empty>>"
    } else {
        "<<non-empty>>"
    };
    trace!("Registry server Password: {}", password_present);
}

/// Copies `paths` out of `image` into subdirectories of `build_dir`. Destination
/// directories resolve under `build_dir` even when given as absolute paths.
///
/// The image is pulled when `force_pull` is set or when it is not present locally.
/// `secret_index` selects the pull secret in `secrets`; `None` means anonymous pulls.
#[allow(clippy::too_many_arguments)]
pub fn extract_source_from_image<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    notifier: &Notifier,
    image: &str,
    build_dir: &Path,
    secret_index: Option<usize>,
    secrets: &PullSecrets,
    paths: &[ImageSourcePath],
    force_pull: bool,
) -> Result<()> {
    debug!("Extracting image source from {}", image);

    let auth = secret_index.and_then(|index| secrets.auth_for(index, image));
    if let Some(auth) = &auth {
        log_auth(auth);
    }

    let exists = if force_pull {
        true
    } else {
        runtime
            .inspect_image(image)
            .with_context(|| format!("error inspecting image {}", image))?
            .is_some()
    };

    if force_pull || !exists {
        info!("Pulling image {:?} ...", image);
        runtime
            .pull_image(image, auth.as_ref())
            .with_context(|| format!("error pulling image {}", image))?;
    }

    let image_config = runtime
        .inspect_image(image)
        .with_context(|| format!("error inspecting image {}", image))?
        .ok_or_else(|| anyhow!("image {} not found after pull", image))?;

    let mut container_config = ContainerConfig {
        image: image.to_string(),
        entrypoint: None,
    };
    if !image_config.has_entrypoint_or_cmd() {
        container_config.entrypoint = Some(vec![FAKE_ENTRYPOINT.to_string()]);
    }

    let id = runtime
        .create_container(&container_config)
        .context("error creating source image container")?;
    let container = ContainerGuard {
        runtime,
        id,
        notifier,
    };

    let mut extractor = TarExtractor::new();
    extractor.set_exclusion_pattern(None);

    for path in paths {
        debug!(
            "Extracting path {} from container {} to {}",
            path.source_path, container.id, path.destination_dir
        );
        copy_image_source(
            runtime,
            &container.id,
            &path.source_path,
            &join_under(build_dir, &path.destination_dir),
            &extractor,
        )
        .with_context(|| {
            format!(
                "error copying source path {} to {}",
                path.source_path, path.destination_dir
            )
        })?;
    }

    Ok(())
}

fn ensure_dir(dest_dir: &Path) -> Result<()> {
    match fs::metadata(dest_dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => bail!("destination {} must be a directory", dest_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Creating image destination directory: {}", dest_dir.display());
            fs::create_dir_all(dest_dir)
                .with_context(|| format!("Failed to create {}", dest_dir.display()))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", dest_dir.display())),
    }
}

/// Streams `source_dir` out of the container into `dest_dir` via a temporary archive.
/// The archive is deleted when this returns.
pub fn copy_image_source<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    container_id: &str,
    source_dir: &str,
    dest_dir: &Path,
    extractor: &TarExtractor,
) -> Result<()> {
    ensure_dir(dest_dir)?;

    let mut archive = tempfile::Builder::new()
        .prefix("imgsrc")
        .tempfile()
        .context("Failed to create temporary archive")?;
    debug!(
        "Downloading source from path {} in container {} to temporary archive {}",
        source_dir,
        container_id,
        archive.path().display()
    );
    runtime.download_from_container(container_id, source_dir, archive.as_file_mut())?;
    archive.as_file_mut().flush()?;

    let file = archive.reopen().context("Failed to reopen temporary archive")?;
    debug!(
        "Extracting temporary tar {} to directory {}",
        archive.path().display(),
        dest_dir.display()
    );

    let mut stdout = std::io::stdout();
    let progress: Option<&mut dyn Write> = if log_enabled!(Level::Debug) {
        Some(&mut stdout)
    } else {
        None
    };
    extractor.extract_stream(dest_dir, file, progress)
}
