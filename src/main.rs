use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, info};
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use buildsrc::dockercfg::{DockerConfig, PullSecrets};
use buildsrc::notifier::{init_logging, VerbosityLevel};
use buildsrc::{BuildSourceSpec, DockerCli, FetchConfig, GitCli, SourceFetcher};

/// Environment variables naming a docker config file per image source index.
const PULL_SECRET_ENV_PREFIX: &str = "PULL_SOURCE_DOCKERCFG_PATH_";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, help = "Build source specification (JSON)")]
    spec: PathBuf,

    #[arg(
        short,
        long,
        default_value = "./build",
        help = "Directory to materialize the build inputs into"
    )]
    dir: PathBuf,

    #[arg(
        long,
        default_value_t = 16,
        help = "Seconds to wait for the git remote to answer before giving up"
    )]
    url_timeout: u64,

    #[arg(
        long = "pull-secret",
        value_name = "INDEX=PATH",
        help = "Docker config file holding the pull secret of the image source at INDEX"
    )]
    pull_secrets: Vec<String>,

    #[arg(
        long,
        default_value = "bsdtar",
        help = "bsdtar-compatible program used to unpack binary archive input"
    )]
    archive_program: PathBuf,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace)"
    )]
    verbose: u8,
}

fn parse_pull_secret(arg: &str) -> Result<(usize, PathBuf)> {
    let (index, path) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid pull secret {:?}, expected INDEX=PATH", arg))?;
    let index = index
        .parse()
        .with_context(|| format!("Invalid pull secret index {:?}", index))?;
    Ok((index, PathBuf::from(path)))
}

fn load_pull_secrets(args: &[String]) -> Result<PullSecrets> {
    let mut locations = Vec::new();
    for (key, value) in env::vars() {
        if let Some(index) = key.strip_prefix(PULL_SECRET_ENV_PREFIX) {
            if let Ok(index) = index.parse::<usize>() {
                locations.push((index, PathBuf::from(value)));
            }
        }
    }
    // Command line entries override the environment
    for arg in args {
        locations.push(parse_pull_secret(arg)?);
    }

    let mut secrets = PullSecrets::new();
    for (index, path) in locations {
        debug!("Loading pull secret {} from {}", index, path.display());
        secrets.insert(index, DockerConfig::from_path(&path)?);
    }
    Ok(secrets)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(VerbosityLevel::from(cli.verbose));

    info!("Fetching build sources from {}", cli.spec.display());
    let spec = BuildSourceSpec::from_path(&cli.spec)?;

    fs::create_dir_all(&cli.dir)
        .with_context(|| format!("Failed to create {}", cli.dir.display()))?;

    let config = FetchConfig {
        archive_program: cli.archive_program,
        pull_secrets: load_pull_secrets(&cli.pull_secrets)?,
        ..FetchConfig::default()
    };
    let fetcher = SourceFetcher::with_config(GitCli::new(), DockerCli::new(), config);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let source_info = fetcher.fetch(
        &spec,
        &cli.dir,
        Duration::from_secs(cli.url_timeout),
        &mut input,
    )?;

    if let Some(info) = source_info {
        println!("{}", serde_json::to_string_pretty(&info)?);
    }

    Ok(())
}
