//! End-to-end fetches through `SourceFetcher` with mocked git and container runtime

#[cfg(test)]
mod tests {
    use crate::integration::common::*;
    use buildsrc::build_spec::{
        BinaryInputDescriptor, BuildStrategy, GitSourceDescriptor, GitSourceRevision,
        ImageSourceDescriptor, ImageSourcePath, SourceRevision,
    };
    use buildsrc::{
        BuildSourceSpec, Diagnostic, DockerConfig, FetchConfig, PullSecrets, SourceError,
        SourceFetcher,
    };
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);
    const IMAGE: &str = "quay.io/org/tools:1.0";

    fn git_spec() -> BuildSourceSpec {
        BuildSourceSpec {
            git: Some(GitSourceDescriptor {
                uri: REPO_URL.to_string(),
                git_ref: None,
            }),
            ..Default::default()
        }
    }

    fn image_source(paths: &[(&str, &str)]) -> ImageSourceDescriptor {
        ImageSourceDescriptor {
            from: IMAGE.to_string(),
            pull_secret: None,
            paths: paths
                .iter()
                .map(|(source, dest)| ImageSourcePath {
                    source_path: source.to_string(),
                    destination_dir: dest.to_string(),
                })
                .collect(),
        }
    }

    fn no_input() -> &'static [u8] {
        b""
    }

    #[test]
    fn test_git_only_fetch() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());

        let info = fetcher
            .fetch(&git_spec(), dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert_eq!(info, Some(head_info()));
        assert_eq!(
            fetcher.git().calls(),
            vec![
                GitCall::ListRemote(REPO_URL.to_string()),
                GitCall::Clone {
                    url: REPO_URL.to_string(),
                    opts: buildsrc::git::CloneOptions {
                        recursive: true,
                        quiet: true,
                        shallow: true,
                    },
                },
                GitCall::GetInfo,
            ]
        );
        assert!(fetcher.runtime().calls().is_empty());
        assert!(!fetcher.notifier().has_diagnostics());
    }

    #[test]
    fn test_empty_spec_does_nothing() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());

        let info = fetcher
            .fetch(&BuildSourceSpec::default(), dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert!(info.is_none());
        assert!(fetcher.git().calls().is_empty());
        assert!(fetcher.runtime().calls().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_revision_commit_is_checked_out() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());
        let spec = BuildSourceSpec {
            revision: Some(SourceRevision {
                git: Some(GitSourceRevision {
                    commit: "8f3c1d2e".to_string(),
                    ..Default::default()
                }),
            }),
            ..git_spec()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert!(fetcher
            .git()
            .calls()
            .contains(&GitCall::Checkout("8f3c1d2e".to_string())));
    }

    #[test]
    fn test_source_info_failure_is_a_diagnostic() {
        let dir = TempDir::new().unwrap();
        let git = MockGitClient {
            info: None,
            ..Default::default()
        };
        let fetcher = SourceFetcher::new(git, MockRuntime::new());
        let spec = BuildSourceSpec {
            dockerfile: Some("FROM scratch\n".to_string()),
            ..git_spec()
        };

        let info = fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert!(info.is_none());
        assert!(dir.path().join("Dockerfile").is_file(), "fetch must go on");
        let diagnostics = fetcher.notifier().diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics[0],
            Diagnostic::SourceInfoUnavailable { error, .. } if error.contains("not found")
        ));
    }

    #[test]
    fn test_image_paths_copied_in_order_with_one_container() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime::new()
            .with_file("/opt/a", "a/one.txt", b"1")
            .with_file("/opt/b", "b/two.txt", b"2");
        let fetcher = SourceFetcher::new(MockGitClient::new(), runtime);
        let spec = BuildSourceSpec {
            images: vec![image_source(&[("/opt/a", "first"), ("/opt/b", "second")])],
            ..Default::default()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        let downloads: Vec<String> = fetcher
            .runtime()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Download { path, .. } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(downloads, vec!["/opt/a", "/opt/b"]);
        assert_eq!(
            fetcher
                .runtime()
                .count(|c| matches!(c, RuntimeCall::Create(_))),
            1
        );
        assert_eq!(
            fetcher.runtime().calls().last(),
            Some(&RuntimeCall::Remove(CONTAINER_ID.to_string()))
        );
        assert_eq!(fs::read(dir.path().join("first/a/one.txt")).unwrap(), b"1");
        assert_eq!(fs::read(dir.path().join("second/b/two.txt")).unwrap(), b"2");
    }

    #[test]
    fn test_failed_copy_still_removes_container() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime {
            fail_download: Some(2),
            ..Default::default()
        };
        let fetcher = SourceFetcher::new(MockGitClient::new(), runtime);
        let spec = BuildSourceSpec {
            images: vec![image_source(&[("/opt/a", "a"), ("/opt/b", "b"), ("/opt/c", "c")])],
            dockerfile: Some("FROM scratch\n".to_string()),
            ..Default::default()
        };

        let err = fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap_err();

        assert_eq!(err.to_string(), "error copying source path /opt/b to b");
        let runtime = fetcher.runtime();
        assert_eq!(
            runtime.count(|c| matches!(c, RuntimeCall::Download { .. })),
            2
        );
        assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::Remove(_))), 1);
        assert!(!dir.path().join("Dockerfile").exists());
    }

    #[test]
    fn test_image_failure_stops_later_images() {
        let dir = TempDir::new().unwrap();
        let runtime = MockRuntime {
            pull_error: Some("unauthorized".to_string()),
            ..MockRuntime::absent()
        };
        let fetcher = SourceFetcher::new(MockGitClient::new(), runtime);
        let spec = BuildSourceSpec {
            images: vec![image_source(&[]), image_source(&[])],
            ..Default::default()
        };

        assert!(fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .is_err());
        assert_eq!(
            fetcher
                .runtime()
                .count(|c| matches!(c, RuntimeCall::Pull { .. })),
            1
        );
    }

    #[test]
    fn test_force_pull_from_strategy() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());
        let spec = BuildSourceSpec {
            images: vec![image_source(&[]), image_source(&[])],
            strategy: Some(BuildStrategy::Docker { force_pull: true }),
            ..Default::default()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert_eq!(
            fetcher
                .runtime()
                .count(|c| matches!(c, RuntimeCall::Pull { .. })),
            2
        );
    }

    #[test]
    fn test_pull_secret_follows_image_position() {
        let dir = TempDir::new().unwrap();
        let config = DockerConfig::from_json(
            r#"{"auths": {"quay.io": {"username": "robot", "password": "token"}}}"#,
        )
        .unwrap();
        let config = FetchConfig {
            pull_secrets: PullSecrets::new().with(1, config),
            ..FetchConfig::default()
        };
        let fetcher = SourceFetcher::with_config(MockGitClient::new(), MockRuntime::new(), config);

        let mut with_secret = image_source(&[]);
        with_secret.pull_secret = Some("quay-robot".to_string());
        let spec = BuildSourceSpec {
            images: vec![image_source(&[]), with_secret],
            strategy: Some(BuildStrategy::Source { force_pull: true }),
            ..Default::default()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        let auths: Vec<Option<String>> = fetcher
            .runtime()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Pull { auth, .. } => Some(auth.map(|a| a.username)),
                _ => None,
            })
            .collect();
        assert_eq!(auths, vec![None, Some("robot".to_string())]);
    }

    #[test]
    fn test_dockerfile_goes_to_context_dir_of_git_tree() {
        let dir = TempDir::new().unwrap();
        let git = MockGitClient {
            clone_creates: vec!["services/api".to_string()],
            ..Default::default()
        };
        let fetcher = SourceFetcher::new(git, MockRuntime::new());
        let spec = BuildSourceSpec {
            dockerfile: Some("FROM alpine\n".to_string()),
            context_dir: Some("services/api".to_string()),
            ..git_spec()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("services/api/Dockerfile")).unwrap(),
            "FROM alpine\n"
        );
        assert!(!dir.path().join("Dockerfile").exists());
    }

    #[test]
    fn test_absolute_context_dir_stays_in_build_dir() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("build");
        let outside = root.path().join("outside");
        fs::create_dir(&dir).unwrap();
        fs::create_dir(&outside).unwrap();

        let context_dir = outside.to_str().unwrap().to_string();
        let relative = context_dir.trim_start_matches('/').to_string();
        let git = MockGitClient {
            clone_creates: vec![relative.clone()],
            ..Default::default()
        };
        let fetcher = SourceFetcher::new(git, MockRuntime::new());
        let spec = BuildSourceSpec {
            dockerfile: Some("FROM alpine\n".to_string()),
            context_dir: Some(context_dir),
            ..git_spec()
        };

        fetcher
            .fetch(&spec, &dir, TIMEOUT, &mut no_input())
            .unwrap();

        assert!(!outside.join("Dockerfile").exists());
        assert_eq!(
            fs::read_to_string(dir.join(relative).join("Dockerfile")).unwrap(),
            "FROM alpine\n"
        );
    }

    #[test]
    fn test_context_dir_ignored_without_git() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());
        let spec = BuildSourceSpec {
            dockerfile: Some("FROM alpine\n".to_string()),
            context_dir: Some("services/api".to_string()),
            ..Default::default()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert!(dir.path().join("Dockerfile").is_file());
        assert!(!dir.path().join("services").exists());
    }

    #[test]
    fn test_dockerfile_replaces_cloned_one() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("Dockerfile"),
            "FROM golang\nRUN go build ./...\n",
        )
        .unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());
        let spec = BuildSourceSpec {
            dockerfile: Some("FROM alpine\n".to_string()),
            ..git_spec()
        };

        fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("Dockerfile")).unwrap(),
            "FROM alpine\n"
        );
    }

    #[test]
    fn test_binary_file_then_git() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());
        let spec = BuildSourceSpec {
            binary: Some(BinaryInputDescriptor {
                as_file: Some("app.jar".to_string()),
            }),
            ..git_spec()
        };

        let mut input: &[u8] = b"PK\x03\x04jar";
        fetcher.fetch(&spec, dir.path(), TIMEOUT, &mut input).unwrap();

        assert_eq!(fs::read(dir.path().join("app.jar")).unwrap(), b"PK\x03\x04jar");
        assert_eq!(fetcher.git().calls().len(), 3);
    }

    #[test]
    fn test_binary_failure_aborts_before_git() {
        let dir = TempDir::new().unwrap();
        let fetcher = SourceFetcher::new(MockGitClient::new(), MockRuntime::new());
        let spec = BuildSourceSpec {
            binary: Some(BinaryInputDescriptor {
                as_file: Some("../outside.bin".to_string()),
            }),
            images: vec![image_source(&[])],
            ..git_spec()
        };

        let err = fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::InvalidBinaryPath(_))
        ));
        assert!(fetcher.git().calls().is_empty());
        assert!(fetcher.runtime().calls().is_empty());
    }

    #[test]
    fn test_git_failure_stops_before_images() {
        let dir = TempDir::new().unwrap();
        let git = MockGitClient {
            listing_stdout: String::new(),
            listing_stderr: "fatal: repository not found".to_string(),
            listing_error: Some("exit status: 128".to_string()),
            ..Default::default()
        };
        let fetcher = SourceFetcher::new(git, MockRuntime::new());
        let spec = BuildSourceSpec {
            images: vec![image_source(&[])],
            dockerfile: Some("FROM scratch\n".to_string()),
            ..git_spec()
        };

        let err = fetcher
            .fetch(&spec, dir.path(), TIMEOUT, &mut no_input())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::GitNotFound(_))
        ));
        assert!(fetcher.runtime().calls().is_empty());
        assert!(!dir.path().join("Dockerfile").exists());
    }
}
