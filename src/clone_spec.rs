//! Syntax check for git clone locations, done before anything touches the network.

use std::path::Path;

const URL_SCHEMES: &[&str] = &["http", "https", "git", "ssh", "git+ssh", "file"];

/// Returns true if `spec` is something `git clone` can be pointed at: a URL with a
/// known scheme, an scp-like `user@host:path`, or an existing local directory.
pub fn is_valid_clone_spec(spec: &str) -> bool {
    if spec.is_empty() || spec.chars().any(char::is_whitespace) {
        return false;
    }

    if let Some((scheme, rest)) = spec.split_once("://") {
        return is_valid_url(scheme, rest);
    }

    if is_scp_like(spec) {
        return true;
    }

    Path::new(spec).is_dir()
}

fn is_valid_url(scheme: &str, rest: &str) -> bool {
    if !URL_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
        return false;
    }

    if scheme.eq_ignore_ascii_case("file") {
        return rest.len() > 1 && rest.starts_with('/');
    }

    // Strip userinfo, then the host must be non-empty
    let authority = rest.split('/').next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = if host_port.starts_with('[') {
        host_port.split(']').next().unwrap_or_default().trim_start_matches('[')
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'))
}

/// `[user@]host:path`, where the host part has no slash before the colon.
fn is_scp_like(spec: &str) -> bool {
    let Some((host_part, path)) = spec.split_once(':') else {
        return false;
    };
    if path.is_empty() || host_part.contains('/') {
        return false;
    }

    let host = host_part.rsplit('@').next().unwrap_or_default();
    // A single letter before the colon is a Windows drive, not a host
    host.len() > 1
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
