use std::path::{Path, PathBuf};

const BROKER_EXE: &str = "agent-relay-broker";

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Expands a leading `~` or `~/`/`~\` into the user's home directory.
/// Any other path is returned unchanged.
pub fn expand_tilde(path: &str) -> String {
    let rest = if path == "~" {
        Some("")
    } else if let Some(rest) = path.strip_prefix("~/") {
        Some(rest)
    } else if let Some(rest) = path.strip_prefix("~\\") {
        Some(rest)
    } else {
        None
    };

    let Some(rest) = rest else {
        return path.to_string();
    };

    match home_dir() {
        Some(home) => home.join(rest).to_string_lossy().into_owned(),
        None => path.to_string(),
    }
}

/// Whether `binary_path` names a specific location rather than a bare
/// executable name to look up on `PATH`.
pub fn is_explicit_path(binary_path: &str) -> bool {
    binary_path.contains('/')
        || binary_path.contains('\\')
        || binary_path.starts_with('.')
        || binary_path.starts_with('~')
}

/// Finds the broker binary to run when the caller didn't specify one:
/// first `~/.agent-relay/bin/agent-relay-broker`, then a `PATH` lookup,
/// then the bare name as a last resort (spawning will fail with a clear
/// error if it really isn't anywhere).
pub fn resolve_default_binary_path() -> String {
    if let Some(home) = home_dir() {
        let standalone = home.join(".agent-relay").join("bin").join(BROKER_EXE);
        if standalone.exists() {
            return standalone.to_string_lossy().into_owned();
        }
    }

    if let Some(found) = which(BROKER_EXE) {
        return found.to_string_lossy().into_owned();
    }

    "agent-relay".to_string()
}

/// Minimal `PATH` lookup so this crate doesn't need a `which` dependency
/// for a single, narrow use.
fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        candidate.is_file().then_some(candidate)
    })
}

/// The directory an explicit binary path lives in, for prepending to
/// `PATH` so the broker can find its own sibling tools if it needs to.
pub fn parent_dir(resolved_binary: &str) -> Option<PathBuf> {
    Path::new(resolved_binary)
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
}

/// Prepends `dir` to a `PATH`-style variable unless it's already present,
/// returning `None` when no change is needed (caller keeps the inherited
/// value).
pub fn prepend_to_path(existing: Option<&str>, dir: &Path) -> Option<String> {
    let existing = existing.unwrap_or_default();
    let already_present = std::env::split_paths(existing).any(|p| p == dir);
    if already_present {
        return None;
    }

    let mut paths = vec![dir.to_path_buf()];
    paths.extend(std::env::split_paths(existing));
    std::env::join_paths(paths)
        .ok()
        .map(|joined| joined.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_tilde_expands_to_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_tilde("~"), "/home/tester");
    }

    #[test]
    fn tilde_slash_expands_relative_to_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_tilde("~/.agent-relay/bin/x"), "/home/tester/.agent-relay/bin/x");
    }

    #[test]
    fn non_tilde_path_is_unchanged() {
        assert_eq!(expand_tilde("/usr/local/bin/agent-relay"), "/usr/local/bin/agent-relay");
        assert_eq!(expand_tilde("agent-relay"), "agent-relay");
    }

    #[test]
    fn prepend_to_path_adds_missing_dir() {
        let joined = prepend_to_path(Some("/usr/bin"), Path::new("/opt/agent-relay/bin")).unwrap();
        assert!(joined.starts_with("/opt/agent-relay/bin"));
        assert!(joined.contains("/usr/bin"));
    }

    #[test]
    fn prepend_to_path_is_noop_when_already_present() {
        assert!(prepend_to_path(Some("/opt/bin:/usr/bin"), Path::new("/opt/bin")).is_none());
    }

    #[test]
    fn explicit_path_detection() {
        assert!(is_explicit_path("./broker"));
        assert!(is_explicit_path("../broker"));
        assert!(is_explicit_path("/usr/bin/broker"));
        assert!(is_explicit_path("~/broker"));
        assert!(is_explicit_path("bin\\broker"));
        assert!(!is_explicit_path("agent-relay-broker"));
    }
}
