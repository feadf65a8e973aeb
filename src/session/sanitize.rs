//! Name sanitization for branch names and directory components

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

/// Maximum length of a sanitized git name
pub const MAX_GIT_NAME_LEN: usize = 50;

static INVALID_GIT_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\-_./]").unwrap());

static INVALID_PATH_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_.]").unwrap());

static HYPHEN_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

/// Turn free-form text into a legal branch/session identifier.
///
/// Never fails. The result matches `^[a-z0-9\-_./]+$`, has no leading or
/// trailing `-`/`.`, and is at most [`MAX_GIT_NAME_LEN`] characters. Text that
/// sanitizes to nothing falls back to `branch-<unix seconds>`.
pub fn sanitize_for_git(input: &str) -> String {
    let lowered = input.to_lowercase();
    let replaced = INVALID_GIT_CHARS.replace_all(&lowered, "-");
    let collapsed = HYPHEN_RUNS.replace_all(&replaced, "-");
    let mut result = collapsed.trim_matches(|c| c == '-' || c == '.').to_string();

    if result.is_empty() {
        result = format!("branch-{}", Utc::now().timestamp());
    }

    // Only ASCII survives the replacement, so byte truncation is char-safe
    if result.len() > MAX_GIT_NAME_LEN {
        result.truncate(MAX_GIT_NAME_LEN);
        let trimmed = result.trim_end_matches(|c| c == '-' || c == '.').len();
        result.truncate(trimmed);
    }

    result
}

/// Turn free-form text into a single filesystem path component.
pub fn sanitize_for_path(input: &str) -> String {
    let replaced = INVALID_PATH_CHARS.replace_all(input, "-");
    let collapsed = HYPHEN_RUNS.replace_all(&replaced, "-");
    let result = collapsed.trim_matches('-');

    if result.is_empty() {
        format!("directory-{}", Utc::now().timestamp())
    } else {
        result.to_string()
    }
}

/// Default branch for a session: `<prefix>/<sanitized name>`
pub fn default_branch_name(prefix: &str, name: &str) -> String {
    let sanitized = sanitize_for_git(name);
    let prefix = prefix.trim_matches('/');

    if prefix.is_empty() {
        sanitized
    } else {
        format!("{}/{}", prefix, sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    static CLEAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9\-_./]*$").unwrap());

    #[test]
    fn test_sanitize_for_git() {
        assert_eq!(sanitize_for_git("My Feature!!"), "my-feature");
        assert_eq!(sanitize_for_git("fix-bug"), "fix-bug");
        assert_eq!(sanitize_for_git("Feature/Auth"), "feature/auth");
        assert_eq!(sanitize_for_git("--test--"), "test");
        assert_eq!(sanitize_for_git("..hidden.."), "hidden");
        assert_eq!(sanitize_for_git("a   b"), "a-b");
        assert_eq!(sanitize_for_git("Ünïcödé"), "n-c-d");
    }

    #[test]
    fn test_sanitize_for_git_empty_fallback() {
        for input in ["", "!!!", "---", "..."] {
            let out = sanitize_for_git(input);
            assert!(out.starts_with("branch-"), "{input:?} -> {out}");
            assert!(CLEAN.is_match(&out));
        }
    }

    #[test]
    fn test_sanitize_for_git_truncates() {
        let out = sanitize_for_git(&"a".repeat(80));
        assert_eq!(out.len(), MAX_GIT_NAME_LEN);

        // Truncation point lands right after a separator
        let input = format!("{}-{}", "a".repeat(49), "b".repeat(10));
        assert_eq!(sanitize_for_git(&input), "a".repeat(49));

        let input = format!("a{}b", ".".repeat(60));
        assert_eq!(sanitize_for_git(&input), "a");
    }

    #[test]
    fn test_sanitize_for_path() {
        assert_eq!(sanitize_for_path("My Repo"), "My-Repo");
        assert_eq!(sanitize_for_path("feature/auth"), "feature-auth");
        assert_eq!(sanitize_for_path("v1.2"), "v1.2");
        assert!(sanitize_for_path("///").starts_with("directory-"));
    }

    #[test]
    fn test_default_branch_name() {
        assert_eq!(default_branch_name("feature", "fix-bug"), "feature/fix-bug");
        assert_eq!(default_branch_name("feature/", "Fix Bug"), "feature/fix-bug");
        assert_eq!(default_branch_name("", "Fix Bug"), "fix-bug");
    }

    proptest! {
        #[test]
        fn prop_output_is_clean(input in ".*") {
            let out = sanitize_for_git(&input);
            prop_assert!(CLEAN.is_match(&out));
            prop_assert!(!out.is_empty());
            prop_assert!(out.len() <= MAX_GIT_NAME_LEN);
            prop_assert!(!out.starts_with('-') && !out.starts_with('.'));
            prop_assert!(!out.ends_with('-') && !out.ends_with('.'));
        }

        #[test]
        fn prop_idempotent(input in "[ -~]{0,80}") {
            let once = sanitize_for_git(&input);
            prop_assert_eq!(sanitize_for_git(&once), once.clone());
        }
    }
}
