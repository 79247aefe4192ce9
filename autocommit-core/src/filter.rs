//! Glob-based change filter.
//!
//! Patterns are matched against repo-relative paths with `/` separators.
//! `*` and `?` never cross a separator, `**` spans any number of directories,
//! and dotfiles are ordinary names, so `**/*` matches `.env`.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

/// A compiled file pattern. An invalid pattern matches nothing.
#[derive(Debug, Clone)]
pub struct FileFilter {
    pattern: String,
    matcher: Option<GlobMatcher>,
}

impl FileFilter {
    pub fn new(pattern: &str) -> Self {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .ok()
            .map(|glob| glob.compile_matcher());
        Self {
            pattern: pattern.to_string(),
            matcher,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };
        let normalized = path.to_string_lossy().replace('\\', "/");
        matcher.is_match(normalized.trim_start_matches("./"))
    }
}

/// One-shot form of [`FileFilter::matches`].
pub fn matches(path: &Path, pattern: &str) -> bool {
    FileFilter::new(pattern).matches(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("**/*.md", "docs/readme.md", true)]
    #[case("**/*.md", "readme.md", true)]
    #[case("**/*.md", "docs/readme.txt", false)]
    #[case("**/*", ".env", true)]
    #[case("**/*", "src/.hidden/config", true)]
    #[case("docs/*", "docs/a/b.md", false)]
    #[case("docs/**", "docs/a/b.md", true)]
    #[case("notes/?.md", "notes/a.md", true)]
    #[case("notes/?.md", "notes/ab.md", false)]
    #[case("**/*.[ch]", "src/main.c", true)]
    #[case("**/*.[ch]", "src/main.rs", false)]
    fn pattern_cases(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(matches(Path::new(path), pattern), expected, "{pattern} vs {path}");
    }

    #[test]
    fn invalid_pattern_matches_nothing() {
        let filter = FileFilter::new("[unclosed");
        assert!(!filter.matches(Path::new("anything")));
    }

    #[test]
    fn leading_dot_slash_is_ignored() {
        assert!(matches(Path::new("./docs/readme.md"), "docs/*.md"));
    }
}
