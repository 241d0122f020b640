//! # Ignore Matcher
//!
//! Compiles ignore-file lines into a path predicate.
//!
//! ## Pattern Syntax
//!
//! - blank lines and lines starting with `#` produce no rule
//! - a leading `!` negates the rule (`\!` and `\#` escape the marker)
//! - a trailing `/` restricts the rule to directories
//! - a leading or inner `/` anchors the pattern to the base path; otherwise
//!   the pattern matches at any depth
//! - `*` and `?` never cross `/`, `**` spans directories
//!
//! A rule matching a directory also matches everything beneath it.
//!
//! ## Evaluation
//!
//! Without negation rules the verdict is the OR of every rule. Once a
//! negation rule is present, rules are scanned in file order and the last
//! matching rule decides. A path matched by no rule is not ignored.

use bridge_traits::storage::ancestors;
use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

/// One parsed ignore-file line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    /// Pattern text with markers and anchoring slash removed
    pub pattern: String,
    pub negation: bool,
    pub dir_only: bool,
    pub anchored: bool,
    /// 1-based line number in the source file
    pub line: usize,
    /// Directory the rule is relative to (empty for the tree root)
    pub base_path: String,
}

impl IgnoreRule {
    /// Parse one line; `None` for blanks and comments
    pub fn parse(raw: &str, line: usize, base_path: &str) -> Option<Self> {
        let text = trim_trailing(raw);
        if text.is_empty() || text.starts_with('#') {
            return None;
        }

        let (negation, body) = if let Some(rest) = text.strip_prefix("\\!") {
            (false, format!("!{rest}"))
        } else if let Some(rest) = text.strip_prefix("\\#") {
            (false, format!("#{rest}"))
        } else if let Some(rest) = text.strip_prefix('!') {
            (true, rest.to_string())
        } else {
            (false, text)
        };

        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, body.as_str()),
        };

        let anchored = body.contains('/');
        let pattern = body.trim_start_matches('/');
        if pattern.is_empty() {
            return None;
        }

        Some(Self {
            pattern: pattern.to_string(),
            negation,
            dir_only,
            anchored,
            line,
            base_path: base_path.trim_matches('/').to_string(),
        })
    }

    fn glob_text(&self) -> String {
        if self.anchored || self.pattern.starts_with("**/") {
            self.pattern.clone()
        } else {
            format!("**/{}", self.pattern)
        }
    }
}

/// An ignore line that failed to compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRule {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: IgnoreRule,
    glob: GlobMatcher,
}

impl CompiledRule {
    fn matches(&self, path: &str, is_dir: bool) -> bool {
        let relative = if self.rule.base_path.is_empty() {
            path
        } else {
            match path
                .strip_prefix(self.rule.base_path.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };
        if relative.is_empty() {
            return false;
        }

        if ancestors(relative).into_iter().any(|dir| self.glob.is_match(dir)) {
            return true;
        }
        (is_dir || !self.rule.dir_only) && self.glob.is_match(relative)
    }
}

/// Compiled ignore predicate
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<CompiledRule>,
    skipped: Vec<SkippedRule>,
    has_negation: bool,
}

impl IgnoreMatcher {
    /// A matcher that ignores nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile ignore-file lines relative to `base_path`
    ///
    /// Lines whose glob cannot be compiled are skipped and reported through
    /// [`IgnoreMatcher::skipped`].
    pub fn compile<I, S>(lines: I, base_path: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::empty();

        for (idx, raw) in lines.into_iter().enumerate() {
            let raw = raw.as_ref();
            let Some(rule) = IgnoreRule::parse(raw, idx + 1, base_path) else {
                continue;
            };

            let glob = GlobBuilder::new(&rule.glob_text())
                .literal_separator(true)
                .backslash_escape(true)
                .build();

            match glob {
                Ok(glob) => {
                    matcher.has_negation |= rule.negation;
                    matcher.rules.push(CompiledRule {
                        rule,
                        glob: glob.compile_matcher(),
                    });
                }
                Err(e) => {
                    warn!(line = idx + 1, pattern = %raw.trim(), error = %e, "Skipping invalid ignore pattern");
                    matcher.skipped.push(SkippedRule {
                        line: idx + 1,
                        text: raw.trim_end().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        matcher
    }

    /// Compile the contents of an ignore file
    pub fn from_text(text: &str, base_path: &str) -> Self {
        Self::compile(text.lines(), base_path)
    }

    /// Whether `path` is ignored; a trailing `/` marks a directory
    pub fn is_ignored(&self, path: &str) -> bool {
        match path.strip_suffix('/') {
            Some(dir) => self.is_ignored_entry(dir, true),
            None => self.is_ignored_entry(path, false),
        }
    }

    pub fn is_ignored_entry(&self, path: &str, is_dir: bool) -> bool {
        let path = path.trim_start_matches('/');

        if !self.has_negation {
            return self.rules.iter().any(|r| r.matches(path, is_dir));
        }

        let mut ignored = false;
        for compiled in &self.rules {
            if compiled.matches(path, is_dir) {
                ignored = !compiled.rule.negation;
            }
        }
        ignored
    }

    pub fn rules(&self) -> impl Iterator<Item = &IgnoreRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn skipped(&self) -> &[SkippedRule] {
        &self.skipped
    }

    pub fn has_negation(&self) -> bool {
        self.has_negation
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Strip line terminators and unescaped trailing spaces
fn trim_trailing(raw: &str) -> String {
    let mut text = raw.trim_end_matches(['\n', '\r']).to_string();
    while text.ends_with(' ') {
        if text.ends_with("\\ ") {
            text.truncate(text.len() - 2);
            text.push(' ');
            break;
        }
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(lines: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::compile(lines.iter().copied(), "")
    }

    #[test]
    fn test_parse_markers() {
        let rule = IgnoreRule::parse("!build/", 3, "").unwrap();
        assert!(rule.negation);
        assert!(rule.dir_only);
        assert!(!rule.anchored);
        assert_eq!(rule.pattern, "build");
        assert_eq!(rule.line, 3);

        let rule = IgnoreRule::parse("/target\r\n", 1, "").unwrap();
        assert!(rule.anchored);
        assert_eq!(rule.pattern, "target");

        let rule = IgnoreRule::parse("\\!important", 1, "").unwrap();
        assert!(!rule.negation);
        assert_eq!(rule.pattern, "!important");

        let rule = IgnoreRule::parse("\\#hash", 1, "").unwrap();
        assert_eq!(rule.pattern, "#hash");

        assert!(IgnoreRule::parse("", 1, "").is_none());
        assert!(IgnoreRule::parse("   ", 1, "").is_none());
        assert!(IgnoreRule::parse("# comment", 1, "").is_none());
        assert!(IgnoreRule::parse("!", 1, "").is_none());
    }

    #[test]
    fn test_trailing_spaces() {
        assert_eq!(trim_trailing("a.txt   "), "a.txt");
        assert_eq!(trim_trailing("a.txt\\ "), "a.txt ");
        assert_eq!(trim_trailing("a.txt\n"), "a.txt");
    }

    #[test]
    fn test_negation_last_match_wins() {
        let m = matcher(&["*.log", "!keep.log"]);
        assert!(m.has_negation());
        assert!(m.is_ignored("app.log"));
        assert!(!m.is_ignored("keep.log"));
        assert!(!m.is_ignored("other.txt"));
        assert!(m.is_ignored("logs/deep/app.log"));
        assert!(!m.is_ignored("logs/keep.log"));
    }

    #[test]
    fn test_order_matters_with_negation() {
        let m = matcher(&["!keep.log", "*.log"]);
        assert!(m.is_ignored("keep.log"));
    }

    #[test]
    fn test_or_semantics_and_duplicates() {
        let single = matcher(&["*.tmp"]);
        let doubled = matcher(&["*.tmp", "*.tmp"]);
        let combined = matcher(&["*.tmp", "build/"]);

        for path in ["a.tmp", "x/a.tmp", "a.txt", "build/out.o", "src/build/x"] {
            assert_eq!(single.is_ignored(path), doubled.is_ignored(path), "{path}");
            assert_eq!(
                combined.is_ignored(path),
                single.is_ignored(path) || matcher(&["build/"]).is_ignored(path),
                "{path}"
            );
        }
    }

    #[test]
    fn test_unanchored_matches_any_depth() {
        let m = matcher(&["secret.txt"]);
        assert!(m.is_ignored("secret.txt"));
        assert!(m.is_ignored("a/b/secret.txt"));
        assert!(!m.is_ignored("a/secret.txt.bak"));
    }

    #[test]
    fn test_anchored_patterns() {
        let m = matcher(&["/only-root.txt", "docs/*.md"]);
        assert!(m.is_ignored("only-root.txt"));
        assert!(!m.is_ignored("sub/only-root.txt"));
        assert!(m.is_ignored("docs/readme.md"));
        assert!(!m.is_ignored("docs/nested/readme.md"));
        assert!(!m.is_ignored("other/docs/readme.md"));
    }

    #[test]
    fn test_directory_rules_cover_descendants() {
        let m = matcher(&["build/"]);
        assert!(m.is_ignored_entry("build", true));
        assert!(!m.is_ignored_entry("build", false));
        assert!(m.is_ignored("build/"));
        assert!(m.is_ignored("build/out/app.o"));
        assert!(m.is_ignored("src/build/x.o"));
    }

    #[test]
    fn test_double_star() {
        let m = matcher(&["tests/**/*.out"]);
        assert!(m.is_ignored("tests/01.out"));
        assert!(m.is_ignored("tests/a/b/01.out"));
        assert!(!m.is_ignored("tests/01.in"));
    }

    #[test]
    fn test_base_path_scopes_rules() {
        let m = IgnoreMatcher::compile(["*.bin"], "data");
        assert!(m.is_ignored("data/blob.bin"));
        assert!(m.is_ignored("data/x/blob.bin"));
        assert!(!m.is_ignored("blob.bin"));
        assert!(!m.is_ignored("database/blob.bin"));
    }

    #[test]
    fn test_invalid_glob_is_skipped() {
        let m = matcher(&["[unclosed", "*.o"]);
        assert_eq!(m.rules().count(), 1);
        assert_eq!(m.skipped().len(), 1);
        assert_eq!(m.skipped()[0].line, 1);
        assert!(m.is_ignored("main.o"));
    }

    #[test]
    fn test_empty_matcher() {
        let m = IgnoreMatcher::empty();
        assert!(m.is_empty());
        assert!(!m.is_ignored("anything"));

        let m = IgnoreMatcher::from_text("# only comments\n\n", "");
        assert!(m.is_empty());
        assert!(!m.is_ignored("anything"));
    }
}
