//! Mapping of toolchain-reported source paths onto canonical,
//! repository-relative paths.
//!
//! All work is lexical: nothing here touches the filesystem, so the same raw
//! path always resolves the same way. Paths are handled as `/`-separated
//! strings so that Windows paths coming out of OpenCppCoverage or clang-cl
//! resolve identically on every host.

use glob::{MatchOptions, Pattern};

use crate::error::{GatherError, Result};

/// Glob semantics for ignore patterns: `*` and `?` stay within one path
/// component, `**` spans directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Why a path did not make it into the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    OutsideSourceRoot,
    NotIncluded,
    Ignored(String),
}

/// Outcome of resolving one raw path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Included(String),
    Excluded(Exclusion),
}

/// Allowed roots and ignore rules applied to every raw path before it is
/// admitted into the report.
#[derive(Debug, Clone)]
pub struct PathFilter {
    source_root: String,
    relative_base: String,
    include_dirs: Vec<String>,
    ignore: Vec<(String, Pattern)>,
}

impl PathFilter {
    /// `source_root` and `relative_base` must be absolute. Relative raw paths
    /// are interpreted against `relative_base`.
    pub fn new(
        source_root: &str,
        relative_base: &str,
        include_dirs: &[String],
        ignore_patterns: &[String],
    ) -> Result<Self> {
        let source_root = normalize(source_root)?;
        let relative_base = normalize(relative_base)?;
        if !is_absolute(&source_root) || !is_absolute(&relative_base) {
            return Err(GatherError::Config(format!(
                "source root '{}' and relative base '{}' must be absolute",
                source_root, relative_base
            )));
        }

        let mut dirs = Vec::with_capacity(include_dirs.len());
        for dir in include_dirs {
            let dir = normalize(dir)?;
            if is_absolute(&dir) {
                return Err(GatherError::Config(format!(
                    "include directory '{}' must be relative to the source root",
                    dir
                )));
            }
            dirs.push(dir);
        }
        if dirs.is_empty() {
            return Err(GatherError::Config(
                "no include directories given".to_string(),
            ));
        }

        let ignore = ignore_patterns
            .iter()
            .map(|p| {
                let compiled = compile_glob(p).map_err(|source| GatherError::Pattern {
                    pattern: p.clone(),
                    source,
                })?;
                Ok((p.clone(), compiled))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source_root,
            relative_base,
            include_dirs: dirs,
            ignore,
        })
    }

    /// Resolve a toolchain-reported path against the filter configuration.
    pub fn resolve(&self, raw: &str) -> Result<Resolution> {
        let cleaned = clean_raw(raw);
        if cleaned.is_empty() {
            return Err(GatherError::Path {
                path: raw.to_string(),
                reason: "empty path".to_string(),
            });
        }

        let joined = if is_absolute(&cleaned) {
            cleaned
        } else {
            format!("{}/{}", self.relative_base, cleaned)
        };
        let absolute = normalize(&joined).map_err(|_| GatherError::Path {
            path: raw.to_string(),
            reason: "'..' climbs above the filesystem root".to_string(),
        })?;

        let name = match strip_dir(&absolute, &self.source_root) {
            Some(name) if !name.is_empty() => name,
            _ => return Ok(Resolution::Excluded(Exclusion::OutsideSourceRoot)),
        };

        if !self.include_dirs.iter().any(|dir| is_below(name, dir)) {
            return Ok(Resolution::Excluded(Exclusion::NotIncluded));
        }

        if let Some((pattern, _)) = self
            .ignore
            .iter()
            .find(|(_, p)| p.matches_with(name, MATCH_OPTIONS))
        {
            return Ok(Resolution::Excluded(Exclusion::Ignored(pattern.clone())));
        }

        Ok(Resolution::Included(name.to_string()))
    }
}

/// A trailing `**` is spelled `**/*` so that it reaches files at any depth.
fn compile_glob(pattern: &str) -> std::result::Result<Pattern, glob::PatternError> {
    let pattern = pattern.replace('\\', "/");
    if pattern == "**" || pattern.ends_with("/**") {
        Pattern::new(&format!("{}/*", pattern))
    } else {
        Pattern::new(&pattern)
    }
}

/// Undo toolchain-specific spellings: backslashes and `\\?\` verbatim
/// prefixes.
fn clean_raw(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix(r"\\?\")
        .or_else(|| trimmed.strip_prefix("//?/"))
        .unwrap_or(trimmed);
    trimmed.replace('\\', "/")
}

/// `/usr/src` or `C:/src`.
pub fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Lexically collapse `.`, `..` and repeated separators. Fails when `..`
/// would climb above the root of an absolute path.
pub fn normalize(path: &str) -> Result<String> {
    let path = clean_raw(path);
    let (prefix, rest) = split_root(&path);

    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if !prefix.is_empty() => {
                    return Err(GatherError::Path {
                        path: path.clone(),
                        reason: "'..' climbs above the filesystem root".to_string(),
                    });
                }
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let body = parts.join("/");
    if prefix.is_empty() && body.is_empty() {
        return Ok(".".to_string());
    }
    Ok(format!("{}{}", prefix, body))
}

/// Split off `/` or `C:/` from an absolute path.
fn split_root(path: &str) -> (&str, &str) {
    if let Some(rest) = path.strip_prefix('/') {
        return ("/", rest);
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let end = if bytes.get(2) == Some(&b'/') { 3 } else { 2 };
        return (&path[..end], &path[end..]);
    }
    ("", path)
}

/// Component-wise prefix strip: `/a/b/c` under `/a/b` is `c`, but `/a/bc`
/// is not under `/a/b`.
fn strip_dir<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return path.strip_prefix('/');
    }
    let rest = path.strip_prefix(dir)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Strictly below `dir`; `.` admits everything.
fn is_below(name: &str, dir: &str) -> bool {
    if dir == "." {
        return true;
    }
    matches!(strip_dir(name, dir), Some(rest) if !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(dirs: &[&str], ignore: &[&str]) -> PathFilter {
        let dirs: Vec<String> = dirs.iter().map(|s| s.to_string()).collect();
        let ignore: Vec<String> = ignore.iter().map(|s| s.to_string()).collect();
        PathFilter::new("/work/project", "/work/project/build", &dirs, &ignore).unwrap()
    }

    fn included(name: &str) -> Resolution {
        Resolution::Included(name.to_string())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/./b//c/../d").unwrap(), "/a/b/d");
        assert_eq!(normalize("a/../../b").unwrap(), "../b");
        assert_eq!(normalize(r"C:\src\lib\..\main.c").unwrap(), "C:/src/main.c");
        assert_eq!(normalize("./").unwrap(), ".");
        assert!(normalize("/a/../../b").is_err());
    }

    #[test]
    fn test_absolute_path_under_root() {
        let f = filter(&["src"], &[]);
        assert_eq!(f.resolve("/work/project/src/main.c").unwrap(), included("src/main.c"));
    }

    #[test]
    fn test_relative_path_uses_base() {
        let f = filter(&["src"], &[]);
        assert_eq!(f.resolve("../src/util/x.c").unwrap(), included("src/util/x.c"));
    }

    #[test]
    fn test_outside_source_root() {
        let f = filter(&["src"], &[]);
        assert_eq!(
            f.resolve("/usr/include/stdio.h").unwrap(),
            Resolution::Excluded(Exclusion::OutsideSourceRoot)
        );
        // Sibling directory sharing a string prefix with the root.
        assert_eq!(
            f.resolve("/work/project-other/src/a.c").unwrap(),
            Resolution::Excluded(Exclusion::OutsideSourceRoot)
        );
    }

    #[test]
    fn test_include_dirs_are_component_wise() {
        let f = filter(&["src"], &[]);
        assert_eq!(
            f.resolve("/work/project/srcgen/a.c").unwrap(),
            Resolution::Excluded(Exclusion::NotIncluded)
        );
        assert_eq!(
            f.resolve("/work/project/src").unwrap(),
            Resolution::Excluded(Exclusion::NotIncluded)
        );
    }

    #[test]
    fn test_ignore_vendor_glob() {
        let f = filter(&["."], &["vendor/**"]);
        assert_eq!(
            f.resolve("/work/project/vendor/lib/x.c").unwrap(),
            Resolution::Excluded(Exclusion::Ignored("vendor/**".to_string()))
        );
        assert_eq!(
            f.resolve("/work/project/src/vendor_utils.c").unwrap(),
            included("src/vendor_utils.c")
        );
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let f = filter(&["src"], &["src/*.h", "src/gen?.c"]);
        assert_eq!(
            f.resolve("/work/project/src/a.h").unwrap(),
            Resolution::Excluded(Exclusion::Ignored("src/*.h".to_string()))
        );
        assert_eq!(
            f.resolve("/work/project/src/deep/a.h").unwrap(),
            included("src/deep/a.h")
        );
        assert_eq!(
            f.resolve("/work/project/src/gen1.c").unwrap(),
            Resolution::Excluded(Exclusion::Ignored("src/gen?.c".to_string()))
        );
    }

    #[test]
    fn test_ignore_wins_over_include() {
        let f = filter(&["src"], &["src/**"]);
        assert!(matches!(
            f.resolve("/work/project/src/a.c").unwrap(),
            Resolution::Excluded(Exclusion::Ignored(_))
        ));
    }

    #[test]
    fn test_windows_paths() {
        let dirs = vec!["src".to_string()];
        let f = PathFilter::new("C:/work", "C:/work", &dirs, &[]).unwrap();
        assert_eq!(f.resolve(r"C:\work\src\a.cpp").unwrap(), included("src/a.cpp"));
        assert_eq!(
            f.resolve(r"\\?\C:\work\src\b.cpp").unwrap(),
            included("src/b.cpp")
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let f = filter(&["src", "lib"], &["**/*_test.c"]);
        for raw in [
            "/work/project/src/a.c",
            "../lib/b_test.c",
            "/elsewhere/c.c",
            "/work/project/docs/readme.c",
        ] {
            assert_eq!(f.resolve(raw).unwrap(), f.resolve(raw).unwrap());
        }
    }

    #[test]
    fn test_unresolvable_paths() {
        let f = filter(&["src"], &[]);
        assert!(matches!(f.resolve("   "), Err(GatherError::Path { .. })));
        assert!(matches!(
            f.resolve("/../../etc/passwd"),
            Err(GatherError::Path { .. })
        ));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(matches!(
            PathFilter::new("/work", "/work", &[], &[]),
            Err(GatherError::Config(_))
        ));
        assert!(matches!(
            PathFilter::new("/work", "/work", &["src".to_string()], &["[".to_string()]),
            Err(GatherError::Pattern { .. })
        ));
        assert!(matches!(
            PathFilter::new("/work", "/work", &["/abs".to_string()], &[]),
            Err(GatherError::Config(_))
        ));
    }
}
