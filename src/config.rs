//! Validated settings of a `gather` run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::Format;
use crate::error::{GatherError, Result};
use crate::paths::{self, PathFilter};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct GatherConfig {
    pub format: Format,
    /// `gcov` or `llvm-cov`; unused for Cobertura.
    pub tool: Option<PathBuf>,
    /// `llvm-profdata`.
    pub merge_tool: Option<PathBuf>,
    pub git: PathBuf,
    pub src_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub int_dir: PathBuf,
    /// Repository-relative include directories.
    pub include_dirs: Vec<String>,
    pub ignore: Vec<String>,
    pub output: PathBuf,
    pub target: Option<String>,
    pub jobs: Option<usize>,
    pub timeout: Duration,
    /// Write only `git` and `source_files`.
    pub partial: bool,
}

impl GatherConfig {
    /// Check everything that can be checked before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.include_dirs.is_empty() {
            return Err(GatherError::Config(
                "--dirs must name at least one directory".to_string(),
            ));
        }
        if !self.src_dir.is_dir() {
            return Err(GatherError::Config(format!(
                "source directory {} does not exist",
                self.src_dir.display()
            )));
        }
        match self.format {
            Format::Gcov | Format::Llvm if self.tool.is_none() => {
                return Err(GatherError::Config(format!(
                    "the {} backend needs --gcov pointing at the coverage tool",
                    self.format
                )));
            }
            Format::Llvm if self.merge_tool.is_none() => {
                return Err(GatherError::Config(
                    "the llvm-cov backend needs --merge pointing at llvm-profdata".to_string(),
                ));
            }
            _ => {}
        }
        if self.jobs == Some(0) {
            return Err(GatherError::Config("--jobs must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(GatherError::Config("--timeout must be positive".to_string()));
        }
        self.path_filter()?;
        Ok(())
    }

    /// Base for relative paths in artifacts: gcov records paths as seen by
    /// the compiler inside the build tree.
    pub fn relative_base(&self) -> &Path {
        match self.format {
            Format::Gcov => &self.bin_dir,
            Format::Llvm | Format::Cobertura => &self.src_dir,
        }
    }

    pub fn path_filter(&self) -> Result<PathFilter> {
        PathFilter::new(
            &path_string(&self.src_dir),
            &path_string(self.relative_base()),
            &self.include_dirs,
            &self.ignore,
        )
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Split `--dirs a:b:c`. Empty entries are dropped.
pub fn split_dirs(dirs: &str) -> Vec<String> {
    dirs.split(':')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.trim_end_matches(['/', '\\']).to_string())
        .map(|d| if d.is_empty() { ".".to_string() } else { d })
        .collect()
}

/// Make `path` absolute against `cwd`, lexically.
pub fn absolutize(path: &Path, cwd: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() || paths::is_absolute(&path_string(path)) {
        path_string(path)
    } else {
        format!("{}/{}", path_string(cwd), path_string(path))
    };
    Ok(PathBuf::from(paths::normalize(&joined)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(src: &Path) -> GatherConfig {
        GatherConfig {
            format: Format::Cobertura,
            tool: None,
            merge_tool: None,
            git: PathBuf::from("git"),
            src_dir: src.to_path_buf(),
            bin_dir: src.join("build"),
            int_dir: src.join("build/cov"),
            include_dirs: vec!["src".to_string()],
            ignore: vec![],
            output: src.join("out.json"),
            target: None,
            jobs: None,
            timeout: DEFAULT_TIMEOUT,
            partial: false,
        }
    }

    #[test]
    fn test_split_dirs() {
        assert_eq!(split_dirs("src:include/:"), vec!["src", "include"]);
        assert_eq!(split_dirs("/"), vec!["."]);
        assert!(split_dirs("").is_empty());
    }

    #[test]
    fn test_absolutize() {
        let cwd = Path::new("/work/proj");
        assert_eq!(
            absolutize(Path::new("build/../src"), cwd).unwrap(),
            PathBuf::from("/work/proj/src")
        );
        assert_eq!(
            absolutize(Path::new("/opt/src"), cwd).unwrap(),
            PathBuf::from("/opt/src")
        );
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let root = absolutize(dir.path(), Path::new("/")).unwrap();
        assert!(config(&root).validate().is_ok());

        let mut cfg = config(&root);
        cfg.include_dirs.clear();
        assert!(matches!(cfg.validate(), Err(GatherError::Config(_))));

        let mut cfg = config(&root);
        cfg.format = Format::Gcov;
        assert!(matches!(cfg.validate(), Err(GatherError::Config(_))));

        let mut cfg = config(&root);
        cfg.format = Format::Llvm;
        cfg.tool = Some(PathBuf::from("llvm-cov"));
        assert!(matches!(cfg.validate(), Err(GatherError::Config(_))));

        let mut cfg = config(&root);
        cfg.ignore = vec!["[".to_string()];
        assert!(matches!(cfg.validate(), Err(GatherError::Pattern { .. })));

        let mut cfg = config(&root);
        cfg.src_dir = root.join("missing");
        assert!(matches!(cfg.validate(), Err(GatherError::Config(_))));
    }

    #[test]
    fn test_relative_base() {
        let root = PathBuf::from("/p");
        let mut cfg = config(&root);
        assert_eq!(cfg.relative_base(), Path::new("/p"));
        cfg.format = Format::Gcov;
        assert_eq!(cfg.relative_base(), Path::new("/p/build"));
    }
}
