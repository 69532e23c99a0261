use std::fs;
use std::path::{Path, PathBuf};

use coveralls_gather::config::{self, GatherConfig, DEFAULT_TIMEOUT};
use coveralls_gather::detect::Format;
use tempfile::TempDir;

/// A throwaway project tree: sources under the root, a `build/` directory
/// and intermediate artifacts in `build/coveralls/`.
/// The caller must hold onto the `Project` to keep the temp directory alive.
pub struct Project {
    _dir: TempDir,
    pub root: PathBuf,
}

#[allow(dead_code)]
impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = config::absolutize(dir.path(), Path::new("/")).unwrap();
        fs::create_dir_all(root.join("build/coveralls")).unwrap();
        Self { _dir: dir, root }
    }

    /// Write `content` to `rel` below the root, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn int_dir(&self) -> PathBuf {
        self.root.join("build/coveralls")
    }

    pub fn output(&self) -> PathBuf {
        self.root.join("out/coveralls.json")
    }

    /// Settings for a run that never needs to start a toolchain binary:
    /// artifacts are placed in the intermediate directory up front.
    pub fn config(&self, format: Format, dirs: &[&str]) -> GatherConfig {
        let (tool, merge_tool) = match format {
            Format::Gcov => (Some(PathBuf::from("gcov")), None),
            Format::Llvm => (
                Some(PathBuf::from("llvm-cov")),
                Some(PathBuf::from("llvm-profdata")),
            ),
            Format::Cobertura => (None, None),
        };
        GatherConfig {
            format,
            tool,
            merge_tool,
            git: PathBuf::from("/nonexistent/git"),
            src_dir: self.root.clone(),
            bin_dir: self.root.join("build"),
            int_dir: self.int_dir(),
            include_dirs: dirs.iter().map(|d| d.to_string()).collect(),
            ignore: vec![],
            output: self.output(),
            target: None,
            jobs: Some(2),
            timeout: DEFAULT_TIMEOUT,
            partial: false,
        }
    }

    pub fn read_json(&self, path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

/// One gcov text artifact for `source` with `(line, count)` rows; every
/// other line up to `lines` is non-executable.
pub fn gcov_text(source: &str, lines: u32, counts: &[(u32, u64)]) -> String {
    let mut out = format!("        -:    0:Source:{}\n", source);
    for line in 1..=lines {
        let count = counts
            .iter()
            .find(|(l, _)| *l == line)
            .map_or("-".to_string(), |(_, c)| {
                if *c == 0 {
                    "#####".to_string()
                } else {
                    c.to_string()
                }
            });
        out.push_str(&format!("{:>9}:{:>5}:line {}\n", count, line, line));
    }
    out
}

/// Source text with `lines` lines.
pub fn source_text(lines: u32) -> String {
    (1..=lines).map(|l| format!("line {}\n", l)).collect()
}
