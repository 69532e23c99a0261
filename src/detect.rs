/// Coverage backends and recognition of their intermediate artifacts.
///
/// Strategy for recognizing an artifact on disk:
///   1. Check the file extension against the backend's intermediate format
///   2. Peek at the first bytes of the file content to rule out unrelated
///      files that happen to share the extension (mostly `.xml`)
use std::path::Path;

use clap::ValueEnum;

use crate::parsers::cobertura::CoberturaParser;
use crate::parsers::gcov::GcovParser;
use crate::parsers::llvm::LlvmParser;
use crate::parsers::Parser;

/// Supported coverage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// gcov text output (`.gcov`), produced from `.gcno`/`.gcda` pairs.
    Gcov,
    /// `llvm-cov export` of a merged `.profdata`.
    #[value(name = "llvm-cov", alias = "llvm")]
    Llvm,
    /// Cobertura XML, e.g. from OpenCppCoverage.
    Cobertura,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Gcov => "gcov",
            Format::Llvm => "llvm-cov",
            Format::Cobertura => "cobertura",
        }
    }

    /// File suffix of the intermediate artifacts this backend parses.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Gcov => ".gcov",
            Format::Llvm => ".profjson",
            Format::Cobertura => ".xml",
        }
    }

    /// The parser for this backend, chosen once per run.
    pub fn parser(&self) -> &'static dyn Parser {
        match self {
            Format::Gcov => &GcovParser,
            Format::Llvm => &LlvmParser,
            Format::Cobertura => &CoberturaParser,
        }
    }

    /// Tags accepted in `GCOV_EXCL_START[...]` markers for this toolchain.
    pub fn exclusion_markers(&self) -> &'static [&'static str] {
        match self {
            Format::Gcov => &["gcc"],
            Format::Llvm => &["clang", "llvm"],
            Format::Cobertura => &["msvc"],
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Does `path` look like an intermediate artifact of `format`?
pub fn is_artifact(format: Format, path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase().ends_with(format.extension()))
        .unwrap_or(false)
}

/// Detect the backend from the file name and content.
pub fn detect_format(path: &Path, content: &[u8]) -> Option<Format> {
    let by_extension = [Format::Gcov, Format::Llvm, Format::Cobertura]
        .into_iter()
        .find(|&f| is_artifact(f, path));

    match by_extension {
        // `.xml` is too generic to trust on its own.
        Some(Format::Cobertura) => detect_by_content(content).filter(|&f| f == Format::Cobertura),
        Some(fmt) => Some(fmt),
        None => detect_by_content(content),
    }
}

fn detect_by_content(content: &[u8]) -> Option<Format> {
    // We only need to look at the first few KB
    let head_len = content.len().min(4096);
    let head = String::from_utf8_lossy(&content[..head_len]);

    if head.lines().any(|l| l.contains(":    0:Source:")) {
        return Some(Format::Gcov);
    }

    let trimmed = head.trim_start();
    if trimmed.starts_with('{') && head.contains("llvm.coverage.json.export") {
        return Some(Format::Llvm);
    }

    if (head.contains("<?xml") || trimmed.starts_with('<')) && head.contains("<coverage") {
        return Some(Format::Cobertura);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_gcov_by_extension() {
        let path = Path::new("main.c.gcov");
        assert_eq!(detect_format(path, b""), Some(Format::Gcov));
    }

    #[test]
    fn test_detect_gcov_by_content() {
        let content = b"        -:    0:Source:src/main.c\n        1:    1:int main() {}\n";
        assert_eq!(detect_format(Path::new("dump.txt"), content), Some(Format::Gcov));
    }

    #[test]
    fn test_detect_llvm_export() {
        let content = br#"{"data":[],"type":"llvm.coverage.json.export","version":"2.0.1"}"#;
        assert_eq!(detect_format(Path::new("out.json"), content), Some(Format::Llvm));
        assert_eq!(detect_format(Path::new("x-test.profjson"), b""), Some(Format::Llvm));
    }

    #[test]
    fn test_detect_cobertura_requires_content() {
        let content = b"<?xml version=\"1.0\"?>\n<coverage version=\"1.0\">";
        assert_eq!(
            detect_format(Path::new("coverage.xml"), content),
            Some(Format::Cobertura)
        );
        let pom = b"<?xml version=\"1.0\"?>\n<project></project>";
        assert_eq!(detect_format(Path::new("pom.xml"), pom), None);
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_format(Path::new("random.dat"), b"hello world"), None);
    }
}
