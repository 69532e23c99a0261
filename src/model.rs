//! Uniform in-memory representation of coverage data, independent of any
//! specific toolchain. Parsers produce `CoverageRecord`s which the merge
//! engine folds into one `SourceFile` per canonical path.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Hit count of one physical line. `None` means the line was never
/// considered a coverage line, which is not the same as zero.
pub type Hits = Option<u64>;

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// A function/method that was instrumentable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCoverage {
    pub name: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub hit_count: u64,
}

/// One raw parse result for a single source file, as reported by the
/// toolchain. The path is not canonicalized yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageRecord {
    pub path: String,
    /// 1-based line number to hit count. Absent lines are not instrumented.
    pub lines: BTreeMap<u32, u64>,
    /// Physical line count, when the artifact lists every line of the file.
    pub line_count: Option<u32>,
    pub functions: Vec<FunctionCoverage>,
}

impl CoverageRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Number of lines this record spans: the larger of the known physical
    /// line count and the highest reported line.
    #[must_use]
    pub fn span(&self) -> usize {
        let highest = self.lines.keys().next_back().copied().unwrap_or(0);
        highest.max(self.line_count.unwrap_or(0)) as usize
    }

    /// Expand the sparse line map into a dense per-line array.
    #[must_use]
    pub fn to_hits(&self) -> Vec<Hits> {
        let mut hits = vec![None; self.span()];
        for (&line, &count) in &self.lines {
            if line > 0 {
                hits[line as usize - 1] = Some(count);
            }
        }
        hits
    }
}

/// Merged coverage of one canonical source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    /// Index 0 is line 1.
    pub coverage: Vec<Hits>,
    pub functions: BTreeMap<String, FunctionCoverage>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// How far an artifact got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    Read,
    Parse,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Preprocess => "preprocess",
            Stage::Read => "read",
            Stage::Parse => "parse",
        })
    }
}

/// A single artifact that could not be turned into coverage records.
#[derive(Debug, Clone)]
pub struct ArtifactFailure {
    pub artifact: PathBuf,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (failed at {} stage): {}",
            self.artifact.display(),
            self.stage,
            self.message
        )
    }
}

/// Counters for one kind of coverage item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub relevant: u64,
    pub covered: u64,
    pub excluded: u64,
}

impl Stats {
    /// Percentage rounded to two decimals.
    #[must_use]
    pub fn percent(&self) -> f64 {
        (rate(self.covered, self.relevant) * 10000.0).round() / 100.0
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}%)", self.covered, self.relevant, self.percent())?;
        if self.excluded > 0 {
            write!(f, " excluded: {}", self.excluded)?;
        }
        Ok(())
    }
}

/// Summary of a built report.
#[derive(Debug, Clone, Default)]
pub struct CoverageStats {
    pub lines: Stats,
    pub functions: Stats,
    /// Files whose coverage data runs past their physical end.
    pub past_eof: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_hits_pads_with_null() {
        let mut record = CoverageRecord::new("a.c");
        record.lines.insert(2, 4);
        record.lines.insert(4, 0);
        assert_eq!(record.to_hits(), vec![None, Some(4), None, Some(0)]);
    }

    #[test]
    fn span_uses_known_line_count() {
        let mut record = CoverageRecord::new("a.c");
        record.lines.insert(2, 1);
        record.line_count = Some(6);
        assert_eq!(record.span(), 6);
        assert_eq!(record.to_hits().len(), 6);
    }

    #[test]
    fn stats_display() {
        let stats = Stats {
            relevant: 3,
            covered: 2,
            excluded: 0,
        };
        assert_eq!(stats.to_string(), "2/3 (66.67%)");

        let stats = Stats {
            relevant: 0,
            covered: 0,
            excluded: 4,
        };
        assert_eq!(stats.to_string(), "0/0 (0%) excluded: 4");
    }
}
