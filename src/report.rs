//! The Coveralls JSON document.
//!
//! Merged files are finalized against their source text here: exclusion
//! markers and blank lines are erased, the per-line array is sized to the
//! physical file, and the source digest is computed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ci::ServiceHeader;
use crate::error::{GatherError, Result};
use crate::excludes::{self, Exclusions};
use crate::git::GitInfo;
use crate::model::{CoverageStats, FunctionCoverage, Hits, SourceFile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReport {
    pub name: String,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileReport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    pub coverage: Vec<Hits>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionReport>,
}

impl SourceFileReport {
    /// Back to a mergeable `SourceFile`.
    pub fn to_source_file(&self) -> SourceFile {
        let mut file = SourceFile::new(self.name.as_str());
        file.coverage = self.coverage.clone();
        for function in &self.functions {
            file.functions.insert(
                function.name.clone(),
                FunctionCoverage {
                    name: function.name.clone(),
                    start_line: function.start_line,
                    end_line: function.end_line,
                    hit_count: function.count,
                },
            );
        }
        file
    }
}

/// A Coveralls job submission. Partial reports only carry `git` (short
/// form) and `source_files`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverallsReport {
    #[serde(flatten)]
    pub service: ServiceHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    pub source_files: Vec<SourceFileReport>,
}

impl CoverallsReport {
    /// A full report stamped with the current time.
    pub fn new(
        service: ServiceHeader,
        git: Option<GitInfo>,
        source_files: Vec<SourceFileReport>,
    ) -> Self {
        Self {
            service,
            run_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            git,
            source_files,
            ..Default::default()
        }
    }

    pub fn partial(git: Option<GitInfo>, source_files: Vec<SourceFileReport>) -> Self {
        Self {
            git: git.map(|g| g.head_only()),
            source_files,
            ..Default::default()
        }
    }

    pub fn with_repo_token(mut self, token: Option<String>) -> Self {
        self.repo_token = token;
        self
    }

    pub fn with_flag_name(mut self, flag_name: Option<String>) -> Self {
        self.flag_name = flag_name;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Read a source file and normalize CRLF line endings. `None` when the file
/// does not exist.
fn read_source(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).replace("\r\n", "\n"))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Finalize merged files into report entries, sorted by name.
///
/// Fails with `EmptyReport` when there is nothing to report.
pub fn build_source_files(
    files: &BTreeMap<String, SourceFile>,
    source_root: &Path,
    markers: &[&str],
) -> Result<(Vec<SourceFileReport>, CoverageStats)> {
    if files.is_empty() {
        return Err(GatherError::EmptyReport);
    }

    let mut stats = CoverageStats::default();
    let mut reports = Vec::with_capacity(files.len());

    for (name, file) in files {
        let path = source_root.join(name);
        let source = read_source(&path)?;
        let (digest, line_count, exclusions) = match &source {
            Some(text) => (
                Some(format!("{:x}", md5::compute(text.as_bytes()))),
                Some(text.lines().count()),
                excludes::scan(&path.display().to_string(), text, markers),
            ),
            None => {
                log::warn!("{}: source file not found; line count taken from coverage data", name);
                (None, None, Exclusions::default())
            }
        };

        reports.push(finalize_file(
            file,
            digest,
            line_count,
            &exclusions,
            &mut stats,
        ));
    }

    Ok((reports, stats))
}

fn finalize_file(
    file: &SourceFile,
    digest: Option<String>,
    line_count: Option<usize>,
    exclusions: &Exclusions,
    stats: &mut CoverageStats,
) -> SourceFileReport {
    let mut coverage = file.coverage.clone();
    for (idx, hits) in coverage.iter_mut().enumerate() {
        let line = idx as u32 + 1;
        let erase = match hits {
            Some(_) if exclusions.is_excluded(line) => true,
            Some(0) if exclusions.is_blank(line) => true,
            _ => false,
        };
        if erase {
            *hits = None;
            stats.lines.excluded += 1;
        }
    }

    let highest = coverage.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
    let size = match line_count {
        Some(count) => {
            if highest > count {
                log::warn!(
                    "{}: coverage reported for line {}, but the file has only {} lines",
                    file.name,
                    highest,
                    count
                );
                stats.past_eof.push(file.name.clone());
            }
            count.max(highest)
        }
        None => coverage.len(),
    };
    coverage.resize(size, None);

    let mut functions = Vec::new();
    for function in file.functions.values() {
        if function_is_live(function, &coverage) {
            stats.functions.relevant += 1;
            if function.hit_count > 0 {
                stats.functions.covered += 1;
            }
            functions.push(FunctionReport {
                name: function.name.clone(),
                count: function.hit_count,
                start_line: function.start_line,
                end_line: function.end_line,
            });
        } else {
            stats.functions.excluded += 1;
        }
    }

    for hits in coverage.iter().flatten() {
        stats.lines.relevant += 1;
        if *hits > 0 {
            stats.lines.covered += 1;
        }
    }

    SourceFileReport {
        name: file.name.clone(),
        source_digest: digest,
        coverage,
        functions,
    }
}

/// A function survives while any line of its range is still instrumented.
fn function_is_live(function: &FunctionCoverage, coverage: &[Hits]) -> bool {
    let Some(start) = function.start_line else {
        return false;
    };
    let end = function.end_line.unwrap_or(start).max(start) as usize;
    let start = (start as usize).max(1);
    start <= coverage.len()
        && coverage[start - 1..end.min(coverage.len())]
            .iter()
            .any(Option::is_some)
}

/// Human summary printed at the end of a run.
#[must_use]
pub fn format_summary(stats: &CoverageStats) -> String {
    let mut out = String::new();
    writeln!(out, "-- Line coverage:      {}", stats.lines).unwrap();
    writeln!(out, "-- Function coverage:  {}", stats.functions).unwrap();
    if !stats.past_eof.is_empty() {
        writeln!(
            out,
            "-- Data past end of file: {}",
            stats.past_eof.join(", ")
        )
        .unwrap();
    }
    out
}

/// Write the report pretty-printed, creating parent directories.
pub fn write_report(report: &CoverallsReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    fs::write(path, json)?;
    Ok(())
}

pub fn read_report(path: &Path) -> Result<CoverallsReport> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_file(name: &str, coverage: Vec<Hits>) -> SourceFile {
        let mut file = SourceFile::new(name);
        file.coverage = coverage;
        file
    }

    fn files(list: Vec<SourceFile>) -> BTreeMap<String, SourceFile> {
        list.into_iter().map(|f| (f.name.clone(), f)).collect()
    }

    #[test]
    fn test_empty_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = build_source_files(&BTreeMap::new(), dir.path(), &[]);
        assert!(matches!(result, Err(GatherError::EmptyReport)));
    }

    #[test]
    fn test_digest_and_length_follow_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.c"), "int a;\r\nint b;\r\n\r\nint c;\r\n").unwrap();

        let merged = files(vec![source_file("a.c", vec![Some(1), Some(0)])]);
        let (reports, stats) = build_source_files(&merged, dir.path(), &[]).unwrap();

        let a = &reports[0];
        assert_eq!(a.coverage, vec![Some(1), Some(0), None, None]);
        assert_eq!(
            a.source_digest.as_deref(),
            Some(format!("{:x}", md5::compute("int a;\nint b;\n\nint c;\n")).as_str())
        );
        assert_eq!(stats.lines.relevant, 2);
        assert_eq!(stats.lines.covered, 1);
    }

    #[test]
    fn test_past_eof_keeps_data_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("short.c"), "x;\ny;\n").unwrap();

        let merged = files(vec![source_file(
            "short.c",
            vec![Some(1), None, None, Some(2)],
        )]);
        let (reports, stats) = build_source_files(&merged, dir.path(), &[]).unwrap();
        assert_eq!(reports[0].coverage.len(), 4);
        assert_eq!(reports[0].coverage[3], Some(2));
        assert_eq!(stats.past_eof, vec!["short.c".to_string()]);
    }

    #[test]
    fn test_missing_source_keeps_coverage_length() {
        let dir = tempfile::tempdir().unwrap();
        let merged = files(vec![source_file("gone.c", vec![Some(1), None, None])]);
        let (reports, _) = build_source_files(&merged, dir.path(), &[]).unwrap();
        assert_eq!(reports[0].coverage.len(), 3);
        assert_eq!(reports[0].source_digest, None);
    }

    #[test]
    fn test_exclusions_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.c"),
            "a();\nb(); // GCOV_EXCL_LINE\n\nc();\n\n",
        )
        .unwrap();

        let mut file = source_file("a.c", vec![Some(1), Some(0), Some(0), Some(3), Some(2)]);
        file.functions.insert(
            "b".to_string(),
            FunctionCoverage {
                name: "b".to_string(),
                start_line: Some(2),
                end_line: Some(3),
                hit_count: 0,
            },
        );
        file.functions.insert(
            "a".to_string(),
            FunctionCoverage {
                name: "a".to_string(),
                start_line: Some(1),
                end_line: None,
                hit_count: 1,
            },
        );

        let (reports, stats) = build_source_files(&files(vec![file]), dir.path(), &[]).unwrap();
        // Line 5 is blank but was executed, so it stays.
        assert_eq!(reports[0].coverage, vec![Some(1), None, None, Some(3), Some(2)]);
        assert_eq!(stats.lines.excluded, 2);
        assert_eq!(reports[0].functions.len(), 1);
        assert_eq!(reports[0].functions[0].name, "a");
        assert_eq!(stats.functions.excluded, 1);
    }

    #[test]
    fn test_partial_report_shape() {
        let report = CoverallsReport::partial(None, vec![]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"source_files": []}));
    }

    #[test]
    fn test_full_report_round_trip() {
        let report = CoverallsReport::new(
            ServiceHeader {
                service_name: Some("coveralls-gather".to_string()),
                ..Default::default()
            },
            None,
            vec![SourceFileReport {
                name: "src/a.c".to_string(),
                source_digest: None,
                coverage: vec![None, Some(2)],
                functions: vec![],
            }],
        )
        .with_parallel(true)
        .with_flag_name(Some("linux".to_string()));

        let run_at = report.run_at.clone().unwrap();
        assert!(run_at.ends_with('Z'), "{}", run_at);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""coverage":[null,2]"#));
        assert!(!json.contains("\"git\""));
        let back: CoverallsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_write_report_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out/coveralls.json");
        write_report(&CoverallsReport::partial(None, vec![]), &out).unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.ends_with("}\n"));
        assert_eq!(read_report(&out).unwrap().source_files.len(), 0);
    }

    #[test]
    fn test_summary() {
        let mut stats = CoverageStats::default();
        stats.lines.relevant = 4;
        stats.lines.covered = 3;
        let text = format_summary(&stats);
        assert!(text.starts_with("-- Line coverage:      3/4 (75%)\n"));
    }

    #[test]
    fn test_function_range_past_end_of_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = source_file("a.c", vec![Some(1), None]);
        for (name, start, end) in [("tail", 2, u32::MAX), ("beyond", 9, 12)] {
            file.functions.insert(
                name.to_string(),
                FunctionCoverage {
                    name: name.to_string(),
                    start_line: Some(start),
                    end_line: Some(end),
                    hit_count: 1,
                },
            );
        }
        let (reports, stats) = build_source_files(&files(vec![file]), dir.path(), &[]).unwrap();
        assert!(reports[0].functions.is_empty());
        assert_eq!(stats.functions.excluded, 2);
    }
}
