//! Parser for `llvm-cov export -format text` output (export version 2.x).
//!
//! The export lists, per source file, a sorted sequence of segments. A
//! segment marks the point where the active region (and so the execution
//! count) changes. Line counts are derived the same way `llvm-cov` derives
//! them for its own line reports.

use serde::Deserialize;

use crate::error::{GatherError, Result};
use crate::model::{CoverageRecord, FunctionCoverage};
use crate::parsers::{check_line, Parser};

#[derive(Debug, Deserialize)]
struct Export {
    #[serde(default)]
    data: Vec<ExportData>,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct ExportData {
    #[serde(default)]
    files: Vec<ExportFile>,
    #[serde(default)]
    functions: Vec<ExportFunction>,
}

#[derive(Debug, Deserialize)]
struct ExportFile {
    filename: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

/// `[line, column, count, has_count, is_region_entry, is_gap_region]`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Segment(
    pub u32,
    pub u32,
    pub u64,
    pub bool,
    pub bool,
    pub bool,
);

impl Segment {
    fn line(&self) -> u32 {
        self.0
    }

    fn count(&self) -> u64 {
        self.2
    }

    fn has_count(&self) -> bool {
        self.3
    }

    fn is_entry(&self) -> bool {
        self.4
    }

    fn is_gap(&self) -> bool {
        self.5
    }

    fn starts_region(&self) -> bool {
        !self.is_gap() && self.has_count() && self.is_entry()
    }
}

#[derive(Debug, Deserialize)]
struct ExportFunction {
    name: Option<String>,
    count: Option<u64>,
    #[serde(default)]
    filenames: Vec<String>,
    #[serde(default)]
    regions: Vec<Vec<u64>>,
}

pub struct LlvmParser;

impl Parser for LlvmParser {
    fn parse(&self, input: &[u8]) -> Result<Vec<CoverageRecord>> {
        let export: Export = serde_json::from_slice(input)?;

        let major = export.version.split('.').next().unwrap_or("");
        if major != "2" {
            return Err(GatherError::parse(
                0,
                format!("unsupported llvm-cov export version '{}'", export.version),
            ));
        }

        let mut records: Vec<CoverageRecord> = Vec::new();
        for data in &export.data {
            for file in &data.files {
                let Some(filename) = &file.filename else {
                    continue;
                };
                let mut record = CoverageRecord::new(filename.as_str());
                record.lines = line_counts(&file.segments)?.into_iter().collect();
                records.push(record);
            }
        }

        for data in &export.data {
            for function in &data.functions {
                let (Some(name), Some(count)) = (&function.name, function.count) else {
                    continue;
                };
                let (Some(filename), Some((start, end))) =
                    (function.filenames.first(), encompassing_lines(&function.regions))
                else {
                    continue;
                };
                check_line(end, 0)?;

                let entry = FunctionCoverage {
                    name: name.clone(),
                    start_line: Some(start),
                    end_line: Some(end),
                    hit_count: count,
                };
                match records.iter_mut().find(|r| &r.path == filename) {
                    Some(record) => record.functions.push(entry),
                    None => {
                        let mut record = CoverageRecord::new(filename.as_str());
                        record.functions.push(entry);
                        records.push(record);
                    }
                }
            }
        }

        Ok(records)
    }
}

/// Flatten segments into `(line, count)` pairs for every mapped line.
///
/// A line is mapped when a counted region starts on it, or when the region
/// wrapping in from an earlier line has a count, unless the line opens a
/// skipped region. Its count is the wrapping region's count, raised to the
/// largest count of any region starting on the line.
///
/// Segments must be sorted by line and stay within `MAX_LINE`.
pub fn line_counts(segments: &[Segment]) -> Result<Vec<(u32, u64)>> {
    let mut result = Vec::new();
    let Some(first) = segments.first() else {
        return Ok(result);
    };
    check_segments(segments)?;

    let mut wrapped: Option<Segment> = None;
    let mut line = first.line();
    let mut index = 0;

    while index < segments.len() {
        let start = index;
        while index < segments.len() && segments[index].line() == line {
            index += 1;
        }
        let on_line = &segments[start..index];

        if let Some(count) = line_count(on_line, wrapped.as_ref()) {
            result.push((line, count));
        }
        if let Some(last) = on_line.last() {
            wrapped = Some(*last);
        }

        // Lines up to the next segment only matter while a counted region
        // wraps over them.
        line = match segments.get(index) {
            Some(next) if !wrapped.is_some_and(|w| w.has_count()) => next.line(),
            _ => line + 1,
        };
    }

    Ok(result)
}

fn check_segments(segments: &[Segment]) -> Result<()> {
    for pair in segments.windows(2) {
        if pair[1].line() < pair[0].line() {
            return Err(GatherError::parse(
                0,
                format!(
                    "segments out of order: line {} follows line {}",
                    pair[1].line(),
                    pair[0].line()
                ),
            ));
        }
    }
    if let Some(last) = segments.last() {
        check_line(last.line(), 0)?;
    }
    Ok(())
}

fn line_count(on_line: &[Segment], wrapped: Option<&Segment>) -> Option<u64> {
    let starts_skipped = on_line
        .first()
        .map(|s| !s.has_count() && s.is_entry())
        .unwrap_or(false);
    let region_starts = on_line.iter().any(Segment::starts_region);
    let wrapped_counted = wrapped.map(Segment::has_count).unwrap_or(false);

    if starts_skipped || !(wrapped_counted || region_starts) {
        return None;
    }

    let base = wrapped.map(Segment::count).unwrap_or(0);
    Some(
        on_line
            .iter()
            .filter(|s| s.starts_region())
            .map(Segment::count)
            .fold(base, u64::max),
    )
}

/// Line span of the code regions that belong to the function's own file.
///
/// Region layout: `[line_start, col_start, line_end, col_end, count,
/// file_id, expanded_file_id, kind]`; kind 0 is a code region.
fn encompassing_lines(regions: &[Vec<u64>]) -> Option<(u32, u32)> {
    regions
        .iter()
        .filter(|r| r.len() >= 8 && r[5] == 0 && r[7] == 0)
        .map(|r| (r[0] as u32, r[2] as u32))
        .reduce(|(s1, e1), (s2, e2)| (s1.min(s2), e1.max(e2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(line: u32, col: u32, count: u64, has_count: bool, entry: bool, gap: bool) -> Segment {
        Segment(line, col, count, has_count, entry, gap)
    }

    #[test]
    fn test_line_counts_follow_regions() {
        // fn on line 1..4, a branch region on line 3 that never ran.
        let segments = [
            seg(1, 12, 5, true, true, false),
            seg(3, 9, 0, true, true, false),
            seg(3, 20, 5, true, false, false),
            seg(4, 2, 0, false, false, false),
        ];
        let lines = line_counts(&segments).unwrap();
        assert_eq!(lines, vec![(1, 5), (2, 5), (3, 5), (4, 5)]);
    }

    #[test]
    fn test_gap_and_skipped_regions_are_unmapped() {
        let segments = [
            seg(1, 1, 2, true, true, false),
            seg(1, 10, 0, false, false, false),
            seg(3, 1, 0, false, true, false),
            seg(3, 8, 0, false, false, false),
        ];
        let lines = line_counts(&segments).unwrap();
        // Line 2 is wrapped by the uncounted tail of line 1; line 3 opens a
        // skipped region.
        assert_eq!(lines, vec![(1, 2)]);
    }

    #[test]
    fn test_parse_export() {
        let input = br#"{
          "type": "llvm.coverage.json.export",
          "version": "2.0.1",
          "data": [{
            "files": [{
              "filename": "/src/proj/lib.c",
              "segments": [[1, 16, 3, true, true, false], [3, 2, 0, false, false, false]],
              "summary": {}
            }],
            "functions": [{
              "name": "lib_fn",
              "count": 3,
              "filenames": ["/src/proj/lib.c"],
              "regions": [[1, 16, 3, 2, 3, 0, 0, 0], [2, 5, 2, 9, 0, 1, 0, 0]]
            }]
          }]
        }"#;
        let records = LlvmParser.parse(input).unwrap();
        assert_eq!(records.len(), 1);
        let lib = &records[0];
        assert_eq!(lib.path, "/src/proj/lib.c");
        assert_eq!(lib.lines.get(&1), Some(&3));
        assert_eq!(lib.lines.get(&2), Some(&3));
        assert_eq!(lib.lines.get(&3), Some(&3));
        assert_eq!(lib.functions.len(), 1);
        assert_eq!(lib.functions[0].start_line, Some(1));
        assert_eq!(lib.functions[0].end_line, Some(3));
    }

    #[test]
    fn test_rejects_other_export_versions() {
        let input = br#"{"type":"llvm.coverage.json.export","version":"3.0.0","data":[]}"#;
        assert!(matches!(LlvmParser.parse(input), Err(GatherError::Parse { .. })));
    }

    #[test]
    fn test_truncated_export_is_an_error() {
        let input = br#"{"type":"llvm.coverage.json.export","version":"2.0.1","data":[{"files":[{"#;
        assert!(matches!(LlvmParser.parse(input), Err(GatherError::Json(_))));
    }

    #[test]
    fn test_unsorted_segments_are_an_error() {
        let segments = [seg(5, 1, 1, true, true, false), seg(3, 1, 1, true, true, false)];
        assert!(matches!(line_counts(&segments), Err(GatherError::Parse { .. })));
    }

    #[test]
    fn test_sparse_segments_jump_ahead() {
        let segments = [
            seg(1, 1, 2, true, true, false),
            seg(1, 9, 0, false, false, false),
            seg(4_000_000, 1, 1, true, true, false),
            seg(4_000_001, 1, 0, false, false, false),
        ];
        let lines = line_counts(&segments).unwrap();
        assert_eq!(lines, vec![(1, 2), (4_000_000, 1), (4_000_001, 1)]);

        let far = [seg(1, 1, 1, true, true, false), seg(4_000_000_000, 1, 0, false, false, false)];
        assert!(matches!(line_counts(&far), Err(GatherError::Parse { .. })));
    }
}
