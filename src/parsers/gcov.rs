/// Parser for gcov output.
///
/// Text format (`gcov -l -p`), one row per physical source line:
///   <count>:<line>:<source text>
///
///   count  `-`      line is not executable
///          `#####`  executable, never executed (`=====` for exception-only
///                   paths)
///          `N`      executed N times (`N*` when some basic block on the
///                   line was not executed)
///
/// Rows with line number 0 carry headers (`Source:`, `Graph:`, `Data:`,
/// `Runs:`); each `Source:` header starts a new file. Annotation rows from
/// `-b`/`-f` (`function ...`, `branch ...`, `call ...`) have no line field.
///
/// Intermediate format (`gcov -i`, gcc 4.9 to 8):
///   file:<source path>
///   function:<start>,<end>,<count>,<name>   (gcc 8)
///   function:<line>,<count>,<name>          (earlier)
///   lcount:<line>,<count>[,<has_unexecuted_block>]
///   branch:<line>,<taken|nottaken|notexec>
use std::str;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{GatherError, Result};
use crate::model::{CoverageRecord, FunctionCoverage};
use crate::parsers::{check_line, Parser};

/// `function main called 3 returned 100% blocks executed 80%`
static FUNCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^function (\S+) called (\d+)").unwrap());

pub struct GcovParser;

impl Parser for GcovParser {
    fn parse(&self, input: &[u8]) -> Result<Vec<CoverageRecord>> {
        let text = str::from_utf8(input)
            .map_err(|e| GatherError::parse(0, format!("invalid UTF-8 in gcov data: {}", e)))?;

        let intermediate = text
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.starts_with("file:") || l.starts_with("version:"))
            .unwrap_or(false);

        if intermediate {
            parse_intermediate(text)
        } else {
            parse_text(text)
        }
    }
}

/// Per-file state while walking a text artifact.
struct TextFile {
    record: CoverageRecord,
    last_line: u32,
    /// Function announced by a `function` row, waiting for its first line.
    pending: Vec<FunctionCoverage>,
}

impl TextFile {
    fn new(path: &str) -> Self {
        Self {
            record: CoverageRecord::new(path.trim()),
            last_line: 0,
            pending: Vec::new(),
        }
    }

    fn finish(mut self) -> CoverageRecord {
        self.record.line_count = Some(self.last_line);
        self.record.functions.append(&mut self.pending);
        self.record
    }
}

fn parse_text(text: &str) -> Result<Vec<CoverageRecord>> {
    let mut records = Vec::new();
    let mut current: Option<TextFile> = None;

    for (idx, row) in text.lines().enumerate() {
        let row_no = idx + 1;
        let row = row.trim_end_matches('\r');

        if let Some(caps) = FUNCTION_RE.captures(row) {
            if let Some(file) = current.as_mut() {
                let hit_count = caps[2]
                    .parse::<u64>()
                    .map_err(|e| GatherError::parse(row_no, format!("bad call count: {}", e)))?;
                file.pending.push(FunctionCoverage {
                    name: caps[1].to_string(),
                    start_line: None,
                    end_line: None,
                    hit_count,
                });
            }
            continue;
        }

        let Some((count_field, rest)) = row.split_once(':') else {
            continue;
        };
        let Some((line_field, source_text)) = rest.split_once(':') else {
            continue;
        };
        let Ok(line) = line_field.trim().parse::<u32>() else {
            continue;
        };

        if line == 0 {
            if let Some(path) = source_text.strip_prefix("Source:") {
                if let Some(file) = current.take() {
                    records.push(file.finish());
                }
                current = Some(TextFile::new(path));
            }
            continue;
        }

        let Some(file) = current.as_mut() else {
            return Err(GatherError::parse(
                row_no,
                "line count found before the first Source: marker",
            ));
        };

        check_line(line, row_no)?;

        // Template specializations repeat lines that were already counted
        // in the file-wide listing.
        if line <= file.last_line {
            continue;
        }
        file.last_line = line;

        for mut function in file.pending.drain(..) {
            function.start_line = Some(line);
            file.record.functions.push(function);
        }

        if let Some(count) = parse_count(count_field.trim())
            .map_err(|message| GatherError::parse(row_no, message))?
        {
            file.record.lines.insert(line, count);
        }
    }

    if let Some(file) = current.take() {
        records.push(file.finish());
    }
    Ok(records)
}

/// `Ok(None)` for non-executable lines.
fn parse_count(field: &str) -> std::result::Result<Option<u64>, String> {
    match field {
        "-" => Ok(None),
        "#####" | "=====" => Ok(Some(0)),
        _ => field
            .trim_end_matches('*')
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("unreadable execution count '{}'", field)),
    }
}

fn parse_intermediate(text: &str) -> Result<Vec<CoverageRecord>> {
    let mut records = Vec::new();
    let mut current: Option<CoverageRecord> = None;

    for (idx, row) in text.lines().enumerate() {
        let row_no = idx + 1;
        let Some((tag, value)) = row.trim().split_once(':') else {
            continue;
        };

        match tag {
            "file" => {
                if let Some(record) = current.take() {
                    records.push(record);
                }
                current = Some(CoverageRecord::new(value.trim()));
            }
            "function" => {
                let record = require_file(&mut current, row_no)?;
                let fields: Vec<&str> = value.splitn(4, ',').collect();
                // gcc 8 adds the end line; older names may contain commas, so
                // the count column must be numeric too.
                let function = match fields.as_slice() {
                    [start, end, count, name] if is_number(end) && is_number(count) => {
                        FunctionCoverage {
                            name: name.to_string(),
                            start_line: Some(parse_line(start, row_no)?),
                            end_line: Some(parse_line(end, row_no)?),
                            hit_count: parse_number(count, row_no)?,
                        }
                    }
                    [line, count, rest @ ..] if !rest.is_empty() => FunctionCoverage {
                        name: rest.join(","),
                        start_line: Some(parse_line(line, row_no)?),
                        end_line: None,
                        hit_count: parse_number(count, row_no)?,
                    },
                    _ => {
                        return Err(GatherError::parse(row_no, "malformed function entry"));
                    }
                };
                record.functions.push(function);
            }
            "lcount" => {
                let record = require_file(&mut current, row_no)?;
                let mut fields = value.split(',');
                let (Some(line), Some(count)) = (fields.next(), fields.next()) else {
                    return Err(GatherError::parse(row_no, "malformed lcount entry"));
                };
                let line = parse_line(line, row_no)?;
                let count: u64 = parse_number(count, row_no)?;
                if line > 0 {
                    let total = record.lines.entry(line).or_insert(0);
                    *total = total.saturating_add(count);
                }
            }
            _ => {}
        }
    }

    if let Some(record) = current.take() {
        records.push(record);
    }
    Ok(records)
}

fn require_file(current: &mut Option<CoverageRecord>, row_no: usize) -> Result<&mut CoverageRecord> {
    current
        .as_mut()
        .ok_or_else(|| GatherError::parse(row_no, "coverage entry found before the first file: entry"))
}

fn is_number(field: &str) -> bool {
    field.trim().parse::<u64>().is_ok()
}

fn parse_line(field: &str, row_no: usize) -> Result<u32> {
    check_line(parse_number(field, row_no)?, row_no)
}

fn parse_number<T: str::FromStr>(field: &str, row_no: usize) -> Result<T> {
    field
        .trim()
        .parse::<T>()
        .map_err(|_| GatherError::parse(row_no, format!("expected a number, found '{}'", field)))
}
