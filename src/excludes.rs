//! In-source exclusion markers.
//!
//! Recognized markers, with `GCOV_`, `LCOV_` and `GRCOV_` prefixes:
//!   `GCOV_EXCL_LINE`   excludes the line it is on
//!   `GCOV_EXCL_START`  opens an excluded block (inclusive)
//!   `GCOV_EXCL_STOP`   closes it (inclusive)
//!
//! `START` and `LINE` may carry a tag list, `GCOV_EXCL_START[win32,clang]`;
//! such a marker only applies when one of the tags names the current platform
//! or toolchain.
use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static TAGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:G|L|GR)COV_EXCL_(?:START|LINE)\[([^\]]+)\]").unwrap()
});
static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:G|L|GR)COV_EXCL_LINE").unwrap());
static START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:G|L|GR)COV_EXCL_START").unwrap());
static STOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:G|L|GR)COV_EXCL_STOP").unwrap());
static END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:G|L|GR)COV_EXCL_END").unwrap());

/// Tags matching the host platform.
pub fn platform_markers() -> &'static [&'static str] {
    if cfg!(windows) {
        &["win32"]
    } else if cfg!(target_os = "macos") {
        &["darwin", "posix"]
    } else {
        &["linux", "posix"]
    }
}

/// Inclusive range of excluded lines, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u32,
    pub end: u32,
}

/// Lines to erase from one file's coverage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub blocks: Vec<Block>,
    /// Whitespace-only lines.
    pub blank: BTreeSet<u32>,
}

impl Exclusions {
    pub fn is_excluded(&self, line: u32) -> bool {
        self.blocks.iter().any(|b| b.start <= line && line <= b.end)
    }

    pub fn is_blank(&self, line: u32) -> bool {
        self.blank.contains(&line)
    }
}

struct OpenStart {
    line: u32,
    column: usize,
    marker: String,
}

/// Line-by-line scanner over one source file.
pub struct Scanner<'a> {
    path: &'a str,
    markers: Vec<String>,
    inside: bool,
    last_start: Option<OpenStart>,
    /// `EXCL_LINE` lines seen since the last block was opened.
    single_lines: Vec<u32>,
    result: Exclusions,
}

impl<'a> Scanner<'a> {
    /// `path` is only used in warnings.
    pub fn new(path: &'a str, markers: &[&str]) -> Self {
        Self {
            path,
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
            inside: false,
            last_start: None,
            single_lines: Vec::new(),
            result: Exclusions::default(),
        }
    }

    pub fn on_line(&mut self, line: u32, text: &str) {
        if text.trim().is_empty() {
            self.result.blank.insert(line);
            return;
        }

        if let Some(caps) = TAGS_RE.captures(text) {
            let applies = caps[1]
                .split(',')
                .map(|tag| tag.trim().to_lowercase())
                .any(|tag| self.markers.contains(&tag));
            if !applies {
                return;
            }
        }

        let mut switch_off = false;
        let mut single = false;

        if STOP_RE.is_match(text) {
            switch_off = true;
        } else if let Some(end) = END_RE.find(text) {
            if self.inside {
                let found = end.as_str();
                self.warn(
                    line,
                    end.start(),
                    &format!(
                        "found {}; did you mean {}_STOP?",
                        found,
                        found.trim_end_matches("_END")
                    ),
                );
            }
        } else if let Some(start) = START_RE.find(text) {
            if self.inside {
                self.warn(line, start.start(), &format!("double start: found {}", start.as_str()));
                if let Some(previous) = self.last_start.take() {
                    self.warn(previous.line, previous.column, "see previous start");
                    self.include_back(previous.line);
                }
            }
            self.last_start = Some(OpenStart {
                line,
                column: start.start(),
                marker: start.as_str().to_string(),
            });
            self.inside = true;
        } else if LINE_RE.is_match(text) {
            single = true;
            self.single_lines.push(line);
        }

        if self.inside || single {
            self.exclude(line);
        }
        if switch_off {
            self.inside = false;
        }
    }

    /// Close the scan. An unterminated `START` excludes nothing.
    pub fn finish(mut self) -> Exclusions {
        if self.inside {
            if let Some(start) = self.last_start.take() {
                self.warn(
                    start.line,
                    start.column,
                    &format!(
                        "{} not matched with {}_STOP",
                        start.marker,
                        start.marker.trim_end_matches("_START")
                    ),
                );
                self.include_back(start.line);
            }
        }
        self.result
    }

    fn exclude(&mut self, line: u32) {
        if let Some(last) = self.result.blocks.last_mut() {
            if last.start <= line && line <= last.end {
                return;
            }
            if last.end + 1 == line {
                last.end = line;
                return;
            }
        }
        self.result.blocks.push(Block { start: line, end: line });
        self.single_lines.clear();
    }

    /// Drop everything excluded from `line` onwards, keeping the single-line
    /// exclusions that fell inside it.
    fn include_back(&mut self, line: u32) {
        while let Some(last) = self.result.blocks.last_mut() {
            if last.start >= line {
                self.result.blocks.pop();
                continue;
            }
            if last.end >= line {
                last.end = line - 1;
            }
            break;
        }
        let singles = std::mem::take(&mut self.single_lines);
        for single in &singles {
            self.exclude(*single);
        }
        self.single_lines = singles;
    }

    fn warn(&self, line: u32, column: usize, message: &str) {
        log::warn!("{}:{}:{}: {}", self.path, line, column + 1, message);
    }
}

/// Scan a whole source text; lines are numbered from 1.
pub fn scan(path: &str, text: &str, markers: &[&str]) -> Exclusions {
    let mut scanner = Scanner::new(path, markers);
    for (idx, line) in text.split('\n').enumerate() {
        scanner.on_line(idx as u32 + 1, line.trim_end_matches('\r'));
    }
    scanner.finish()
}
