//! Folding of coverage observations into one `SourceFile` per canonical
//! path.
//!
//! Per line, a concrete count wins over `None`, and two counts add up. This
//! makes the fold commutative and associative, so artifacts may be merged in
//! whatever order the workers finish them.

use std::collections::BTreeMap;

use crate::model::{CoverageRecord, FunctionCoverage, Hits, SourceFile};

/// Combine two observations of the same line.
#[must_use]
pub fn combine_hits(a: Hits, b: Hits) -> Hits {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.saturating_add(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// Combine two per-line arrays; the shorter one is padded with `None`.
pub fn merge_lines(into: &mut Vec<Hits>, other: &[Hits]) {
    if other.len() > into.len() {
        into.resize(other.len(), None);
    }
    for (slot, &hits) in into.iter_mut().zip(other) {
        *slot = combine_hits(*slot, hits);
    }
}

fn merge_function(into: &mut FunctionCoverage, other: &FunctionCoverage) {
    into.hit_count = into.hit_count.saturating_add(other.hit_count);
    into.start_line = min_some(into.start_line, other.start_line);
    into.end_line = into.end_line.max(other.end_line);
}

fn min_some(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn add_function(functions: &mut BTreeMap<String, FunctionCoverage>, function: &FunctionCoverage) {
    match functions.get_mut(&function.name) {
        Some(existing) => merge_function(existing, function),
        None => {
            functions.insert(function.name.clone(), function.clone());
        }
    }
}

impl SourceFile {
    /// Fold one parsed record into this file.
    pub fn merge_record(&mut self, record: &CoverageRecord) {
        merge_lines(&mut self.coverage, &record.to_hits());
        for function in &record.functions {
            add_function(&mut self.functions, function);
        }
    }

    /// Fold another already-merged observation of the same file.
    pub fn merge(&mut self, other: &SourceFile) {
        merge_lines(&mut self.coverage, &other.coverage);
        for function in other.functions.values() {
            add_function(&mut self.functions, function);
        }
    }
}

/// Merge `incoming` into the existing state of the file named `name`.
pub fn merge(existing: Option<SourceFile>, name: &str, incoming: &CoverageRecord) -> SourceFile {
    let mut file = existing.unwrap_or_else(|| SourceFile::new(name));
    file.merge_record(incoming);
    file
}

/// Owner of the in-progress report. Only the aggregating thread touches it.
#[derive(Debug, Default)]
pub struct Aggregator {
    files: BTreeMap<String, SourceFile>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, name: &str, record: &CoverageRecord) {
        match self.files.get_mut(name) {
            Some(file) => file.merge_record(record),
            None => {
                self.files
                    .insert(name.to_string(), merge(None, name, record));
            }
        }
    }

    pub fn add_file(&mut self, file: SourceFile) {
        match self.files.get_mut(&file.name) {
            Some(existing) => existing.merge(&file),
            None => {
                self.files.insert(file.name.clone(), file);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Merged files, sorted by canonical path.
    pub fn into_files(self) -> BTreeMap<String, SourceFile> {
        self.files
    }
}
