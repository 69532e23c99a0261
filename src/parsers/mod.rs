pub mod cobertura;
pub mod gcov;
pub mod llvm;

use crate::error::{GatherError, Result};
use crate::model::CoverageRecord;

/// Largest line number accepted from an artifact. Per-line coverage is kept
/// as a dense array, so anything beyond this is treated as corrupt input.
pub const MAX_LINE: u32 = 1 << 22;

/// Every backend parser implements this trait. Parsers are stateless and
/// shared across the worker pool.
pub trait Parser: Sync {
    /// Parse one artifact into raw, not yet canonicalized records.
    fn parse(&self, input: &[u8]) -> Result<Vec<CoverageRecord>>;
}

/// Reject line numbers past `MAX_LINE`; `row` is the artifact row for the
/// error message, 0 when unknown.
pub(crate) fn check_line(line: u32, row: usize) -> Result<u32> {
    if line > MAX_LINE {
        return Err(GatherError::parse(
            row,
            format!("line number {} is out of range (max {})", line, MAX_LINE),
        ));
    }
    Ok(line)
}
