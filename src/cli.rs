//! Command handler functions for the coveralls-gather CLI.
//!
//! Each `cmd_*` function returns its printable output instead of writing to
//! stdout, which keeps them testable.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::ci;
use crate::config::GatherConfig;
use crate::detect::Format;
use crate::error::GatherError;
use crate::excludes;
use crate::gather;
use crate::git;
use crate::merge::Aggregator;
use crate::props;
use crate::report::{self, CoverallsReport};
use crate::tools;
use crate::upload;

/// What a command printed, and whether the run counts as a success.
#[derive(Debug)]
pub struct Outcome {
    pub output: String,
    pub success: bool,
}

/// Settings shared by the commands that produce a full report.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub flag_name: Option<String>,
    pub parallel: bool,
    pub repo_token: Option<String>,
}

impl ReportOptions {
    fn apply(&self, report: CoverallsReport) -> CoverallsReport {
        report
            .with_repo_token(self.repo_token.clone())
            .with_flag_name(self.flag_name.clone())
            .with_parallel(self.parallel)
    }
}

/// Pick the backend: an explicit choice wins, otherwise ask the tool.
pub fn resolve_backend(
    backend: Option<Format>,
    tool: Option<&Path>,
    timeout: Duration,
) -> Result<Format> {
    if let Some(format) = backend {
        return Ok(format);
    }
    let Some(tool) = tool else {
        return Err(GatherError::Config(
            "pass --backend, or --gcov so the backend can be detected".to_string(),
        )
        .into());
    };
    let (format, version) = tools::detect_tool(tool, timeout)
        .with_context(|| format!("Failed to identify {}", tool.display()))?;
    log::info!(
        "{} is {} {}",
        tool.display(),
        format,
        version
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    );
    Ok(format)
}

fn full_report(
    git: Option<git::GitInfo>,
    source_files: Vec<report::SourceFileReport>,
    options: &ReportOptions,
) -> CoverallsReport {
    let service = ci::detect_from_env();
    log::info!("Preparing Coveralls for {}", service.description);
    options.apply(CoverallsReport::new(service.header, git, source_files))
}

fn log_header(report: &CoverallsReport) {
    if log::log_enabled!(log::Level::Debug) {
        let header = CoverallsReport {
            source_files: Vec::new(),
            repo_token: report.repo_token.as_ref().map(|_| "<hidden>".to_string()),
            ..report.clone()
        };
        if let Ok(json) = serde_json::to_string_pretty(&header) {
            log::debug!("report header:\n{}", json);
        }
    }
}

fn upload_report(out: &mut String, path: &Path, endpoint: &str) -> Result<()> {
    let response = upload::upload(path, endpoint).with_context(|| {
        format!(
            "Report written to {}, but the upload to {} failed",
            path.display(),
            endpoint
        )
    })?;
    writeln!(out, "Uploaded {}: {}", path.display(), response.trim()).unwrap();
    Ok(())
}

/// Gather coverage, write the report and optionally upload it.
pub fn cmd_gather(config: &GatherConfig, options: &ReportOptions, upload_to: Option<&str>) -> Result<Outcome> {
    let (gathered, git) = gather::run(config)?;

    if gathered.files.is_empty() && !gathered.failures.is_empty() {
        log::error!(
            "all {} artifacts failed or were filtered out",
            gathered.artifacts
        );
    }

    let mut markers: Vec<&str> = config.format.exclusion_markers().to_vec();
    markers.extend_from_slice(excludes::platform_markers());
    let (source_files, stats) =
        report::build_source_files(&gathered.files, &config.src_dir, &markers)?;

    let file_count = source_files.len();
    let report = if config.partial {
        CoverallsReport::partial(git, source_files)
    } else {
        let mut options = options.clone();
        if options.flag_name.is_none() {
            options.flag_name = props::flag_name_for_build(&config.bin_dir);
        }
        full_report(git, source_files, &options)
    };
    log_header(&report);
    report::write_report(&report, &config.output)
        .with_context(|| format!("Failed to write {}", config.output.display()))?;

    let mut out = report::format_summary(&stats);
    writeln!(
        out,
        "Wrote {} ({} files from {} artifacts)",
        config.output.display(),
        file_count,
        gathered.artifacts
    )
    .unwrap();
    if !gathered.failures.is_empty() {
        writeln!(out, "{} artifacts failed:", gathered.failures.len()).unwrap();
        for failure in &gathered.failures {
            writeln!(out, "  {}", failure).unwrap();
        }
    }

    if let Some(endpoint) = upload_to {
        upload_report(&mut out, &config.output, endpoint)?;
    }

    Ok(Outcome {
        output: out,
        success: gathered.failures.is_empty(),
    })
}

/// Combine several reports, partial or full, into one full report.
pub fn cmd_merge(
    inputs: &[PathBuf],
    output: &Path,
    src_dir: &Path,
    git_binary: &Path,
    options: &ReportOptions,
) -> Result<Outcome> {
    let mut aggregator = Aggregator::new();
    let mut input_git = None;
    for input in inputs {
        let report = report::read_report(input)
            .with_context(|| format!("Failed to read report {}", input.display()))?;
        for file in &report.source_files {
            aggregator.add_file(file.to_source_file());
        }
        if input_git.is_none() {
            input_git = report.git;
        }
    }

    let git = git::collect(git_binary, src_dir).or(input_git);
    let files = aggregator.into_files();
    let (source_files, stats) =
        report::build_source_files(&files, src_dir, excludes::platform_markers())?;
    let file_count = source_files.len();

    let report = full_report(git, source_files, options);
    log_header(&report);
    report::write_report(&report, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let mut out = report::format_summary(&stats);
    writeln!(
        out,
        "Wrote {} ({} files from {} reports)",
        output.display(),
        file_count,
        inputs.len()
    )
    .unwrap();
    Ok(Outcome {
        output: out,
        success: true,
    })
}

pub fn cmd_upload(path: &Path, endpoint: &str) -> Result<String> {
    let mut out = String::new();
    upload_report(&mut out, path, endpoint)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_backend_skips_detection() {
        let format = resolve_backend(
            Some(Format::Cobertura),
            Some(Path::new("/nonexistent/gcov")),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(format, Format::Cobertura);
    }

    #[test]
    fn test_backend_needs_tool_or_choice() {
        let err = resolve_backend(None, None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GatherError>(),
            Some(GatherError::Config(_))
        ));
    }
}
