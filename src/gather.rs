//! The gather pipeline: preprocess, parse, resolve, merge.
//!
//! Artifacts are read and parsed on a rayon pool. Each worker sends its
//! outcome over a channel to the calling thread, which alone resolves paths
//! and owns the merged state. A failing artifact is recorded and skipped;
//! it never stops the others.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::GatherConfig;
use crate::detect::Format;
use crate::error::{GatherError, Result};
use crate::git::{self, GitInfo};
use crate::merge::Aggregator;
use crate::model::{ArtifactFailure, CoverageRecord, SourceFile, Stage};
use crate::parsers::Parser;
use crate::paths::{PathFilter, Resolution};
use crate::tools;

const THREAD_POOL_NAME: &str = "gather";

/// Outcome of gathering, before the report is built.
#[derive(Debug, Default)]
pub struct Gathered {
    pub files: BTreeMap<String, SourceFile>,
    pub failures: Vec<ArtifactFailure>,
    /// Artifacts looked at, failed ones included.
    pub artifacts: usize,
    /// Records dropped by the path filter.
    pub excluded: usize,
    /// Records whose path could not be resolved.
    pub unresolved: usize,
}

pub fn build_pool(jobs: Option<usize>) -> Result<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new().thread_name(|idx| format!("{}-{}", THREAD_POOL_NAME, idx));
    if let Some(jobs) = jobs {
        builder = builder.num_threads(jobs);
    }
    Ok(builder.build()?)
}

/// Read and parse one artifact.
fn parse_artifact(
    path: &Path,
    parser: &dyn Parser,
) -> std::result::Result<Vec<CoverageRecord>, ArtifactFailure> {
    let failure = |stage: Stage, error: GatherError| ArtifactFailure {
        artifact: path.to_path_buf(),
        stage,
        message: error.to_string(),
    };
    let content = fs::read(path).map_err(|e| failure(Stage::Read, e.into()))?;
    parser.parse(&content).map_err(|e| failure(Stage::Parse, e))
}

/// Parse `artifacts` on `pool` and merge everything `filter` admits.
pub fn gather_artifacts(
    artifacts: &[PathBuf],
    parser: &dyn Parser,
    filter: &PathFilter,
    pool: &ThreadPool,
) -> Gathered {
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        scope.spawn(move || {
            pool.install(|| {
                artifacts.par_iter().for_each_with(tx, |tx, path| {
                    // The receiver outlives this scope.
                    let _ = tx.send((path, parse_artifact(path, parser)));
                });
            });
        });

        let mut aggregator = Aggregator::new();
        let mut gathered = Gathered {
            artifacts: artifacts.len(),
            ..Default::default()
        };

        for (path, outcome) in rx {
            let records = match outcome {
                Ok(records) => records,
                Err(failure) => {
                    log::error!("{}", failure);
                    gathered.failures.push(failure);
                    continue;
                }
            };
            log::debug!("{}: {} records", path.display(), records.len());

            for record in &records {
                match filter.resolve(&record.path) {
                    Ok(Resolution::Included(name)) => aggregator.add_record(&name, record),
                    Ok(Resolution::Excluded(reason)) => {
                        log::debug!("skipping {}: {:?}", record.path, reason);
                        gathered.excluded += 1;
                    }
                    Err(e) => {
                        log::warn!("{}: {}", path.display(), e);
                        gathered.unresolved += 1;
                    }
                }
            }
        }

        gathered.files = aggregator.into_files();
        gathered.failures.sort_by(|a, b| a.artifact.cmp(&b.artifact));
        gathered
    })
}

/// Run the toolchain preprocessing step for the configured backend.
pub fn preprocess(config: &GatherConfig, pool: &ThreadPool) -> Result<Vec<ArtifactFailure>> {
    let tool = || {
        config
            .tool
            .as_deref()
            .ok_or_else(|| GatherError::Config(format!("the {} backend needs a tool", config.format)))
    };

    match config.format {
        Format::Gcov => {
            let gcov = tool()?;
            pool.install(|| {
                tools::gcov_preprocess(gcov, &config.bin_dir, &config.int_dir, config.timeout)
            })
        }
        Format::Llvm => {
            let llvm_cov = tool()?;
            let profdata = config.merge_tool.as_deref().ok_or_else(|| {
                GatherError::Config("the llvm-cov backend needs llvm-profdata".to_string())
            })?;
            pool.install(|| {
                tools::llvm_preprocess(
                    llvm_cov,
                    profdata,
                    config.target.as_deref(),
                    &config.bin_dir,
                    &config.int_dir,
                    config.timeout,
                )
            })
        }
        Format::Cobertura => Ok(Vec::new()),
    }
}

/// The whole gather step. Git metadata is collected on its own thread while
/// the artifacts are processed.
pub fn run(config: &GatherConfig) -> Result<(Gathered, Option<GitInfo>)> {
    config.validate()?;
    let filter = config.path_filter()?;
    let pool = build_pool(config.jobs)?;

    thread::scope(|scope| {
        let git = scope.spawn(|| git::collect(&config.git, &config.src_dir));

        let gathered = (|| -> Result<Gathered> {
            if !config.int_dir.exists() {
                fs::create_dir_all(&config.int_dir)?;
            }
            let preprocess_failures = preprocess(config, &pool)?;
            for failure in &preprocess_failures {
                log::error!("{}", failure);
            }

            let artifacts = tools::discover(&config.int_dir, config.format)?;
            log::info!(
                "found {} {} artifacts in {}",
                artifacts.len(),
                config.format,
                config.int_dir.display()
            );

            let mut gathered =
                gather_artifacts(&artifacts, config.format.parser(), &filter, &pool);
            gathered.artifacts += preprocess_failures.len();
            let mut failures = preprocess_failures;
            failures.append(&mut gathered.failures);
            gathered.failures = failures;
            Ok(gathered)
        })();

        let git = git.join().unwrap_or(None);
        gathered.map(|g| (g, git))
    })
}
