//! Driving the coverage toolchain: version probing, bounded subprocess runs,
//! the gcov and llvm preprocessing steps and discovery of the intermediate
//! artifacts they leave behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::detect::{self, Format};
use crate::error::{GatherError, Result};
use crate::model::{ArtifactFailure, Stage};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long the pipes may stay open after a killed tool.
const KILL_GRACE: Duration = Duration::from_secs(1);
/// Long file names, branch and call counts (which also emit the
/// `function … called N` rows), mangled paths.
const GCOV_FLAGS: [&str; 4] = ["-l", "-b", "-c", "-p"];

/// `gcov (Ubuntu 13.2.0-4ubuntu3) 13.2.0`
static GCOV_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^gcov \(.*?\) (\d+(?:\.\d+)*)").unwrap());
/// `Ubuntu LLVM version 18.1.3`
static LLVM_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LLVM version (\d+(?:\.\d+)*)").unwrap());

/// Recognize the coverage tool from its `--version` banner.
pub fn parse_tool_version(stdout: &str) -> Option<(Format, Vec<u32>)> {
    let parse = |text: &str| -> Vec<u32> { text.split('.').filter_map(|c| c.parse().ok()).collect() };

    for line in stdout.lines().take(3) {
        let line = line.trim();
        if let Some(caps) = GCOV_VERSION_RE.captures(line) {
            return Some((Format::Gcov, parse(&caps[1])));
        }
        if let Some(caps) = LLVM_VERSION_RE.captures(line) {
            return Some((Format::Llvm, parse(&caps[1])));
        }
    }
    None
}

/// Ask `tool --version` which backend it belongs to.
pub fn detect_tool(tool: &Path, timeout: Duration) -> Result<(Format, Vec<u32>)> {
    let output = run(Command::new(tool).arg("--version"), timeout)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_tool_version(&stdout).ok_or_else(|| {
        GatherError::UnknownTool(format!(
            "{}: {}",
            tool.display(),
            stdout.lines().next().unwrap_or("").trim()
        ))
    })
}

fn describe(cmd: &Command) -> String {
    let mut text = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        text.push(' ');
        text.push_str(&arg.to_string_lossy());
    }
    text
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for a drain thread until `limit` after `started`. `None` when it
/// is still running; it then finishes on its own once the last holder of
/// the pipe exits.
fn join_by(
    handle: thread::JoinHandle<Vec<u8>>,
    started: Instant,
    limit: Duration,
) -> Option<Vec<u8>> {
    while !handle.is_finished() {
        if started.elapsed() >= limit {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
    handle.join().ok()
}

/// Run a subprocess to completion, killing it once `timeout` elapses.
///
/// Both pipes are drained on helper threads so a chatty tool cannot block
/// on a full pipe. A non-zero exit becomes `GatherError::Tool`. Output held
/// open past the deadline by a grandchild counts as a timeout.
pub fn run(cmd: &mut Command, timeout: Duration) -> Result<Output> {
    let program = describe(cmd);
    log::debug!("$ {}", program);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GatherError::Tool {
            program: program.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let limit = timeout.max(started.elapsed() + KILL_GRACE);
    let stdout = join_by(stdout, started, limit);
    let stderr = join_by(stderr, started, limit);
    let (Some(status), Some(stdout), Some(stderr)) = (status, stdout, stderr) else {
        return Err(GatherError::Timeout { program, timeout });
    };

    if !status.success() {
        return Err(GatherError::Tool {
            program,
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

/// All files under `root` with the given (case-sensitive) suffix.
fn files_with_suffix(root: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(suffix))
        {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Directory name under the intermediate dir for a build subdirectory:
/// path separators become `#`.
fn flatten_dir(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("#")
}

fn failure(artifact: &Path, error: impl std::fmt::Display) -> ArtifactFailure {
    ArtifactFailure {
        artifact: artifact.to_path_buf(),
        stage: Stage::Preprocess,
        message: error.to_string(),
    }
}

/// Run gcov for every directory holding `.gcno` notes.
///
/// Each directory is one unit of work; its failure does not stop the rest.
/// Call inside the worker pool to bound parallelism.
pub fn gcov_preprocess(
    gcov: &Path,
    bin_dir: &Path,
    int_dir: &Path,
    timeout: Duration,
) -> Result<Vec<ArtifactFailure>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for note in files_with_suffix(bin_dir, ".gcno")? {
        if let Some(dir) = note.parent() {
            groups.entry(dir.to_path_buf()).or_default().push(note.clone());
        }
    }
    if groups.is_empty() {
        log::warn!("no .gcno files found under {}", bin_dir.display());
    }

    let failures = groups
        .par_iter()
        .filter_map(|(dir, notes)| {
            let relative = dir.strip_prefix(bin_dir).unwrap_or(dir);
            let out_dir = int_dir.join(flatten_dir(relative));
            let result = fs::create_dir_all(&out_dir)
                .map_err(GatherError::from)
                .and_then(|()| {
                    run(
                        Command::new(gcov)
                            .args(GCOV_FLAGS)
                            .arg("-o")
                            .arg(dir)
                            .args(notes)
                            .current_dir(&out_dir),
                        timeout,
                    )
                });
            match result {
                Ok(_) => {
                    log::debug!("gcov: {} ({} notes)", dir.display(), notes.len());
                    None
                }
                Err(e) => Some(failure(dir, e)),
            }
        })
        .collect();
    Ok(failures)
}

/// Test executables in `bin_dir`: `TARGET`, `TARGET-1.2.3` or `*-test`,
/// with `.exe` on Windows.
pub fn find_executables(bin_dir: &Path, target: Option<&str>) -> Result<Vec<PathBuf>> {
    let exe = if cfg!(windows) { ".exe" } else { "" };
    let versioned = match target {
        Some(target) => Some(
            Regex::new(&format!(
                r"^{}(-[0-9.]+)?{}$",
                regex::escape(target),
                regex::escape(exe)
            ))
            .map_err(|e| GatherError::Config(format!("bad target name '{}': {}", target, e)))?,
        ),
        None => None,
    };
    let suffix = format!("-test{}", exe);

    let mut found = Vec::new();
    if !bin_dir.is_dir() {
        return Ok(found);
    }
    for entry in WalkDir::new(bin_dir).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let matches_target = versioned.as_ref().is_some_and(|re| re.is_match(name));
        if matches_target || name.ends_with(&suffix) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Merge raw profiles and export coverage of every test executable.
///
/// A failed merge fails the whole phase as a single artifact; each failed
/// export fails only its executable.
pub fn llvm_preprocess(
    llvm_cov: &Path,
    profdata: &Path,
    target: Option<&str>,
    bin_dir: &Path,
    int_dir: &Path,
    timeout: Duration,
) -> Result<Vec<ArtifactFailure>> {
    let raw = files_with_suffix(bin_dir, ".profraw")?;
    if raw.is_empty() {
        log::warn!("no .profraw files found under {}", bin_dir.display());
        return Ok(Vec::new());
    }

    fs::create_dir_all(int_dir)?;
    let merged = int_dir.join("coverage.profdata");
    let merge = run(
        Command::new(profdata)
            .args(["merge", "-sparse"])
            .args(&raw)
            .arg("-o")
            .arg(&merged),
        timeout,
    );
    if let Err(e) = merge {
        return Ok(vec![failure(&merged, e)]);
    }
    log::debug!("merged {} raw profiles into {}", raw.len(), merged.display());

    let executables = find_executables(&bin_dir.join("bin"), target)?;
    if executables.is_empty() {
        log::warn!("no test executables found in {}", bin_dir.join("bin").display());
    }

    let failures = executables
        .par_iter()
        .filter_map(|exe| {
            let relative = exe.strip_prefix(bin_dir).unwrap_or(exe);
            let mut name = relative.as_os_str().to_os_string();
            name.push(".profjson");
            let out = int_dir.join(name);

            let result = run(
                Command::new(llvm_cov)
                    .args(["export", "-format", "text", "-skip-expansions", "-instr-profile"])
                    .arg(&merged)
                    .arg(exe),
                timeout,
            )
            .and_then(|output| {
                if let Some(parent) = out.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&out, output.stdout)?;
                Ok(())
            });
            result.err().map(|e| failure(exe, e))
        })
        .collect();
    Ok(failures)
}

fn looks_like_cobertura(path: &Path) -> bool {
    let mut head = Vec::new();
    match fs::File::open(path).and_then(|f| f.take(4096).read_to_end(&mut head)) {
        Ok(_) => detect::detect_format(path, &head) == Some(Format::Cobertura),
        // Let the read stage report it.
        Err(_) => true,
    }
}

/// Intermediate artifacts of `format` under `int_dir`, sorted by path.
pub fn discover(int_dir: &Path, format: Format) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(int_dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() || !detect::is_artifact(format, entry.path()) {
            continue;
        }
        if format == Format::Cobertura && !looks_like_cobertura(entry.path()) {
            log::debug!("skipping {}: not a Cobertura report", entry.path().display());
            continue;
        }
        found.push(entry.into_path());
    }
    Ok(found)
}
