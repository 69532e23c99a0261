//! Build properties recorded next to the build tree, used to name the job
//! in a parallel Coveralls build.
//!
//! `BUILD_DIR/report_answers.txt` holds the answers a build was configured
//! with; only lines starting with `-p` are properties:
//!
//!   -pbuild_type=Debug
//!   -pcompiler=gcc
//!   -pcompiler.version=13
//!   -psanitizer=on

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::Result;

pub const PROPS_FILE: &str = "report_answers.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Value {
    fn parse(text: &str) -> Self {
        if let Ok(num) = text.parse::<i64>() {
            return Value::Int(num);
        }
        match text.to_lowercase().as_str() {
            "on" | "true" | "yes" => return Value::Bool(true),
            "off" | "false" | "no" => return Value::Bool(false),
            _ => {}
        }
        let unquoted = text
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .unwrap_or(text);
        Value::Str(unquoted.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(num) => write!(f, "{}", num),
            Value::Bool(flag) => write!(f, "{}", flag),
            Value::Str(text) => f.write_str(text),
        }
    }
}

pub type Props = BTreeMap<String, Value>;

pub fn parse_props(text: &str) -> Props {
    text.lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("-p"))
        .filter_map(|prop| prop.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), Value::parse(value.trim())))
        .collect()
}

/// Properties of the build in `build_dir`; empty when there is no
/// properties file.
pub fn read_props(build_dir: &Path) -> Result<Props> {
    match fs::read_to_string(build_dir.join(PROPS_FILE)) {
        Ok(text) => Ok(parse_props(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Props::new()),
        Err(e) => Err(e.into()),
    }
}

/// `build_type, os-os.version, compiler-compiler.version[, sanitizer]`,
/// leaving out whatever is missing. `None` when nothing is left.
///
/// `compiler.version` is ignored for MSVC; a missing `os.version` reads as
/// `latest`.
pub fn job_flag_name(props: &Props) -> Option<String> {
    let get = |name: &str| props.get(name).map(Value::to_string);

    let os_version = get("os.version").unwrap_or_else(|| "latest".to_string());
    let os = get("os").map(|os| format!("{}-{}", os, os_version));

    let msvc = matches!(props.get("compiler"), Some(Value::Str(c)) if c == "msvc");
    let compiler = get("compiler").map(|compiler| match get("compiler.version") {
        Some(version) if !msvc => format!("{}-{}", compiler, version),
        _ => compiler,
    });

    let sanitizer = matches!(props.get("sanitizer"), Some(v) if *v != Value::Bool(false))
        .then(|| "sanitizer".to_string());

    let parts: Vec<String> = [get("build_type"), os, compiler, sanitizer]
        .into_iter()
        .flatten()
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Flag name for the build in `build_dir`, or `None` with a warning when the
/// properties cannot be read.
pub fn flag_name_for_build(build_dir: &Path) -> Option<String> {
    match read_props(build_dir) {
        Ok(props) => job_flag_name(&props),
        Err(e) => {
            log::warn!(
                "cannot read {}: {}",
                build_dir.join(PROPS_FILE).display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_props() {
        let props = parse_props(
            "-pbuild_type=Release\r\n-s compiler=gcc\n-pcompiler.version=13\n-psanitizer=ON\n-pos.version='22.04'\n-pnote=a=b\n",
        );
        assert_eq!(props["build_type"], Value::Str("Release".to_string()));
        assert_eq!(props["compiler.version"], Value::Int(13));
        assert_eq!(props["sanitizer"], Value::Bool(true));
        assert_eq!(props["os.version"], Value::Str("22.04".to_string()));
        assert_eq!(props["note"], Value::Str("a=b".to_string()));
        assert!(!props.contains_key("compiler"));
    }

    #[test]
    fn test_full_flag_name() {
        let props = parse_props(
            "-pbuild_type=Release\n-pos=ubuntu\n-pos.version='22.04'\n-pcompiler=gcc\n-pcompiler.version=13\n-psanitizer=true\n",
        );
        assert_eq!(
            job_flag_name(&props).as_deref(),
            Some("Release, ubuntu-22.04, gcc-13, sanitizer")
        );
    }

    #[test]
    fn test_msvc_version_is_dropped_and_os_version_defaults() {
        let props = parse_props(
            "-pbuild_type=Debug\n-pos=windows\n-pcompiler=msvc\n-pcompiler.version=193\n",
        );
        assert_eq!(
            job_flag_name(&props).as_deref(),
            Some("Debug, windows-latest, msvc")
        );
    }

    #[test]
    fn test_disabled_sanitizer_is_left_out() {
        let props = parse_props("-pbuild_type=Debug\n-psanitizer=off\n");
        assert_eq!(job_flag_name(&props).as_deref(), Some("Debug"));

        let props = parse_props("-pcompiler=clang\n");
        assert_eq!(job_flag_name(&props).as_deref(), Some("clang"));
    }

    #[test]
    fn test_no_props_no_flag_name() {
        assert_eq!(job_flag_name(&Props::new()), None);

        let dir = tempfile::tempdir().unwrap();
        assert!(read_props(dir.path()).unwrap().is_empty());
        assert_eq!(flag_name_for_build(dir.path()), None);

        fs::write(dir.path().join(PROPS_FILE), "-pbuild_type=Debug\n-pos=linux\n").unwrap();
        assert_eq!(
            flag_name_for_build(dir.path()).as_deref(),
            Some("Debug, linux-latest")
        );
    }
}
