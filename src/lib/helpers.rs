use std::{
    fmt::Display,
    fs::{self, File},
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

/// Category of a fatal condition. Every category terminates the run, they
/// only differ in what the operator is told to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// a tool directory or environment variable is missing
    Environment,
    /// the configuration is malformed or inconsistent
    Config,
    /// an upstream stage has not produced what this stage needs
    Precondition,
    /// the external executable ran but its outputs are missing
    StepFailed,
    /// the operator interrupted a running job
    Cancelled,
    Io,
    Other,
}

#[derive(Debug)]
pub struct WrfError {
    kind: ErrorKind,
    msg: String,
}

impl WrfError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        WrfError {
            kind,
            msg: msg.into(),
        }
    }

    pub fn environment(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Environment, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, msg)
    }

    pub fn step_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StepFailed, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl From<String> for WrfError {
    fn from(msg: String) -> Self {
        WrfError {
            kind: ErrorKind::Other,
            msg,
        }
    }
}

impl From<&str> for WrfError {
    fn from(msg: &str) -> Self {
        WrfError {
            kind: ErrorKind::Other,
            msg: msg.into(),
        }
    }
}

impl From<io::Error> for WrfError {
    fn from(error: io::Error) -> Self {
        WrfError {
            kind: ErrorKind::Io,
            msg: error.to_string(),
        }
    }
}

impl From<WrfError> for String {
    fn from(value: WrfError) -> String {
        value.msg
    }
}

impl Display for WrfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for WrfError {}

/// true if every file exists and is not empty
pub fn check_files<P: AsRef<Path>>(files: &[P]) -> bool {
    files.iter().all(|file| {
        fs::metadata(file.as_ref())
            .map(|md| md.is_file() && md.len() > 0)
            .unwrap_or(false)
    })
}

/// create the directory (and parents) when missing
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<(), WrfError> {
    let path = path.as_ref();
    if !path.is_dir() {
        fs::create_dir_all(path)
            .map_err(|err| format!("Failed to create directory {}: {err}", path.display()))?;
    }
    Ok(())
}

/// the directory must already exist, otherwise the upstream stage has not run
pub fn require_dir(path: impl AsRef<Path>, hint: &str) -> Result<(), WrfError> {
    let path = path.as_ref();
    if path.is_dir() {
        Ok(())
    } else {
        Err(WrfError::precondition(format!(
            "Directory {} does not exist! {hint}",
            path.display()
        )))
    }
}

/// `ln -sf src dst`
pub fn link(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), WrfError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let dst = if dst.is_dir() && !is_symlink(dst) {
        dst.join(src.file_name().unwrap_or_default())
    } else {
        dst.to_path_buf()
    };
    if fs::symlink_metadata(&dst).is_ok() {
        fs::remove_file(&dst)?;
    }
    debug!("==> ln -sf {} {}", src.display(), dst.display());
    std::os::unix::fs::symlink(src, &dst).map_err(|err| {
        WrfError::from(format!(
            "Failed to link {} to {}: {err}",
            src.display(),
            dst.display()
        ))
    })
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|md| md.file_type().is_symlink())
        .unwrap_or(false)
}

pub fn copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), WrfError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    debug!("==> cp {} {}", src.display(), dst.display());
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    fs::copy(src, dst).map_err(|err| {
        format!(
            "Failed to copy {} to {}: {err}",
            src.display(),
            dst.display()
        )
    })?;
    Ok(())
}

/// list the entries of `dir` whose file name satisfies `filter`, sorted by name
pub fn list_files<F>(dir: impl AsRef<Path>, filter: F) -> Vec<PathBuf>
where
    F: Fn(&str) -> bool,
{
    let Ok(entries) = fs::read_dir(dir.as_ref()) else {
        return vec![];
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(&filter)
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// `rm -f <dir>/<prefix>*`
pub fn remove_files_with_prefix(dir: impl AsRef<Path>, prefix: &str) -> Result<usize, WrfError> {
    let files = list_files(dir, |name| name.starts_with(prefix));
    for file in &files {
        fs::remove_file(file)?;
    }
    Ok(files.len())
}

/// true when any file in `dir` starting with `prefix` contains `needle`
pub fn search_files(dir: impl AsRef<Path>, prefix: &str, needle: &str) -> bool {
    list_files(dir, |name| name.starts_with(prefix))
        .iter()
        .any(|file| {
            fs::read_to_string(file)
                .map(|contents| contents.contains(needle))
                .unwrap_or(false)
        })
}

/// last non-empty line of a text file, if the file exists yet
pub fn tail_line(path: impl AsRef<Path>) -> Option<String> {
    let file = File::open(path.as_ref()).ok()?;
    BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.trim().is_empty())
        .last()
        .map(|line| line.trim().to_string())
}

pub fn log_listing<P: AsRef<Path>>(files: &[P]) {
    for file in files {
        if let Ok(md) = fs::metadata(file.as_ref()) {
            info!("{:>12} {}", md.len(), file.as_ref().display());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(text: &str) -> Option<Version> {
        let mut parts = text.trim().split('.').map(|p| p.parse::<u32>());
        let major = parts.next()?.ok()?;
        let minor = parts.next()?.ok()?;
        let patch = match parts.next() {
            Some(p) => p.ok()?,
            None => 0,
        };
        Some(Version::new(major, minor, patch))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

lazy_static! {
    static ref VERSION_RE: Regex =
        Regex::new(r"Version (\d+\.\d+(\.\d+)?)").expect("version regex should compile");
}

/// Read the version of a WRF family tool from the README shipped in its root.
pub fn tool_version(root: impl AsRef<Path>) -> Result<Version, WrfError> {
    let root = root.as_ref();
    let text = if root.join("README").is_file() {
        fs::read_to_string(root.join("README"))?
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    } else if root.join("README.DA").is_file() {
        fs::read_to_string(root.join("README.DA"))?
    } else if root.join("README.WRFPLUS").is_file() {
        fs::read_to_string(root.join("README.WRFPLUS"))?
    } else {
        return Err(WrfError::environment(format!(
            "Could not find version of {}!",
            root.display()
        )));
    };
    VERSION_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Version::parse(m.as_str()))
        .ok_or_else(|| {
            WrfError::environment(format!("Could not find version of {}!", root.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn check_files_requires_non_empty_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let full = dir.path().join("full");
        let empty = dir.path().join("empty");
        File::create(&full).unwrap().write_all(b"x").unwrap();
        File::create(&empty).unwrap();

        assert!(check_files(&[&full]));
        assert!(!check_files(&[&full, &empty]));
        assert!(!check_files(&[dir.path().join("missing")]));
    }

    #[test]
    fn tail_line_skips_trailing_blank_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("rsl.error.0000");
        fs::write(&log, "first\nTiming for main: time 2019-06-01_00:01:00\n\n").unwrap();
        assert_eq!(
            tail_line(&log).as_deref(),
            Some("Timing for main: time 2019-06-01_00:01:00")
        );
        assert_eq!(tail_line(dir.path().join("nope")), None);
    }

    #[test]
    fn tool_version_from_readme() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("README"), "WRF Model Version 4.1.2 (May 2019)\n").unwrap();
        let version = tool_version(dir.path()).unwrap();
        assert_eq!(version, Version::new(4, 1, 2));
        assert!(version > Version::new(3, 9, 1));
        assert_eq!(Version::parse("3.9"), Some(Version::new(3, 9, 0)));
    }

    #[test]
    fn link_replaces_existing_link() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let dst = dir.path().join("fg");
        link(&a, &dst).unwrap();
        link(&b, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "b");
    }

    #[test]
    fn search_and_remove_by_prefix() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("rsl.error.0000"), "ok").unwrap();
        fs::write(
            dir.path().join("rsl.error.0001"),
            "Invalid CV option chosen:  cv_options =    0",
        )
        .unwrap();
        assert!(search_files(dir.path(), "rsl.error.", "Invalid CV option"));
        assert!(!search_files(dir.path(), "rsl.out.", "Invalid CV option"));
        assert_eq!(remove_files_with_prefix(dir.path(), "rsl.error.").unwrap(), 2);
        assert!(list_files(dir.path(), |_| true).is_empty());
    }
}
