use std::path::{Path, PathBuf};

use crate::helpers::check_files;
use crate::io::times_match;

/// Extra verification of an output file beyond existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCheck {
    /// the last `Times` entry equals the given WRF time
    LastTime(String),
    /// first and last `Times` entries both equal the given WRF time
    SingleTime(String),
}

/// One file whose presence marks the step as done.
#[derive(Debug, Clone)]
pub struct ExpectedOutput {
    pub path: PathBuf,
    pub check: Option<ContentCheck>,
}

impl ExpectedOutput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ExpectedOutput {
            path: path.into(),
            check: None,
        }
    }

    pub fn with_last_time(path: impl Into<PathBuf>, time: &str) -> Self {
        ExpectedOutput {
            path: path.into(),
            check: Some(ContentCheck::LastTime(time.to_string())),
        }
    }

    pub fn with_single_time(path: impl Into<PathBuf>, time: &str) -> Self {
        ExpectedOutput {
            path: path.into(),
            check: Some(ContentCheck::SingleTime(time.to_string())),
        }
    }

    pub fn is_valid(&self) -> bool {
        if !check_files(&[&self.path]) {
            return false;
        }
        match &self.check {
            None => true,
            Some(ContentCheck::LastTime(time)) => times_match(&self.path, None, time),
            Some(ContentCheck::SingleTime(time)) => times_match(&self.path, Some(time), time),
        }
    }
}

/// What the runner needs to know about a step.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub expected: Vec<ExpectedOutput>,
    /// log pointed at when the outputs are missing after the run
    pub log_path: PathBuf,
}

impl Step {
    pub fn new(name: &str, log_path: impl Into<PathBuf>) -> Self {
        Step {
            name: name.to_string(),
            expected: vec![],
            log_path: log_path.into(),
        }
    }

    pub fn expect(mut self, output: ExpectedOutput) -> Self {
        self.expected.push(output);
        self
    }

    pub fn expect_files<P: AsRef<Path>>(mut self, files: &[P]) -> Self {
        self.expected
            .extend(files.iter().map(|f| ExpectedOutput::file(f.as_ref())));
        self
    }

    /// true when every expected output is present and valid
    pub fn is_complete(&self) -> bool {
        !self.expected.is_empty() && self.expected.iter().all(ExpectedOutput::is_valid)
    }

    pub fn missing(&self) -> Vec<&Path> {
        self.expected
            .iter()
            .filter(|output| !output.is_valid())
            .map(|output| output.path.as_path())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    AlreadyComplete,
    Completed,
}
