use std::{fs, path::Path};

use log::{debug, info};
use regex::{NoExpand, Regex, RegexBuilder};

use crate::helpers::WrfError;

#[derive(Debug, Clone)]
struct Patch {
    pattern: Regex,
    replacement: String,
    literal: bool,
}

impl Patch {
    fn apply(&self, line: &str) -> String {
        if self.literal {
            self.pattern
                .replace_all(line, NoExpand(&self.replacement))
                .into_owned()
        } else {
            self.pattern
                .replace_all(line, self.replacement.as_str())
                .into_owned()
        }
    }
}

/// Ordered line substitutions applied to a vendor file. Patterns are
/// case-insensitive and the first matching pattern wins on each line.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
    return_on_first_match: bool,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, pattern: &str, replacement: &str, literal: bool) -> Result<Self, WrfError> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|err| WrfError::config(format!("Invalid patch pattern {pattern}: {err}")))?;
        self.patches.push(Patch {
            pattern,
            replacement: replacement.to_string(),
            literal,
        });
        Ok(self)
    }

    /// `replacement` may refer to capture groups as `$1` or `${name}`
    pub fn add(self, pattern: &str, replacement: &str) -> Result<Self, WrfError> {
        self.push(pattern, replacement, false)
    }

    /// `replacement` is inserted verbatim
    pub fn add_literal(self, pattern: &str, replacement: &str) -> Result<Self, WrfError> {
        self.push(pattern, replacement, true)
    }

    /// Stop substituting after the first line that matched any pattern.
    pub fn return_on_first_match(mut self) -> Self {
        self.return_on_first_match = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Returns the patched text and the number of changed lines.
    pub fn apply_text(&self, text: &str) -> (String, usize) {
        let mut output = String::with_capacity(text.len());
        let mut matched = 0;
        for line in text.split_inclusive('\n') {
            if self.return_on_first_match && matched > 0 {
                output.push_str(line);
                continue;
            }
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            match self.patches.iter().find(|p| p.pattern.is_match(body)) {
                Some(patch) => {
                    output.push_str(&patch.apply(body));
                    output.push_str(newline);
                    matched += 1;
                }
                None => output.push_str(line),
            }
        }
        (output, matched)
    }

    /// Patch a file in place. A file that cannot be read or written is a
    /// fatal error, a partially configured tree is worse than none.
    pub fn apply_file(&self, path: impl AsRef<Path>) -> Result<usize, WrfError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            WrfError::precondition(format!("Failed to edit file {}! {err}", path.display()))
        })?;
        let (patched, matched) = self.apply_text(&text);
        if matched > 0 {
            fs::write(path, patched).map_err(|err| {
                WrfError::precondition(format!("Failed to edit file {}! {err}", path.display()))
            })?;
            info!("Patched {} line(s) of {}", matched, path.display());
        } else {
            debug!("No line of {} matched", path.display());
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pattern_wins_per_line() {
        let patches = PatchSet::new()
            .add("dm_cc\\s*=\\s*mpicc\\s*$", "DM_CC = mpicc -DMPI2_SUPPORT")
            .unwrap()
            .add("mpicc", "never")
            .unwrap();
        let (text, matched) = patches.apply_text("DM_CC = mpicc\nSFC = gfortran\nCC = mpicc\n");
        assert_eq!(matched, 2);
        assert_eq!(
            text,
            "DM_CC = mpicc -DMPI2_SUPPORT\nSFC = gfortran\nCC = never\n"
        );
    }

    #[test]
    fn return_on_first_match_patches_one_line() {
        let source = "if (iand(i,i-1)/=0) then\nx\nif (iand(i,i-1)/=0) then\n";
        let mut text = source.to_string();
        for suffix in ["_8", "_4"] {
            let patches = PatchSet::new()
                .add_literal(r"iand\(i,i-1\)/=0", &format!("iand(i,i-1{suffix})/=0"))
                .unwrap()
                .return_on_first_match();
            text = patches.apply_text(&text).0;
        }
        assert_eq!(
            text,
            "if (iand(i,i-1_8)/=0) then\nx\nif (iand(i,i-1_4)/=0) then\n"
        );
    }

    #[test]
    fn capture_groups_and_missing_file() {
        let patches = PatchSet::new().add(r"^(\s*)NETCDF\s*=.*$", "${1}NETCDF = /opt/nc").unwrap();
        let (text, _) = patches.apply_text("  netcdf = /usr");
        assert_eq!(text, "  NETCDF = /opt/nc");

        let err = patches.apply_file("/nonexistent/configure.wrf").unwrap_err();
        assert!(err.message().contains("Failed to edit file"));
    }
}
