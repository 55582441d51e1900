use std::{
    io::{Read, Write},
    path::PathBuf,
};

use log::debug;
use regex::Regex;
use strum_macros::{Display, EnumString};

use crate::config::Root;
use crate::helpers::WrfError;
use crate::namelist::PatchSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CompilerSuite {
    Gnu,
    Intel,
    Pgi,
}

/// Members of the model family that are built from source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Tool {
    #[strum(serialize = "WRF")]
    Wrf,
    #[strum(serialize = "WPS")]
    Wps,
    #[strum(serialize = "WRFPLUS")]
    Wrfplus,
    #[strum(serialize = "WRFDA")]
    Wrfda,
}

impl Tool {
    pub fn root(&self) -> Root {
        match self {
            Tool::Wrf => Root::Wrf,
            Tool::Wps => Root::Wps,
            Tool::Wrfplus => Root::Wrfplus,
            Tool::Wrfda => Root::Wrfda,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub suite: CompilerSuite,
    pub force: bool,
    pub verbose: bool,
    /// hybrid vertical coordinate
    pub use_hyb: bool,
    /// GRIB2 output from WRF
    pub use_grib: bool,
    pub openmp: bool,
    pub debug: bool,
}

impl BuildOptions {
    pub fn new(suite: CompilerSuite) -> Self {
        BuildOptions {
            suite,
            force: false,
            verbose: false,
            use_hyb: false,
            use_grib: false,
            openmp: false,
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Interaction {
    prompt: Regex,
    response: String,
}

/// Expected prompts of an interactive installer and the line typed in
/// answer to each, in order.
#[derive(Debug, Clone, Default)]
pub struct InteractionScript {
    interactions: Vec<Interaction>,
}

impl InteractionScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(mut self, prompt: &str, response: &str) -> Result<Self, WrfError> {
        let prompt = Regex::new(prompt)
            .map_err(|err| WrfError::config(format!("Invalid prompt {prompt}: {err}")))?;
        self.interactions.push(Interaction {
            prompt,
            response: response.to_string(),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Answer every prompt as it shows up on `output`, then drain `output`
    /// until the installer closes it. Returns everything the installer
    /// printed.
    pub fn drive<R: Read, W: Write>(&self, mut output: R, mut input: W) -> Result<String, WrfError> {
        let mut transcript = String::new();
        let mut pending = String::new();
        let mut next = 0;
        let mut buf = [0u8; 4096];
        loop {
            if let Some(interaction) = self.interactions.get(next) {
                if let Some(m) = interaction.prompt.find(&pending) {
                    debug!("Answer {} to {:?}", interaction.response, m.as_str());
                    writeln!(input, "{}", interaction.response)?;
                    input.flush()?;
                    pending.drain(..m.end());
                    next += 1;
                    continue;
                }
            }
            let n = output.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = String::from_utf8_lossy(&buf[..n]);
            transcript.push_str(&chunk);
            pending.push_str(&chunk);
        }
        if let Some(interaction) = self.interactions.get(next) {
            return Err(WrfError::step_failed(format!(
                "Installer ended before asking {}!",
                interaction.prompt.as_str()
            )));
        }
        Ok(transcript)
    }
}

/// Everything needed to build one tool: configure answers, source patches
/// and the executables whose presence means the tool is built.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub tool: Tool,
    pub root: PathBuf,
    pub configure_args: Vec<String>,
    pub script: InteractionScript,
    /// patches applied before `configure`
    pub source_patches: Vec<(PathBuf, PatchSet)>,
    /// patches applied to the files `configure` writes
    pub configure_patches: Vec<(PathBuf, PatchSet)>,
    pub compile_target: Option<String>,
    pub expected: Vec<PathBuf>,
}

impl BuildPlan {
    pub fn compile_log(&self) -> PathBuf {
        self.root.join("compile.out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn answers_prompts_in_order() {
        let script = InteractionScript::new()
            .expect(r"Enter selection.*", "34")
            .unwrap()
            .expect(r"Compile for nesting.*:", "1")
            .unwrap();
        let output = "checking for perl5... no\n\
                      Enter selection [1-75] : ------\n\
                      Compile for nesting? (1=basic, 2=preset moves, 3=vortex following) [default 1]: \n\
                      Configuration successful!\n";
        let mut input = vec![];
        let transcript = script.drive(output.as_bytes(), &mut input).unwrap();
        assert_eq!(String::from_utf8(input).unwrap(), "34\n1\n");
        assert!(transcript.ends_with("Configuration successful!\n"));
    }

    #[test]
    fn missing_prompt_fails() {
        let script = InteractionScript::new()
            .expect(r"Enter selection.*", "3")
            .unwrap();
        let mut input = vec![];
        let err = script
            .drive("*** Unable to find NETCDF ***\n".as_bytes(), &mut input)
            .unwrap_err();
        assert!(err.message().contains("Enter selection"));
        assert!(input.is_empty());
    }

    #[test]
    fn parses_compiler_suite() {
        assert_eq!(CompilerSuite::from_str("gnu").unwrap(), CompilerSuite::Gnu);
        assert_eq!(CompilerSuite::Intel.to_string(), "intel");
        assert!(CompilerSuite::from_str("cray").is_err());
    }
}
