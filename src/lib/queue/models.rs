use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Child,
    time::Duration,
};

use log::warn;
use strum_macros::{Display, EnumString};

use crate::constants::POLL_INTERVAL_SECONDS;
use crate::helpers::WrfError;

/// Where the MPI executables run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Backend {
    #[strum(serialize = "local")]
    Local,
    #[strum(serialize = "slurm")]
    Slurm,
    #[strum(serialize = "pbs")]
    Pbs,
}

/// How an executable is started for a number of tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `<launcher> -np <ntasks> <exe>`
    Mpiexec(String),
    /// run the executable as is, the task count is ignored
    Direct,
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::Mpiexec("mpiexec".to_string())
    }
}

/// Cluster settings built once at process start and handed to every step.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub backend: Backend,
    pub queue: Option<String>,
    pub ntasks_per_node: Option<usize>,
    pub launcher: Launcher,
    pub poll_interval: Duration,
    pub job_name: String,
    /// stream the executables output instead of writing it to a log file
    pub verbose: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            backend: Backend::Local,
            queue: None,
            ntasks_per_node: None,
            launcher: Launcher::default(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECONDS),
            job_name: "wrf-scripts".to_string(),
            verbose: false,
        }
    }
}

impl ClusterConfig {
    pub fn local() -> Self {
        Self::default()
    }

    /// Build the configuration for `backend`. Queued backends need
    /// `WRF_SCRIPTS_QUEUE` and `WRF_SCRIPTS_NTASKS_PER_NODE` (the latter can
    /// be overridden on the command line). `WRF_SCRIPTS_MPIEXEC` replaces
    /// the `mpiexec` launcher.
    pub fn from_env(
        backend: Backend,
        ntasks_per_node: Option<usize>,
        env: &HashMap<String, String>,
    ) -> Result<Self, WrfError> {
        let launcher = match env.get("WRF_SCRIPTS_MPIEXEC").map(String::as_str) {
            Some("") | None => Launcher::default(),
            Some("none") => Launcher::Direct,
            Some(cmd) => Launcher::Mpiexec(cmd.to_string()),
        };
        let mut config = ClusterConfig {
            backend,
            launcher,
            ..Default::default()
        };
        if backend == Backend::Local {
            config.ntasks_per_node = ntasks_per_node;
            return Ok(config);
        }

        let queue = env.get("WRF_SCRIPTS_QUEUE").filter(|q| !q.is_empty()).ok_or_else(|| {
            WrfError::environment("Environment WRF_SCRIPTS_QUEUE should be set by you!")
        })?;
        let ntasks_per_node = match ntasks_per_node {
            Some(n) => n,
            None => env
                .get("WRF_SCRIPTS_NTASKS_PER_NODE")
                .ok_or_else(|| {
                    WrfError::environment(
                        "Environment WRF_SCRIPTS_NTASKS_PER_NODE should be set by you!",
                    )
                })?
                .parse::<usize>()
                .map_err(|_| {
                    WrfError::environment("WRF_SCRIPTS_NTASKS_PER_NODE is not a number!")
                })?,
        };
        if ntasks_per_node == 0 {
            return Err(WrfError::environment("ntasks_per_node must be positive!"));
        }
        config.queue = Some(queue.clone());
        config.ntasks_per_node = Some(ntasks_per_node);
        Ok(config)
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Tasks per node for a job of `ntasks`, never more than `ntasks`.
    pub fn tasks_per_node(&self, ntasks: usize) -> usize {
        match self.ntasks_per_node {
            Some(per_node) => per_node.min(ntasks),
            None => ntasks,
        }
    }

    /// Warn once when the run's task count cannot fill one node. Returns
    /// whether the per-node count will be clamped.
    pub fn check_ntasks(&self, ntasks: usize) -> bool {
        match self.ntasks_per_node {
            Some(per_node) if per_node > ntasks => {
                warn!(
                    "ntasks_per_node ({per_node}) is larger than ntasks ({ntasks}), use {ntasks} instead."
                );
                true
            }
            _ => false,
        }
    }
}

/// One invocation of an external executable.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub ntasks: usize,
    pub work_dir: PathBuf,
    /// file whose last line is echoed while the job runs
    pub progress_log: PathBuf,
    /// file receiving stdout and stderr when not verbose
    pub output_log: PathBuf,
}

impl JobRequest {
    pub fn new(program: impl Into<PathBuf>, ntasks: usize, work_dir: &Path) -> Self {
        let program = program.into();
        let stem = program
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("job")
            .to_string();
        JobRequest {
            program,
            args: vec![],
            ntasks: ntasks.max(1),
            work_dir: work_dir.to_path_buf(),
            progress_log: work_dir.join("rsl.error.0000"),
            output_log: work_dir.join(format!("{stem}.out")),
        }
    }

    pub fn with_progress_log(mut self, name: &str) -> Self {
        self.progress_log = self.work_dir.join(name);
        self
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// the command line as a shell would run it
    pub fn command_line(&self, launcher: &Launcher) -> String {
        let mut parts = vec![];
        if let Launcher::Mpiexec(cmd) = launcher {
            parts.push(format!("{cmd} -np {}", self.ntasks));
        }
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// A submitted or started job.
#[derive(Debug)]
pub enum JobHandle {
    Local(Child),
    Queued { backend: Backend, id: String },
}

impl JobHandle {
    pub fn id(&self) -> String {
        match self {
            JobHandle::Local(child) => child.id().to_string(),
            JobHandle::Queued { id, .. } => id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn queued_backends_need_queue_settings() {
        let env = HashMap::new();
        let err = ClusterConfig::from_env(Backend::Slurm, None, &env).unwrap_err();
        assert!(err.message().contains("WRF_SCRIPTS_QUEUE"));

        let env = HashMap::from([
            ("WRF_SCRIPTS_QUEUE".to_string(), "normal".to_string()),
            ("WRF_SCRIPTS_NTASKS_PER_NODE".to_string(), "32".to_string()),
        ]);
        let config = ClusterConfig::from_env(Backend::Pbs, None, &env).unwrap();
        assert_eq!(config.queue.as_deref(), Some("normal"));
        assert_eq!(config.ntasks_per_node, Some(32));

        let config = ClusterConfig::from_env(Backend::Pbs, Some(16), &env).unwrap();
        assert_eq!(config.ntasks_per_node, Some(16));

        assert!(ClusterConfig::from_env(Backend::Local, None, &HashMap::new()).is_ok());
    }

    #[test]
    fn tasks_per_node_is_clamped() {
        let config = ClusterConfig {
            ntasks_per_node: Some(32),
            ..Default::default()
        };
        assert_eq!(config.tasks_per_node(8), 8);
        assert_eq!(config.tasks_per_node(64), 32);
        assert!(config.check_ntasks(8));
        assert!(!config.check_ntasks(64));
    }

    #[test]
    fn command_line_with_launcher() {
        let request = JobRequest::new("/opt/WRF/run/wrf.exe", 4, Path::new("/work/wrf"));
        assert_eq!(
            request.command_line(&Launcher::default()),
            "mpiexec -np 4 /opt/WRF/run/wrf.exe"
        );
        assert_eq!(request.command_line(&Launcher::Direct), "/opt/WRF/run/wrf.exe");
        assert_eq!(request.output_log, PathBuf::from("/work/wrf/wrf.out"));
        assert_eq!(Backend::from_str("slurm").unwrap(), Backend::Slurm);
    }
}
