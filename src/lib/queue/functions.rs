use std::{
    fs::{self, File},
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Once,
    },
    thread,
    time::{Duration, Instant},
};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;

use crate::helpers::{tail_line, WrfError};

use super::models::{Backend, ClusterConfig, JobHandle, JobRequest, Launcher};

lazy_static! {
    static ref INTERRUPTED: AtomicBool = AtomicBool::new(false);
    static ref SBATCH_ID_RE: Regex =
        Regex::new(r"Submitted batch job (\d+)").expect("sbatch regex should compile");
    static ref SLURM_STATE_RE: Regex =
        Regex::new(r"JobState=(\w+)").expect("slurm state regex should compile");
    static ref PBS_STATE_RE: Regex =
        Regex::new(r"job_state\s*=\s*([A-Z])").expect("pbs state regex should compile");
}

static INSTALL_HANDLER: Once = Once::new();

const SLICE: Duration = Duration::from_millis(100);

/// Route Ctrl-C to the running job instead of killing the process outright.
pub fn install_interrupt_handler() {
    INSTALL_HANDLER.call_once(|| {
        let result = ctrlc::set_handler(move || {
            INTERRUPTED.store(true, Ordering::SeqCst);
        });
        if let Err(err) = result {
            warn!("Cannot install the interrupt handler: {err}");
        }
    });
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Batch script for `sbatch`.
pub fn sbatch_script(config: &ClusterConfig, request: &JobRequest) -> String {
    let per_node = config.tasks_per_node(request.ntasks);
    let nodes = request.ntasks.div_ceil(per_node);
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --job-name={}", config.job_name),
    ];
    if let Some(queue) = &config.queue {
        lines.push(format!("#SBATCH --partition={queue}"));
    }
    lines.push(format!("#SBATCH --nodes={nodes}"));
    lines.push(format!("#SBATCH --ntasks={}", request.ntasks));
    lines.push(format!("#SBATCH --ntasks-per-node={per_node}"));
    lines.push(format!("#SBATCH --output={}", request.output_log.display()));
    lines.push("#SBATCH --exclusive".to_string());
    lines.push(String::new());
    lines.push(format!("cd {}", request.work_dir.display()));
    lines.push(request.command_line(&config.launcher));
    lines.join("\n") + "\n"
}

/// Batch script for `qsub`.
pub fn pbs_script(config: &ClusterConfig, request: &JobRequest) -> String {
    let per_node = config.tasks_per_node(request.ntasks);
    let nodes = request.ntasks.div_ceil(per_node);
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#PBS -N {}", config.job_name),
    ];
    if let Some(queue) = &config.queue {
        lines.push(format!("#PBS -q {queue}"));
    }
    lines.push(format!("#PBS -l nodes={nodes}:ppn={per_node}"));
    lines.push("#PBS -j oe".to_string());
    lines.push(format!("#PBS -o {}", request.output_log.display()));
    lines.push(String::new());
    lines.push(format!("cd {}", request.work_dir.display()));
    lines.push(request.command_line(&config.launcher));
    lines.join("\n") + "\n"
}

pub fn parse_sbatch_job_id(output: &str) -> Option<String> {
    SBATCH_ID_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn parse_qsub_job_id(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// `scontrol show job` output describes a job still in the queue.
/// `COMPLETING` counts as active until the epilogue has flushed the logs.
pub fn slurm_job_active(output: &str) -> bool {
    SLURM_STATE_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            matches!(
                m.as_str(),
                "RUNNING" | "PENDING" | "CONFIGURING" | "COMPLETING" | "SUSPENDED" | "REQUEUED"
            )
        })
        .unwrap_or(false)
}

/// `qstat -f` output describes a job queued, running or held
pub fn pbs_job_active(output: &str) -> bool {
    PBS_STATE_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| matches!(m.as_str(), "Q" | "R" | "H"))
        .unwrap_or(false)
}

fn command_output(program: &str, args: &[&str]) -> Result<String, WrfError> {
    debug!("==> {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().map_err(|err| {
        WrfError::environment(format!("Failed to run {program}: {err}"))
    })?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn submit_script(
    config: &ClusterConfig,
    request: &JobRequest,
    program: &str,
    script: String,
    parse: fn(&str) -> Option<String>,
) -> Result<JobHandle, WrfError> {
    let path = request
        .work_dir
        .join(format!("{}.{}", config.job_name, config.backend));
    fs::write(&path, script)?;
    let path = path.display().to_string();
    let output = command_output(program, &[&path])?;
    let id = parse(&output).ok_or_else(|| {
        WrfError::step_failed(format!("Failed to submit {path}: {}", output.trim()))
    })?;
    info!("Submitted job {id} to {}", config.backend);
    Ok(JobHandle::Queued {
        backend: config.backend,
        id,
    })
}

/// Start the job without waiting for it.
pub fn submit(config: &ClusterConfig, request: &JobRequest) -> Result<JobHandle, WrfError> {
    info!("==> {}", request.command_line(&config.launcher));
    match config.backend {
        Backend::Local => {
            let mut command = match &config.launcher {
                Launcher::Mpiexec(launcher) => {
                    let mut parts = launcher.split_whitespace();
                    let program = parts.next().unwrap_or("mpiexec");
                    let mut command = Command::new(program);
                    command.args(parts);
                    command.arg("-np").arg(request.ntasks.to_string());
                    command.arg(&request.program);
                    command
                }
                Launcher::Direct => Command::new(&request.program),
            };
            command.args(&request.args).current_dir(&request.work_dir);
            if !config.verbose {
                let log = File::create(&request.output_log)?;
                command
                    .stdout(Stdio::from(log.try_clone()?))
                    .stderr(Stdio::from(log));
            }
            let child = command.spawn().map_err(|err| {
                WrfError::environment(format!(
                    "Failed to start {}: {err}",
                    request.program.display()
                ))
            })?;
            Ok(JobHandle::Local(child))
        }
        Backend::Slurm => submit_script(
            config,
            request,
            "sbatch",
            sbatch_script(config, request),
            parse_sbatch_job_id,
        ),
        Backend::Pbs => submit_script(
            config,
            request,
            "qsub",
            pbs_script(config, request),
            parse_qsub_job_id,
        ),
    }
}

/// Stop a job, local or queued.
pub fn cancel(handle: &mut JobHandle) -> Result<(), WrfError> {
    match handle {
        JobHandle::Local(child) => {
            child.kill()?;
            let _ = child.wait();
        }
        JobHandle::Queued { backend, id } => {
            let program = match backend {
                Backend::Slurm => "scancel",
                Backend::Pbs => "qdel",
                Backend::Local => return Ok(()),
            };
            command_output(program, &[id.as_str()])?;
        }
    }
    warn!("Cancelled job {}", handle.id());
    Ok(())
}

fn still_running(handle: &mut JobHandle) -> Result<bool, WrfError> {
    match handle {
        JobHandle::Local(child) => Ok(child.try_wait()?.is_none()),
        JobHandle::Queued {
            backend: Backend::Slurm,
            id,
        } => Ok(slurm_job_active(&command_output(
            "scontrol",
            &["show", "job", id.as_str()],
        )?)),
        JobHandle::Queued {
            backend: Backend::Pbs,
            id,
        } => Ok(pbs_job_active(&command_output("qstat", &["-f", id.as_str()])?)),
        JobHandle::Queued { .. } => Ok(false),
    }
}

/// Block until the job leaves the running state, echoing the last line of
/// the progress log every poll interval. The outcome of the job is judged
/// by its outputs, not by its exit status.
pub fn wait(
    config: &ClusterConfig,
    request: &JobRequest,
    handle: &mut JobHandle,
) -> Result<(), WrfError> {
    let mut last_poll = Instant::now();
    let mut last_line: Option<String> = None;
    loop {
        if interrupted() {
            cancel(handle)?;
            INTERRUPTED.store(false, Ordering::SeqCst);
            return Err(WrfError::cancelled("Ended by user!"));
        }
        // the local child is checked every slice, queued jobs once per poll
        let due = last_poll.elapsed() >= config.poll_interval;
        let check = matches!(handle, JobHandle::Local(_)) || due;
        if check && !still_running(handle)? {
            break;
        }
        if due {
            last_poll = Instant::now();
            let line = tail_line(&request.progress_log);
            if line.is_some() && line != last_line {
                info!("==> {}", line.as_deref().unwrap_or_default());
                last_line = line;
            }
        }
        thread::sleep(SLICE);
    }
    debug!("Job {} finished", handle.id());
    Ok(())
}

/// Submit the job and wait for it.
pub fn run_job(config: &ClusterConfig, request: &JobRequest) -> Result<(), WrfError> {
    install_interrupt_handler();
    let mut handle = submit(config, request)?;
    wait(config, request, &mut handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn cluster(backend: Backend) -> ClusterConfig {
        ClusterConfig {
            backend,
            queue: Some("normal".to_string()),
            ntasks_per_node: Some(4),
            ..Default::default()
        }
        .with_job_name("wrf")
    }

    #[test]
    fn renders_slurm_script() {
        let request = JobRequest::new("/opt/WRF/run/wrf.exe", 10, Path::new("/work/wrf"));
        let script = sbatch_script(&cluster(Backend::Slurm), &request);
        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=wrf\n"));
        assert!(script.contains("#SBATCH --partition=normal\n"));
        assert!(script.contains("#SBATCH --nodes=3\n"));
        assert!(script.contains("#SBATCH --ntasks=10\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=4\n"));
        assert!(script.contains("cd /work/wrf\nmpiexec -np 10 /opt/WRF/run/wrf.exe\n"));
    }

    #[test]
    fn renders_pbs_script_with_clamped_tasks() {
        let request = JobRequest::new("/opt/WRF/run/real.exe", 2, Path::new("/work/wrf"));
        let script = pbs_script(&cluster(Backend::Pbs), &request);
        assert!(script.contains("#PBS -N wrf\n"));
        assert!(script.contains("#PBS -q normal\n"));
        assert!(script.contains("#PBS -l nodes=1:ppn=2\n"));
    }

    #[test]
    fn parses_scheduler_output() {
        assert_eq!(
            parse_sbatch_job_id("Submitted batch job 123456\n").as_deref(),
            Some("123456")
        );
        assert_eq!(parse_sbatch_job_id("error: invalid partition"), None);
        assert_eq!(
            parse_qsub_job_id("\n4242.pbs-server\n").as_deref(),
            Some("4242.pbs-server")
        );

        assert!(slurm_job_active("JobId=1 JobName=wrf\n   JobState=PENDING Reason=None"));
        assert!(slurm_job_active("   JobState=RUNNING Reason=None"));
        assert!(!slurm_job_active("   JobState=COMPLETED Reason=None"));
        assert!(slurm_job_active("   JobState=COMPLETING Reason=None"));
        assert!(slurm_job_active("   JobState=SUSPENDED Reason=None"));
        assert!(slurm_job_active("   JobState=REQUEUED Reason=None"));
        assert!(!slurm_job_active("   JobState=FAILED Reason=NonZeroExitCode"));
        assert!(!slurm_job_active("slurm_load_jobs error: Invalid job id specified"));

        assert!(pbs_job_active("Job Id: 4242\n    job_state = R\n"));
        assert!(pbs_job_active("    job_state = Q"));
        assert!(!pbs_job_active("    job_state = C"));
    }

    #[test]
    fn runs_local_job_and_echoes_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = dir.path().join("fake.exe");
        fs::write(
            &exe,
            "#!/bin/sh\necho 'Timing for main' > rsl.error.0000\necho done > out.txt\n",
        )
        .unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

        let config = ClusterConfig::local()
            .with_launcher(Launcher::Direct)
            .with_poll_interval(Duration::from_millis(50));
        let request = JobRequest::new(&exe, 1, dir.path());
        run_job(&config, &request).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "done\n");
        assert!(request.output_log.exists());
    }

    #[test]
    fn missing_executable_is_an_environment_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ClusterConfig::local().with_launcher(Launcher::Direct);
        let request = JobRequest::new(dir.path().join("missing.exe"), 1, dir.path());
        let err = run_job(&config, &request).unwrap_err();
        assert_eq!(err.kind(), crate::helpers::ErrorKind::Environment);
    }
}
