mod functions;
mod models;

pub use functions::{
    cancel, install_interrupt_handler, interrupted, parse_qsub_job_id, parse_sbatch_job_id,
    pbs_job_active, pbs_script, run_job, sbatch_script, slurm_job_active, submit, wait,
};
pub use models::{Backend, ClusterConfig, JobHandle, JobRequest, Launcher};
