#![allow(dead_code)]

use std::collections::HashMap;
use std::env::{set_var, var, vars};
use std::path::PathBuf;
use std::process::exit;

use chrono::Utc;
use clap::Args;
use log::info;
use wrf_scripts::{
    config::{Config, Root, Settings},
    constants::DEFAULT_NUM_PROC,
    helpers::WrfError,
    queue::{Backend, ClusterConfig},
    stages::RunContext,
};

/// Tool and data directories. Each falls back to its environment variable,
/// then to the `custom` config section, then to a subdirectory of `--codes`.
#[derive(Args, Debug)]
pub struct RootArgs {
    #[arg(short = 'c', long, help = "Root directory of all codes (e.g. WRF, WPS)")]
    pub codes: Option<PathBuf>,

    #[arg(long, help = "WRF root directory (e.g. WRFV3 or WRF)")]
    pub wrf_root: Option<PathBuf>,

    #[arg(long, help = "WPS root directory (e.g. WPS)")]
    pub wps_root: Option<PathBuf>,

    #[arg(long, help = "WRFDA root directory (e.g. WRFDA)")]
    pub wrfda_root: Option<PathBuf>,

    #[arg(long, help = "WRFPLUS root directory (e.g. WRFPLUS)")]
    pub wrfplus_root: Option<PathBuf>,

    #[arg(short = 'g', long, help = "GEOG data root directory (e.g. WPS_GEOG)")]
    pub geog_root: Option<PathBuf>,

    #[arg(short = 'b', long, help = "Background root directory")]
    pub bkg_root: Option<PathBuf>,

    #[arg(short = 'l', long, help = "LITTLE_R data root directory")]
    pub littler_root: Option<PathBuf>,

    #[arg(short = 'p', long, help = "PrepBUFR data root directory")]
    pub prepbufr_root: Option<PathBuf>,

    #[arg(short = 'w', long, help = "Work root directory")]
    pub work_root: Option<PathBuf>,
}

impl RootArgs {
    pub fn settings(&self, env: HashMap<String, String>) -> Settings {
        Settings::new(env)
            .with_codes(self.codes.clone())
            .with_cli(Root::Wrf, self.wrf_root.clone())
            .with_cli(Root::Wps, self.wps_root.clone())
            .with_cli(Root::Wrfda, self.wrfda_root.clone())
            .with_cli(Root::Wrfplus, self.wrfplus_root.clone())
            .with_cli(Root::Geog, self.geog_root.clone())
            .with_cli(Root::Bkg, self.bkg_root.clone())
            .with_cli(Root::Littler, self.littler_root.clone())
            .with_cli(Root::Prepbufr, self.prepbufr_root.clone())
            .with_cli(Root::Work, self.work_root.clone())
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub roots: RootArgs,

    #[arg(short = 'j', long, required = true, help = "Configuration JSON file or text")]
    pub config_json: String,

    #[arg(short = 'n', long, default_value_t = DEFAULT_NUM_PROC, help = "MPI process number to run WRF")]
    pub num_proc: usize,

    #[arg(long, help = "Use SLURM job management system to run MPI jobs")]
    pub slurm: bool,

    #[arg(long, conflicts_with = "slurm", help = "Use PBS job management system to run MPI jobs")]
    pub pbs: bool,

    #[arg(long, help = "MPI processes per node of the job queue")]
    pub ntasks_per_node: Option<usize>,

    #[arg(short = 'v', long, help = "Print out work log")]
    pub verbose: bool,

    #[arg(short = 'f', long, help = "Force to run")]
    pub force: bool,
}

impl RunArgs {
    pub fn backend(&self) -> Backend {
        if self.slurm {
            Backend::Slurm
        } else if self.pbs {
            Backend::Pbs
        } else {
            Backend::Local
        }
    }

    /// Configuration and run context, resolved once for the whole process.
    pub fn load(&self) -> Result<(Config, RunContext), WrfError> {
        let config = Config::load(&self.config_json)?;
        let env: HashMap<String, String> = vars().collect();
        let cluster = ClusterConfig::from_env(self.backend(), self.ntasks_per_node, &env)?
            .with_job_name(config.tag.clone())
            .with_verbose(self.verbose);
        let settings = self.roots.settings(env).with_config(&config);
        let work_root = settings.work_root()?;
        let ctx = RunContext::new(settings, cluster, work_root)
            .with_ntasks(self.num_proc)
            .with_force(self.force);
        Ok((config, ctx))
    }
}

pub fn init_logger() {
    if var("RUST_LOG").is_err() {
        set_var("RUST_LOG", "info")
    }
    pretty_env_logger::init();
}

/// Run the body of a binary. Fatal errors are printed and end the process
/// with exit code 1.
pub fn run_main<F>(name: &str, run: F)
where
    F: FnOnce() -> Result<(), WrfError>,
{
    init_logger();
    let start_time = Utc::now();
    if let Err(err) = run() {
        println!("[Error]: {err}");
        exit(1);
    }
    let elapsed_time = Utc::now() - start_time;
    info!("{name} done. Elapsed time: {} seconds", elapsed_time.num_seconds());
}
