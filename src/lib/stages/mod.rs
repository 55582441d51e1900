//! One function per WRF family operation. `config_*` functions write a
//! namelist into the stage directory, `run_*` functions go through the step
//! runner and skip work whose outputs already exist.

mod fso;
mod wps;
mod wrf;
mod wrfda;
mod wrfplus;

use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};
use log::info;

use crate::config::{Config, Root, Settings};
use crate::helpers::{ensure_dir, WrfError};
use crate::namelist::Namelist;
use crate::queue::{run_job, ClusterConfig, JobRequest};

pub use fso::{
    add_init_sens, forecast_error, prepare_analysis_forecast, run_sensitivity, write_final_sens,
};
pub use wps::{
    background_times, config_wps, grib_link_name, render_pattern, run_wps_geogrid,
    run_wps_ungrib_metgrid, BackgroundTemplate,
};
pub use wrf::{config_wrf, run_real, run_wrf};
pub use wrfda::{
    config_wrfda, config_wrfda_sens, run_wrfda_3dvar, run_wrfda_obsproc, run_wrfda_update_bc,
    BoundaryMode,
};
pub use wrfplus::{config_wrfplus, run_wrfplus_ad};

/// Everything a stage needs besides the configuration.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub settings: Settings,
    pub cluster: ClusterConfig,
    pub work_root: PathBuf,
    /// MPI tasks for the parallel executables
    pub ntasks: usize,
    pub force: bool,
}

impl RunContext {
    pub fn new(settings: Settings, cluster: ClusterConfig, work_root: PathBuf) -> Self {
        RunContext {
            settings,
            cluster,
            work_root,
            ntasks: crate::constants::DEFAULT_NUM_PROC,
            force: false,
        }
    }

    pub fn with_ntasks(mut self, ntasks: usize) -> Self {
        self.ntasks = ntasks.max(1);
        self.cluster.check_ntasks(self.ntasks);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The same run rooted at another directory.
    pub fn with_work_root(&self, work_root: impl Into<PathBuf>) -> RunContext {
        RunContext {
            work_root: work_root.into(),
            ..self.clone()
        }
    }

    pub fn root(&self, root: Root) -> Result<PathBuf, WrfError> {
        self.settings.root(root)
    }

    /// `<work_root>/<name>`, created when missing
    pub fn stage_dir(&self, name: &str) -> Result<PathBuf, WrfError> {
        let dir = self.work_root.join(name);
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Run `program` in `work_dir` through the job queue.
    pub fn execute(
        &self,
        program: &Path,
        ntasks: usize,
        work_dir: &Path,
        progress_log: &str,
    ) -> Result<(), WrfError> {
        let request = JobRequest::new(program, ntasks, work_dir).with_progress_log(progress_log);
        run_job(&self.cluster, &request)
    }
}

/// `d01`, `d02`, ... for a 0-based domain index
pub fn dom_name(dom_idx: usize) -> String {
    format!("d{:02}", dom_idx + 1)
}

/// `time_control` start/end fields shared by WRF, WRFDA and WRFPLUS.
pub(crate) fn set_time_control(namelist: &mut Namelist, config: &Config) {
    let n = config.max_dom();
    let per_domain = |v: u32| vec![v as i64; n];
    let (start, end) = (config.start_time, config.end_time);
    let group = namelist.group_mut("time_control");
    group.set("run_hours", config.forecast_hours);
    group.set("start_year", per_domain(start.year() as u32));
    group.set("start_month", per_domain(start.month()));
    group.set("start_day", per_domain(start.day()));
    group.set("start_hour", per_domain(start.hour()));
    group.set("end_year", per_domain(end.year() as u32));
    group.set("end_month", per_domain(end.month()));
    group.set("end_day", per_domain(end.day()));
    group.set("end_hour", per_domain(end.hour()));
}

/// Apply the configuration section `name` to the namelist group of the
/// same name, when configured.
pub(crate) fn apply_section(
    namelist: &mut Namelist,
    config: &Config,
    name: &str,
) -> Result<(), WrfError> {
    if let Some(section) = config.section(name) {
        namelist.apply(name, section)?;
    }
    Ok(())
}

/// Copy a template namelist from a tool tree and parse it.
pub(crate) fn read_template(path: &Path) -> Result<Namelist, WrfError> {
    info!("Edit namelist from {}.", path.display());
    Namelist::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn time_control_for_each_domain() {
        let config = Config::load(
            r#"{"domains": {"max_dom": 2, "dx": [9000, 3000], "dy": [9000, 3000],
                "e_we": [100, 91], "e_sn": [100, 91], "e_vert": 30,
                "i_parent_start": [1, 30], "j_parent_start": [1, 30]},
                "custom": {"start_time": "2019060112", "forecast_hours": 18}}"#,
        )
        .unwrap();
        let mut namelist = Namelist::new();
        set_time_control(&mut namelist, &config);
        assert_eq!(
            namelist.get("time_control", "end_day").map(|v| v.to_string()),
            Some("2, 2".to_string())
        );
        assert_eq!(
            namelist.get("time_control", "start_hour").map(|v| v.to_string()),
            Some("12, 12".to_string())
        );
        assert_eq!(dom_name(1), "d02");
    }
}
