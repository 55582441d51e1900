//! Straight-line sequences of stages. A stage only starts once the stage
//! before it has succeeded; the first failure stops the sequence.

use std::path::Path;

use chrono::{Duration, Utc};
use log::{info, warn};

use crate::config::{Config, Root};
use crate::constants::{CYCLE_DIR_FORMAT, CYCLE_HOURS};
use crate::helpers::{link, tool_version, Version, WrfError};
use crate::stages::{
    config_wps, config_wrf, config_wrfda, config_wrfplus, dom_name, prepare_analysis_forecast,
    run_real, run_sensitivity, run_wps_geogrid, run_wps_ungrib_metgrid, run_wrf, run_wrfda_3dvar,
    run_wrfda_obsproc, run_wrfda_update_bc, run_wrfplus_ad, write_final_sens, BoundaryMode,
    RunContext,
};

type StageFn<'a> = Box<dyn FnOnce() -> Result<(), WrfError> + 'a>;

/// Outcome of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub name: String,
    /// stages that ran to completion, in order
    pub executed: Vec<String>,
    /// the stage that stopped the pipeline and its error
    pub failure: Option<(String, WrfError)>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<Vec<String>, WrfError> {
        match self.failure {
            None => Ok(self.executed),
            Some((stage, err)) => Err(WrfError::new(
                err.kind(),
                format!("Stage {stage} failed: {}", err.message()),
            )),
        }
    }
}

pub struct Pipeline<'a> {
    name: String,
    stages: Vec<(String, StageFn<'a>)>,
}

impl<'a> Pipeline<'a> {
    pub fn new(name: &str) -> Self {
        Pipeline {
            name: name.to_string(),
            stages: vec![],
        }
    }

    /// Append a stage. Whatever the stage returns on success is dropped.
    pub fn stage<T, F>(mut self, name: &str, run: F) -> Self
    where
        F: FnOnce() -> Result<T, WrfError> + 'a,
    {
        self.stages
            .push((name.to_string(), Box::new(move || run().map(|_| ()))));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn run(self) -> PipelineReport {
        let total = self.stages.len();
        let start_time = Utc::now();
        let mut executed = vec![];
        for (i, (name, run)) in self.stages.into_iter().enumerate() {
            info!("[{}] ({}/{total}) {name}", self.name, i + 1);
            if let Err(err) = run() {
                warn!("[{}] Stopped at {name}.", self.name);
                return PipelineReport {
                    name: self.name,
                    executed,
                    failure: Some((name, err)),
                };
            }
            executed.push(name);
        }
        let elapsed_time = Utc::now() - start_time;
        info!(
            "[{}] Done. Elapsed time: {} seconds",
            self.name,
            elapsed_time.num_seconds()
        );
        PipelineReport {
            name: self.name,
            executed,
            failure: None,
        }
    }
}

/// Conventional assimilation of every domain, lateral boundary update of
/// `d01`. `first_guess` gives the optional first guess of a domain.
fn assimilation_stages<'a>(
    mut pipeline: Pipeline<'a>,
    ctx: &'a RunContext,
    config: &Config,
    first_guess: impl Fn(usize) -> Option<std::path::PathBuf>,
) -> Pipeline<'a> {
    for dom_idx in 0..config.max_dom() {
        let mut dom_config = config.clone();
        dom_config.run_wrfda_on_dom = dom_idx;
        let dom = dom_name(dom_idx);
        let fg = first_guess(dom_idx);

        let c = dom_config.clone();
        pipeline = pipeline.stage(&format!("config_wrfda {dom}"), move || {
            config_wrfda(ctx, &c, None)
        });
        if dom_config.wrfda.ob_format == 2 {
            let c = dom_config.clone();
            pipeline = pipeline.stage(&format!("obsproc {dom}"), move || {
                run_wrfda_obsproc(ctx, &c)
            });
        }
        let c = dom_config.clone();
        pipeline = pipeline.stage(&format!("3dvar {dom}"), move || {
            run_wrfda_3dvar(ctx, &c, None, fg.as_deref())
        });
        if dom_idx == 0 {
            let c = dom_config;
            pipeline = pipeline.stage("update_bc d01", move || {
                run_wrfda_update_bc(ctx, &c, BoundaryMode::Lateral, None)
            });
        }
    }
    pipeline
}

/// Forecast from a fresh background with conventional assimilation.
pub fn cold_start<'a>(ctx: &'a RunContext, config: &'a Config) -> Pipeline<'a> {
    let wps_dir = ctx.work_root.join("wps");
    let pipeline = Pipeline::new("cold-start")
        .stage("config_wps", move || config_wps(ctx, config))
        .stage("geogrid", move || run_wps_geogrid(ctx, config))
        .stage("ungrib_metgrid", move || run_wps_ungrib_metgrid(ctx, config))
        .stage("config_wrf", move || config_wrf(ctx, config))
        .stage("real", move || run_real(ctx, config, &wps_dir));
    assimilation_stages(pipeline, ctx, config, |_| None)
        .stage("wrf", move || run_wrf(ctx, config))
}

/// `<work_root>/<YYYYMMDDHH>` of a cycle
pub fn cycle_dir(work_root: &Path, start_time: chrono::DateTime<Utc>) -> std::path::PathBuf {
    work_root.join(start_time.format(CYCLE_DIR_FORMAT).to_string())
}

/// Forecast of the previous cycle valid at the start of this one, when it
/// exists. Without it the domain starts from the `real.exe` output.
pub fn previous_cycle_first_guess(
    work_root: &Path,
    config: &Config,
    dom_idx: usize,
) -> Option<std::path::PathBuf> {
    let previous = cycle_dir(work_root, config.start_time - Duration::hours(CYCLE_HOURS));
    let wrfout = previous.join(format!(
        "wrf/wrfout_{}_{}",
        dom_name(dom_idx),
        crate::config::time::wrf_time(&config.start_time)
    ));
    if wrfout.is_file() {
        info!("Use {} as first guess.", wrfout.display());
        Some(wrfout)
    } else {
        None
    }
}

/// Radar assimilation on `d01` on top of the conventional analysis.
pub fn radar_pass_config(config: &Config) -> Config {
    let mut radar_config = config.clone();
    radar_config.run_wrfda_on_dom = 0;
    radar_config.apply_radar_overrides();
    radar_config
}

/// One cycle of the 3-hour cycling run in `<work_root>/<YYYYMMDDHH>`.
/// Geogrid output is shared from `<work_root>/wps`; the forecast of the
/// previous cycle, when present, is the first guess.
pub fn warm_cycle<'a>(
    ctx: &'a RunContext,
    cycle_ctx: &'a RunContext,
    config: &'a Config,
) -> Pipeline<'a> {
    let cycle_wps_dir = cycle_ctx.work_root.join("wps");
    let shared_wps_dir = ctx.work_root.join("wps");

    let radar_config = radar_pass_config(config);
    let radar_config_3dvar = radar_config.clone();

    let pipeline = Pipeline::new("3hr-cycle")
        .stage("config_wps", move || config_wps(ctx, config))
        .stage("geogrid", move || run_wps_geogrid(ctx, config))
        .stage("config_wps cycle", move || config_wps(cycle_ctx, config))
        .stage("link geo_em", {
            let cycle_wps_dir = cycle_wps_dir.clone();
            move || -> Result<(), WrfError> {
                for i in 0..config.max_dom() {
                    let geo_em = format!("geo_em.{}.nc", dom_name(i));
                    link(shared_wps_dir.join(&geo_em), cycle_wps_dir.join(&geo_em))?;
                }
                Ok(())
            }
        })
        .stage("ungrib_metgrid", move || run_wps_ungrib_metgrid(cycle_ctx, config))
        .stage("config_wrf", move || config_wrf(cycle_ctx, config))
        .stage("real", move || run_real(cycle_ctx, config, &cycle_wps_dir));

    let work_root = ctx.work_root.clone();
    let first_guess =
        move |dom_idx: usize| previous_cycle_first_guess(&work_root, config, dom_idx);
    assimilation_stages(pipeline, cycle_ctx, config, first_guess)
        .stage("config_wrfda radar", move || {
            config_wrfda(cycle_ctx, &radar_config, None)
        })
        .stage("3dvar radar", move || {
            run_wrfda_3dvar(cycle_ctx, &radar_config_3dvar, None, None)
        })
        .stage("wrf", move || run_wrf(cycle_ctx, config))
}

/// FSO needs a WRF release whose tangent linear and adjoint pass the tests.
pub fn check_fso_version(ctx: &RunContext) -> Result<(), WrfError> {
    let version = tool_version(ctx.root(Root::Wrf)?)?;
    if version >= Version::new(4, 0, 0) {
        return Err(WrfError::environment(
            "WRFPLUS 4.0 does not pass tangent and adjoint tests!",
        ));
    }
    let tested = [
        Version::new(3, 6, 1),
        Version::new(3, 8, 1),
        Version::new(3, 9, 1),
    ];
    if !tested.contains(&version) {
        return Err(WrfError::environment(
            "Only WRF 3.6.1, 3.8.1 and 3.9.1 have been tested for FSO application!",
        ));
    }
    Ok(())
}

/// Contexts and windows of the FSO branches, all under one work root.
pub struct FsoBranches {
    pub fb: RunContext,
    pub fa: RunContext,
    pub reference: RunContext,
    /// background forecast started 6 hours before the analysis
    pub spinup: Config,
    /// reference analysis at the verification time
    pub verification: Config,
}

impl FsoBranches {
    pub fn new(ctx: &RunContext, config: &Config) -> Self {
        FsoBranches {
            fb: ctx.with_work_root(ctx.work_root.join("fb")),
            fa: ctx.with_work_root(ctx.work_root.join("fa")),
            reference: ctx.with_work_root(ctx.work_root.join("ref")),
            spinup: config.with_window(
                config.start_time - Duration::hours(6),
                config.forecast_hours + 6,
            ),
            verification: config.with_window(config.end_time, 0),
        }
    }
}

pub fn fso<'a>(ctx: &'a RunContext, branches: &'a FsoBranches, config: &'a Config) -> Pipeline<'a> {
    let FsoBranches {
        fb,
        fa,
        reference,
        spinup,
        verification,
    } = branches;
    let wps_dir = ctx.work_root.join("wps");
    let ref_wps_dir = reference.work_root.join("wps");
    let xt = reference.work_root.join(format!(
        "wrf/wrfinput_d01_{}",
        crate::config::time::wrf_time(&config.end_time)
    ));
    let xt_fb = xt.clone();

    let mut pipeline = Pipeline::new("fso")
        .stage("check version", move || check_fso_version(ctx))
        .stage("config_wps", move || config_wps(ctx, config))
        .stage("geogrid", move || run_wps_geogrid(ctx, config))
        // forecast from xb
        .stage("config_wps spinup", move || config_wps(ctx, spinup))
        .stage("ungrib_metgrid spinup", move || run_wps_ungrib_metgrid(ctx, spinup))
        .stage("config_wrf fb", move || config_wrf(fb, spinup))
        .stage("real fb", {
            let wps_dir = wps_dir.clone();
            move || run_real(fb, spinup, &wps_dir)
        })
        .stage("wrf fb", move || run_wrf(fb, spinup))
        // forecast from xa
        .stage("prepare fa", move || {
            prepare_analysis_forecast(&ctx.work_root, config, ctx.force)
        })
        .stage("config_wrfda fa", move || config_wrfda(fa, config, None));
    if config.wrfda.ob_format == 2 {
        pipeline = pipeline.stage("obsproc fa", move || run_wrfda_obsproc(fa, config));
    }
    pipeline
        .stage("3dvar fa", move || run_wrfda_3dvar(fa, config, None, None))
        .stage("update_bc fa", move || {
            run_wrfda_update_bc(fa, config, BoundaryMode::Lateral, None)
        })
        .stage("config_wrf fa", move || config_wrf(fa, config))
        .stage("wrf fa", move || run_wrf(fa, config))
        // reference at the verification time
        .stage("config_wps ref", move || config_wps(reference, verification))
        .stage("link geo_em ref", {
            let ref_wps_dir = ref_wps_dir.clone();
            move || link(wps_dir.join("geo_em.d01.nc"), ref_wps_dir.join("geo_em.d01.nc"))
        })
        .stage("ungrib_metgrid ref", move || {
            run_wps_ungrib_metgrid(reference, verification)
        })
        .stage("config_wrf ref", move || config_wrf(reference, verification))
        .stage("real ref", move || run_real(reference, verification, &ref_wps_dir))
        // forecast error measures and adjoint runs
        .stage("final_sens fa", move || {
            write_final_sens(&fa.work_root, &xt, config, ctx.force)
        })
        .stage("final_sens fb", move || {
            write_final_sens(&fb.work_root, &xt_fb, config, ctx.force)
        })
        .stage("config_wrfplus fb", move || config_wrfplus(fb, config))
        .stage("wrfplus_ad fb", move || run_wrfplus_ad(fb, config))
        .stage("config_wrfplus fa", move || config_wrfplus(fa, config))
        .stage("wrfplus_ad fa", move || run_wrfplus_ad(fa, config))
        .stage("sensitivity", move || run_sensitivity(ctx, config))
}
