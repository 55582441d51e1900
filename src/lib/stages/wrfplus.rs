use std::fs;

use log::info;

use crate::config::{Config, Root};
use crate::helpers::{link, list_files, log_listing, remove_files_with_prefix, require_dir, WrfError};
use crate::runner::{run_step, ExpectedOutput, Step, StepOutcome};

use super::{dom_name, read_template, set_time_control, RunContext};

const WRFPLUS_RUN_FILES: [(&str, &str); 6] = [
    ("LANDUSE.TBL", "LANDUSE.TBL"),
    ("VEGPARM.TBL", "VEGPARM.TBL"),
    ("SOILPARM.TBL", "SOILPARM.TBL"),
    ("GENPARM.TBL", "GENPARM.TBL"),
    ("RRTM_DATA_DBL", "RRTM_DATA"),
    ("ETAMPNEW_DATA_DBL", "ETAMPNEW_DATA"),
];

/// Namelist of the tangent linear and adjoint model, simplified physics.
pub fn config_wrfplus(ctx: &RunContext, config: &Config) -> Result<(), WrfError> {
    let wrfplus_root = ctx.root(Root::Wrfplus)?;
    let wrfda_root = ctx.root(Root::Wrfda)?;
    let wrfplus_work_dir = ctx.stage_dir("wrfplus")?;
    let start = crate::config::time::wrf_time(&config.start_time);

    let mut namelist = read_template(&wrfplus_root.join("test/em_real/namelist.input"))?;
    set_time_control(&mut namelist, config);
    let time_control = namelist.group_mut("time_control");
    time_control.set("auxinput6_interval_h", 1);
    time_control.set("auxinput6_end_h", config.forecast_hours);
    time_control.set("auxinput6_inname", format!("traj_d01_{start}"));
    time_control.set("io_form_auxinput6", 2);
    time_control.set("io_form_auxhist7", 2);
    time_control.set(
        "iofields_filename",
        wrfda_root.join("var/run/plus.io_config").display().to_string(),
    );
    time_control.set("ignore_iofields_warning", true);

    namelist.apply("domains", &config.domains.to_section())?;
    namelist.set(
        "domains",
        "parent_time_step_ratio",
        config.domains.parent_grid_ratio.clone(),
    );

    let physics = namelist.group_mut("physics");
    physics.set("mp_physics", 98);
    physics.set("ra_lw_physics", 0);
    physics.set("ra_sw_physics", 0);
    physics.set("sf_sfclay_physics", 0);
    physics.set("bl_pbl_physics", 98);
    physics.set("cu_physics", 0);
    namelist.set("dynamics", "dyn_opt", 302);

    namelist.write(wrfplus_work_dir.join("namelist.input"))?;
    info!("Wrote {}/namelist.input.", wrfplus_work_dir.display());
    Ok(())
}

/// Integrate the adjoint model backward from `final_sens_d01`. The gradient
/// at the start time is kept as `init_sens_d01_<t>`.
pub fn run_wrfplus_ad(ctx: &RunContext, config: &Config) -> Result<StepOutcome, WrfError> {
    let wrfplus_root = ctx.root(Root::Wrfplus)?;
    let wrf_work_dir = ctx.work_root.join("wrf");
    require_dir(&wrf_work_dir, "Run WRF first.")?;
    let wrfplus_work_dir = ctx.work_root.join("wrfplus");
    if !wrfplus_work_dir.join("namelist.input").is_file() {
        return Err(WrfError::precondition(
            "WRFPLUS has not been configured! Run config_wrfplus first.",
        ));
    }
    if wrf_work_dir.join("wrfinput_d01").exists() {
        link(wrf_work_dir.join("wrfinput_d01"), &wrfplus_work_dir)?;
        link(wrf_work_dir.join("wrfbdy_d01"), &wrfplus_work_dir)?;
    }
    if !wrfplus_work_dir.join("final_sens_d01").is_file() {
        return Err(WrfError::precondition("There is no final_sens_d01 file!"));
    }

    let start = crate::config::time::wrf_time(&config.start_time);
    let init_sens = wrfplus_work_dir.join(format!("init_sens_d01_{start}"));
    let step = (0..config.max_dom())
        .fold(
            Step::new("wrfplus.exe", wrfplus_work_dir.join("rsl.error.0000")),
            |step, i| {
                step.expect(ExpectedOutput::with_single_time(
                    wrfplus_work_dir.join(format!("wrfout_{}_{start}", dom_name(i))),
                    &start,
                ))
            },
        )
        .expect(ExpectedOutput::file(&init_sens));

    let outcome = run_step(&step, ctx.force, || {
        remove_files_with_prefix(&wrfplus_work_dir, "wrfout_")?;
        for (src, dst) in WRFPLUS_RUN_FILES {
            link(wrfplus_root.join("run").join(src), wrfplus_work_dir.join(dst))?;
        }
        ctx.execute(
            &wrfplus_root.join("run/wrfplus.exe"),
            ctx.ntasks,
            &wrfplus_work_dir,
            "rsl.error.0000",
        )?;
        let gradient = wrfplus_work_dir.join(format!("gradient_wrfplus_d01_{start}"));
        if gradient.is_file() {
            fs::rename(gradient, &init_sens)?;
        }
        Ok(())
    })?;
    log_listing(&list_files(&wrfplus_work_dir, |name| {
        name.starts_with("wrfout_") || name.starts_with("init_sens_")
    }));
    Ok(outcome)
}
