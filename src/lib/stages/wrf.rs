use std::{fs, path::Path};

use log::{info, warn};

use crate::config::{Config, Root};
use crate::helpers::{
    check_files, link, list_files, log_listing, remove_files_with_prefix, require_dir,
    tool_version, Version, WrfError,
};
use crate::io::{dimension_len, global_attribute_i64, NETCDF_ENABLED};
use crate::namelist::Namelist;
use crate::runner::{run_step, ExpectedOutput, Step, StepOutcome};

use super::{apply_section, dom_name, read_template, set_time_control, RunContext};

/// tables and data files `wrf.exe` reads from its working directory
const WRF_RUN_FILES: [(&str, &str); 10] = [
    ("LANDUSE.TBL", "LANDUSE.TBL"),
    ("ozone_plev.formatted", "ozone_plev.formatted"),
    ("ozone_lat.formatted", "ozone_lat.formatted"),
    ("ozone.formatted", "ozone.formatted"),
    ("RRTM_DATA_DBL", "RRTM_DATA"),
    ("RRTMG_LW_DATA", "RRTMG_LW_DATA"),
    ("RRTMG_SW_DATA", "RRTMG_SW_DATA"),
    ("VEGPARM.TBL", "VEGPARM.TBL"),
    ("SOILPARM.TBL", "SOILPARM.TBL"),
    ("GENPARM.TBL", "GENPARM.TBL"),
];

fn wrf_time(time: &chrono::DateTime<chrono::Utc>) -> String {
    crate::config::time::wrf_time(time)
}

pub fn config_wrf(ctx: &RunContext, config: &Config) -> Result<(), WrfError> {
    let wrf_root = ctx.root(Root::Wrf)?;
    let wrf_work_dir = ctx.stage_dir("wrf")?;
    let version = tool_version(&wrf_root)?;
    let max_dom = config.max_dom();
    let start = wrf_time(&config.start_time);

    let wrfinput = wrf_work_dir.join(format!("wrfinput_d01_{start}"));
    let num_land_cat = if wrfinput.is_file() {
        global_attribute_i64(&wrfinput, "NUM_LAND_CAT")?
    } else {
        None
    };

    let mut namelist = read_template(&wrf_root.join("run/namelist.input"))?;
    set_time_control(&mut namelist, config);
    namelist.set("time_control", "frames_per_outfile", vec![1; max_dom]);
    if let Some(interval_seconds) = config.background.interval_seconds {
        namelist.set("time_control", "interval_seconds", interval_seconds);
    }
    apply_section(&mut namelist, config, "time_control")?;
    namelist.apply("domains", &config.domains.to_section())?;

    namelist.remove("physics", "physics_suite");
    apply_section(&mut namelist, config, "physics")?;
    if let Some(num_land_cat) = num_land_cat {
        namelist.set("physics", "num_land_cat", num_land_cat);
    }
    apply_section(&mut namelist, config, "dynamics")?;
    if version == Version::new(3, 9, 1) {
        namelist.set("dynamics", "gwd_opt", 0);
    }

    namelist.write(wrf_work_dir.join("namelist.input"))?;
    info!("Wrote {}/namelist.input.", wrf_work_dir.display());
    Ok(())
}

/// Set the metgrid level counts of `namelist.input` from one `met_em` file.
fn set_metgrid_levels(namelist: &mut Namelist, met_em: &Path) -> Result<(), WrfError> {
    match dimension_len(met_em, "num_metgrid_levels")? {
        Some(levels) => namelist.set("domains", "num_metgrid_levels", levels),
        None => warn!(
            "Cannot read num_metgrid_levels from {}, keep the namelist value.",
            met_em.display()
        ),
    }
    match dimension_len(met_em, "num_st_layers")? {
        Some(levels) => namelist.set("domains", "num_metgrid_soil_levels", levels),
        None if NETCDF_ENABLED => {
            warn!(
                "Dimension num_st_layers is not in {}! Set num_metgrid_soil_levels to 0.",
                met_em.display()
            );
            namelist.set("domains", "num_metgrid_soil_levels", 0);
        }
        None => {}
    }
    Ok(())
}

/// Run `real.exe` on the `met_em` files of `wps_dir`. Outputs are renamed
/// with the start time so that several windows can share one directory.
pub fn run_real(ctx: &RunContext, config: &Config, wps_dir: &Path) -> Result<StepOutcome, WrfError> {
    let wrf_root = ctx.root(Root::Wrf)?;
    let wrf_work_dir = ctx.work_root.join("wrf");
    require_dir(&wrf_work_dir, "Run config_wrf first.")?;
    let start = wrf_time(&config.start_time);

    let mut expected: Vec<_> = (0..config.max_dom())
        .map(|i| wrf_work_dir.join(format!("wrfinput_{}_{start}", dom_name(i))))
        .collect();
    expected.push(wrf_work_dir.join(format!("wrfbdy_d01_{start}")));

    let step = Step::new("real.exe", wrf_work_dir.join("rsl.error.0000")).expect_files(&expected);
    let outcome = run_step(&step, ctx.force, || {
        let met_files = list_files(wps_dir, |name| name.starts_with("met_em."));
        if met_files.is_empty() {
            return Err(WrfError::precondition(format!(
                "There is no met_em file in {}! Run metgrid first.",
                wps_dir.display()
            )));
        }
        clear_bare_outputs(&wrf_work_dir, config.max_dom())?;
        remove_files_with_prefix(&wrf_work_dir, "met_em.")?;
        for file in &met_files {
            link(file, &wrf_work_dir)?;
        }

        let namelist_path = wrf_work_dir.join("namelist.input");
        let mut namelist = Namelist::read(&namelist_path)?;
        set_metgrid_levels(&mut namelist, &met_files[0])?;
        namelist.write(&namelist_path)?;

        ctx.execute(
            &wrf_root.join("run/real.exe"),
            ctx.ntasks,
            &wrf_work_dir,
            "rsl.error.0000",
        )?;

        for name in bare_outputs(config.max_dom()) {
            rename_if_present(&wrf_work_dir, &name, &start)?;
        }
        Ok(())
    })?;
    log_listing(&expected);
    Ok(outcome)
}

/// `wrfinput_dNN` of every domain and `wrfbdy_d01`
fn bare_outputs(max_dom: usize) -> Vec<String> {
    (0..max_dom)
        .map(|i| format!("wrfinput_{}", dom_name(i)))
        .chain(std::iter::once("wrfbdy_d01".to_string()))
        .collect()
}

/// Remove what real.exe or run_wrf left under the bare output names. The
/// time-stamped outputs of other windows stay.
fn clear_bare_outputs(dir: &Path, max_dom: usize) -> Result<(), WrfError> {
    for name in bare_outputs(max_dom) {
        let path = dir.join(name);
        if fs::symlink_metadata(&path).is_ok() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn rename_if_present(dir: &Path, name: &str, time: &str) -> Result<(), WrfError> {
    let src = dir.join(name);
    if src.is_file() {
        fs::rename(&src, dir.join(format!("{name}_{time}")))?;
    }
    Ok(())
}

/// Link the analysis of every domain when WRFDA produced one, otherwise
/// the `real.exe` outputs.
fn link_initial_conditions(ctx: &RunContext, config: &Config, wrf_work_dir: &Path) -> Result<(), WrfError> {
    let start = wrf_time(&config.start_time);
    let max_dom = config.max_dom();
    let analyses: Vec<_> = (0..max_dom)
        .map(|i| {
            ctx.work_root
                .join("wrfda")
                .join(dom_name(i))
                .join(format!("wrfvar_output_{start}"))
        })
        .collect();

    if check_files(&analyses) {
        info!("Use assimilated input for all domains.");
        for (i, analysis) in analyses.iter().enumerate() {
            link(analysis, wrf_work_dir.join(format!("wrfinput_{}", dom_name(i))))?;
        }
        let updated = ctx
            .work_root
            .join(format!("wrfda/d01/wrfbdy_d01_{start}.lateral_updated"));
        if updated.is_file() {
            return link(updated, wrf_work_dir.join("wrfbdy_d01"));
        }
        warn!("{} does not exist, use boundary from real.exe.", updated.display());
    } else {
        warn!("Do not use data assimilation.");
        for i in 0..max_dom {
            let dom = dom_name(i);
            let wrfinput = wrf_work_dir.join(format!("wrfinput_{dom}_{start}"));
            if !wrfinput.is_file() {
                return Err(WrfError::precondition(
                    "real.exe wasn't executed successfully!",
                ));
            }
            link(wrfinput, wrf_work_dir.join(format!("wrfinput_{dom}")))?;
        }
    }
    let wrfbdy = wrf_work_dir.join(format!("wrfbdy_d01_{start}"));
    if !wrfbdy.is_file() {
        return Err(WrfError::precondition("real.exe wasn't executed successfully!"));
    }
    link(wrfbdy, wrf_work_dir.join("wrfbdy_d01"))
}

pub fn run_wrf(ctx: &RunContext, config: &Config) -> Result<StepOutcome, WrfError> {
    let wrf_root = ctx.root(Root::Wrf)?;
    let wrf_work_dir = ctx.work_root.join("wrf");
    require_dir(&wrf_work_dir, "Run config_wrf first.")?;
    let end = wrf_time(&config.end_time);

    let step = (0..config.max_dom()).fold(
        Step::new("wrf.exe", wrf_work_dir.join("rsl.error.0000")),
        |step, i| {
            step.expect(ExpectedOutput::with_last_time(
                wrf_work_dir.join(format!("wrfout_{}_{end}", dom_name(i))),
                &end,
            ))
        },
    );
    let outcome = run_step(&step, ctx.force, || {
        link_initial_conditions(ctx, config, &wrf_work_dir)?;
        remove_files_with_prefix(&wrf_work_dir, "wrfout_")?;
        for (src, dst) in WRF_RUN_FILES {
            link(wrf_root.join("run").join(src), wrf_work_dir.join(dst))?;
        }
        ctx.execute(
            &wrf_root.join("run/wrf.exe"),
            ctx.ntasks,
            &wrf_work_dir,
            "rsl.error.0000",
        )
    })?;
    log_listing(&list_files(&wrf_work_dir, |name| name.starts_with("wrfout_")));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_real_outputs() {
        let dir = tempfile::TempDir::new().unwrap();
        let wrf_dir = dir.path().join("wrf");
        fs::create_dir_all(&wrf_dir).unwrap();
        fs::write(wrf_dir.join("wrfinput_d01_2019-06-01_00:00:00"), "nc").unwrap();
        fs::write(wrf_dir.join("wrfbdy_d01_2019-06-01_00:00:00"), "nc").unwrap();

        let config = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 9000, "dy": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
                "custom": {"start_time": "2019060100", "forecast_hours": 6}}"#,
        )
        .unwrap();
        let ctx = RunContext::new(
            crate::config::Settings::default(),
            crate::queue::ClusterConfig::local(),
            dir.path().to_path_buf(),
        );
        link_initial_conditions(&ctx, &config, &wrf_dir).unwrap();
        assert_eq!(
            fs::read_link(wrf_dir.join("wrfinput_d01")).unwrap(),
            wrf_dir.join("wrfinput_d01_2019-06-01_00:00:00")
        );

        let wrfda_dir = dir.path().join("wrfda/d01");
        fs::create_dir_all(&wrfda_dir).unwrap();
        fs::write(wrfda_dir.join("wrfvar_output_2019-06-01_00:00:00"), "nc").unwrap();
        fs::write(
            wrfda_dir.join("wrfbdy_d01_2019-06-01_00:00:00.lateral_updated"),
            "nc",
        )
        .unwrap();
        link_initial_conditions(&ctx, &config, &wrf_dir).unwrap();
        assert_eq!(
            fs::read_link(wrf_dir.join("wrfinput_d01")).unwrap(),
            wrfda_dir.join("wrfvar_output_2019-06-01_00:00:00")
        );
        assert_eq!(
            fs::read_link(wrf_dir.join("wrfbdy_d01")).unwrap(),
            wrfda_dir.join("wrfbdy_d01_2019-06-01_00:00:00.lateral_updated")
        );
    }

    #[test]
    fn real_keeps_outputs_of_other_windows() {
        let dir = tempfile::TempDir::new().unwrap();
        let wrf_dir = dir.path().join("wrf");
        fs::create_dir_all(&wrf_dir).unwrap();
        let earlier = wrf_dir.join("wrfinput_d01_2019-05-31_18:00:00");
        let earlier_bdy = wrf_dir.join("wrfbdy_d01_2019-05-31_18:00:00");
        fs::write(&earlier, "nc").unwrap();
        fs::write(&earlier_bdy, "nc").unwrap();
        fs::write(wrf_dir.join("wrfinput_d02"), "nc").unwrap();
        std::os::unix::fs::symlink(&earlier, wrf_dir.join("wrfinput_d01")).unwrap();
        std::os::unix::fs::symlink(&earlier_bdy, wrf_dir.join("wrfbdy_d01")).unwrap();

        clear_bare_outputs(&wrf_dir, 2).unwrap();

        assert!(earlier.is_file());
        assert!(earlier_bdy.is_file());
        for name in ["wrfinput_d01", "wrfinput_d02", "wrfbdy_d01"] {
            assert!(fs::symlink_metadata(wrf_dir.join(name)).is_err(), "{name}");
        }
    }

    #[test]
    fn missing_real_outputs_is_a_precondition_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let wrf_dir = dir.path().join("wrf");
        fs::create_dir_all(&wrf_dir).unwrap();
        let config = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 9000, "dy": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
                "custom": {"start_time": "2019060100", "forecast_hours": 6}}"#,
        )
        .unwrap();
        let ctx = RunContext::new(
            crate::config::Settings::default(),
            crate::queue::ClusterConfig::local(),
            dir.path().to_path_buf(),
        );
        let err = link_initial_conditions(&ctx, &config, &wrf_dir).unwrap_err();
        assert_eq!(err.kind(), crate::helpers::ErrorKind::Precondition);
    }
}
