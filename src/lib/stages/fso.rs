//! Forecast sensitivity to observations. Two forecasts valid at the same
//! time, one from the background (`fb`) and one from the analysis (`fa`),
//! are compared with a reference analysis (`ref`). Their adjoint gradients
//! are summed and fed back to WRFDA to get the impact of each observation.

use std::path::{Path, PathBuf};

use log::info;
use ndarray::ArrayD;

use crate::config::Config;
use crate::constants::{FSO_PRESSURE_SCALE, FSO_TEMPERATURE_SCALE, SENSITIVITY_VARIABLES};
use crate::helpers::{copy, ensure_dir, link, list_files, WrfError};
use crate::io::{read_field, write_field};

use super::{config_wrfda_sens, run_wrfda_3dvar, RunContext};

/// adjoint variables summed over the two forecasts
const INIT_SENS_VARIABLES: [&str; 7] = ["A_U", "A_V", "A_T", "A_W", "A_PH", "A_MU", "A_QVAPOR"];

fn wrf_time(time: &chrono::DateTime<chrono::Utc>) -> String {
    crate::config::time::wrf_time(time)
}

/// Energy-weighted difference between a forecast field and the reference.
/// `var` is the WRF variable name; `T` and `P` are scaled so that all
/// terms have the units of the kinetic energy norm.
pub fn forecast_error(
    var: &str,
    forecast: &ArrayD<f32>,
    reference: &ArrayD<f32>,
) -> Result<ArrayD<f32>, WrfError> {
    if forecast.shape() != reference.shape() {
        return Err(WrfError::precondition(format!(
            "Variable {var} has shape {:?} in the forecast but {:?} in the reference!",
            forecast.shape(),
            reference.shape()
        )));
    }
    let scale = match var {
        "T" => FSO_TEMPERATURE_SCALE,
        "P" => FSO_PRESSURE_SCALE,
        _ => 1.0,
    } as f32;
    let mut error = forecast - reference;
    error.par_mapv_inplace(|v| v * scale);
    Ok(error)
}

fn required_field(path: &Path, name: &str) -> Result<ArrayD<f32>, WrfError> {
    read_field(path, name)?.ok_or_else(|| {
        WrfError::precondition(format!("There is no {name} in {}!", path.display()))
    })
}

/// Write `<branch>/wrfplus/final_sens_d01`: a copy of the forecast valid
/// at the end time carrying `A_U`, `A_V`, `A_T` and `A_P` forecast errors
/// against `reference`. Returns the path of the file.
pub fn write_final_sens(
    branch_dir: &Path,
    reference: &Path,
    config: &Config,
    force: bool,
) -> Result<PathBuf, WrfError> {
    let wrfplus_dir = branch_dir.join("wrfplus");
    ensure_dir(&wrfplus_dir)?;
    let final_sens = wrfplus_dir.join("final_sens_d01");
    if final_sens.is_file() && !force {
        info!("{} already exists.", final_sens.display());
        return Ok(final_sens);
    }

    let forecast = branch_dir.join(format!("wrf/wrfout_d01_{}", wrf_time(&config.end_time)));
    info!("Calculate final sensitivity {}.", final_sens.display());
    copy(&forecast, &final_sens)?;
    for sens_var in SENSITIVITY_VARIABLES {
        let var = sens_var.trim_start_matches("A_");
        let error = forecast_error(
            var,
            &required_field(&forecast, var)?,
            &required_field(reference, var)?,
        )?;
        write_field(&final_sens, sens_var, var, &error)?;
    }
    Ok(final_sens)
}

/// Start the analysis forecast from the background forecast: its output at
/// the analysis time becomes `fa/wrf/wrfinput_d01_<t>`.
pub fn prepare_analysis_forecast(work_root: &Path, config: &Config, force: bool) -> Result<(), WrfError> {
    let start = wrf_time(&config.start_time);
    let fb_wrf_dir = work_root.join("fb/wrf");
    let fa_wrf_dir = work_root.join("fa/wrf");
    ensure_dir(&fa_wrf_dir)?;

    let wrfinput = fa_wrf_dir.join(format!("wrfinput_d01_{start}"));
    let wrfbdy = fa_wrf_dir.join(format!("wrfbdy_d01_{start}"));
    if wrfinput.is_file() && wrfbdy.is_file() && !force {
        info!("{} already exists.", wrfinput.display());
        return Ok(());
    }
    copy(fb_wrf_dir.join(format!("wrfout_d01_{start}")), &wrfinput)?;
    copy(fb_wrf_dir.join("wrfbdy_d01"), &wrfbdy)
}

/// `ad_d01_<t>` in `wrfda_dir`: the sum of the adjoint gradients of both
/// forecasts, on top of a copy of the analysis forecast gradient.
pub fn add_init_sens(
    wrfda_dir: &Path,
    fa_init_sens: &Path,
    fb_init_sens: &Path,
    config: &Config,
) -> Result<PathBuf, WrfError> {
    info!("Add two init_sens_d01 data.");
    ensure_dir(wrfda_dir)?;
    let ad = wrfda_dir.join(format!("ad_d01_{}", wrf_time(&config.start_time)));
    copy(fa_init_sens, &ad)?;
    for var in INIT_SENS_VARIABLES {
        let (fa, fb) = (
            required_field(fa_init_sens, var)?,
            required_field(fb_init_sens, var)?,
        );
        if fa.shape() != fb.shape() {
            return Err(WrfError::precondition(format!(
                "Variable {var} differs in shape between {} and {}!",
                fa_init_sens.display(),
                fb_init_sens.display()
            )));
        }
        write_field(&ad, var, var, &(fa + fb))?;
    }
    Ok(ad)
}

/// Observation impact run in `<work_root>/sens` once both adjoint runs
/// are done.
pub fn run_sensitivity(ctx: &RunContext, config: &Config) -> Result<(), WrfError> {
    let start = wrf_time(&config.start_time);
    let fa_dir = ctx.work_root.join("fa");
    let fb_dir = ctx.work_root.join("fb");
    let sens = ctx.with_work_root(ctx.work_root.join("sens"));
    let fa_wrf_dir = fa_dir.join("wrf");

    config_wrfda_sens(&sens, config, &fa_wrf_dir)?;
    let wrfda_dir = sens.work_root.join("wrfda/d01");
    let ad = add_init_sens(
        &wrfda_dir,
        &fa_dir.join(format!("wrfplus/init_sens_d01_{start}")),
        &fb_dir.join(format!("wrfplus/init_sens_d01_{start}")),
        config,
    )?;
    link(&ad, wrfda_dir.join("gr01"))?;

    if config.wrfda.ob_format == 2 {
        let obsproc_dir = sens.work_root.join("wrfda/obsproc");
        ensure_dir(&obsproc_dir)?;
        link(
            fa_dir.join(format!("wrfda/obsproc/obs_gts_{start}.3DVAR")),
            &obsproc_dir,
        )?;
    }
    for lanczos in list_files(fa_dir.join("wrfda/d01"), |name| {
        name.starts_with("lanczos_eigenpairs.")
    }) {
        link(&lanczos, &wrfda_dir)?;
    }

    run_wrfda_3dvar(&sens, config, Some(&fa_wrf_dir), None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    #[test]
    fn scales_temperature_and_pressure_errors() {
        let forecast = arr1(&[301.0f32, 302.0]).into_dyn();
        let reference = arr1(&[300.0f32, 300.0]).into_dyn();

        let u = forecast_error("U", &forecast, &reference).unwrap();
        assert_eq!(u.as_slice().unwrap(), &[1.0, 2.0]);

        let t = forecast_error("T", &forecast, &reference).unwrap();
        let scale = FSO_TEMPERATURE_SCALE as f32;
        assert!((t[[0]] - scale).abs() < 1e-4);
        assert!((t[[1]] - 2.0 * scale).abs() < 1e-4);

        let p = forecast_error("P", &forecast, &reference).unwrap();
        assert!((p[[1]] - 2.0 / 90000.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_mismatched_grids() {
        let forecast = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 3]));
        let reference = ArrayD::<f32>::zeros(IxDyn(&[1, 3, 2]));
        let err = forecast_error("V", &forecast, &reference).unwrap_err();
        assert!(err.message().contains("V"));
    }

    #[test]
    fn analysis_forecast_starts_from_background_forecast() {
        let dir = tempfile::TempDir::new().unwrap();
        let fb = dir.path().join("fb/wrf");
        std::fs::create_dir_all(&fb).unwrap();
        std::fs::write(fb.join("wrfout_d01_2019-06-01_00:00:00"), "xb forecast").unwrap();
        std::fs::write(fb.join("wrfbdy_d01"), "bdy").unwrap();
        let config = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 9000, "dy": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
                "custom": {"start_time": "2019060100", "forecast_hours": 6}}"#,
        )
        .unwrap();

        prepare_analysis_forecast(dir.path(), &config, false).unwrap();
        let fa = dir.path().join("fa/wrf");
        assert_eq!(
            std::fs::read_to_string(fa.join("wrfinput_d01_2019-06-01_00:00:00")).unwrap(),
            "xb forecast"
        );
        assert!(fa.join("wrfbdy_d01_2019-06-01_00:00:00").is_file());
    }
}
