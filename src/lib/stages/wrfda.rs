use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use strum_macros::{Display, EnumString};

use crate::config::{Config, Root};
use crate::constants::{INVALID_CV_DIAGNOSTIC, LITTLER_TIME_FORMAT, WRF_TIME_FORMAT};
use crate::helpers::{
    check_files, copy, ensure_dir, link, list_files, log_listing, remove_files_with_prefix,
    require_dir, tool_version, Version, WrfError,
};
use crate::io::{dimension_len, global_attribute, global_attribute_i64};
use crate::namelist::Namelist;
use crate::runner::{invoke_with_retry, run_step, Step, StepOutcome};

use super::{apply_section, dom_name, read_template, set_time_control, RunContext};

lazy_static! {
    static ref LEADING_TEXT_RE: Regex =
        Regex::new(r"(?s)^[^&]*").expect("leading text regex should compile");
    static ref SEMICOLON_COMMENT_RE: Regex =
        Regex::new(r";.*").expect("comment regex should compile");
    static ref PARENTHESES_RE: Regex =
        Regex::new(r"\([^)]*\)").expect("parentheses regex should compile");
}

/// Which part of `wrfbdy_d01` `da_update_bc.exe` refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum BoundaryMode {
    #[strum(serialize = "lateral")]
    Lateral,
    #[strum(serialize = "low")]
    Low,
}

impl BoundaryMode {
    pub fn suffix(&self) -> &'static str {
        match self {
            BoundaryMode::Lateral => "lateral_updated",
            BoundaryMode::Low => "low_updated",
        }
    }
}

fn wrf_time(time: &DateTime<Utc>) -> String {
    crate::config::time::wrf_time(time)
}

/// `<work_root>/wrfda/dNN` for the assimilated domain
fn wrfda_dir(ctx: &RunContext, config: &Config) -> PathBuf {
    ctx.work_root
        .join("wrfda")
        .join(dom_name(config.run_wrfda_on_dom))
}

/// `var/README.namelist` lists every WRFDA option with comments and units
/// that a namelist reader cannot take. Keep only the groups and values.
pub fn clean_readme_namelist(text: &str) -> String {
    let text = LEADING_TEXT_RE.replace(text, "");
    let text = SEMICOLON_COMMENT_RE.replace_all(&text, "");
    PARENTHESES_RE.replace_all(&text, "").into_owned()
}

/// Full WRFDA namelist: README defaults, groups of the tutorial namelist
/// they lack, analysis time and observation window.
fn base_namelist(wrfda_root: &Path, config: &Config, version: Version) -> Result<Namelist, WrfError> {
    let readme = wrfda_root.join("var/README.namelist");
    let text = fs::read_to_string(&readme)
        .map_err(|err| format!("Cannot read {}: {err}", readme.display()))?;
    let mut namelist = Namelist::parse(&clean_readme_namelist(&text))?;
    let tutorial = read_template(&wrfda_root.join("var/test/tutorial/namelist.input"))?;
    namelist.merge_missing(&tutorial);

    let start = config.start_time;
    let half_window = Duration::minutes(config.wrfda.time_window / 2);
    namelist.set("wrfvar1", "var4d_lbc", false);
    namelist.set("wrfvar18", "analysis_date", wrf_time(&start));
    namelist.set("wrfvar21", "time_window_min", wrf_time(&(start - half_window)));
    namelist.set("wrfvar22", "time_window_max", wrf_time(&(start + half_window)));

    namelist.set("wrfvar2", "qc_rej_both", false);
    namelist.set("wrfvar14", "rtminit_satid", -1);
    namelist.set("wrfvar14", "rtminit_sensor", -1);
    if version == Version::new(3, 6, 1) {
        namelist.set("wrfvar4", "use_iasiobs", false);
        namelist.remove("wrfvar4", "use_iasisobs");
        namelist.set("wrfvar4", "use_seviriobs", false);
        namelist.remove("wrfvar4", "use_sevirisobs");
        namelist.rename("wrfvar5", "max_omb_sp", "max_omb_spd");
        namelist.rename("wrfvar5", "max_error_sp", "max_error_spd");
    } else if version > Version::new(3, 8, 1) {
        namelist.set("wrfvar11", "write_detail_grad_fn", true);
    }
    namelist.set("wrfvar11", "calculate_cg_cost_fn", true);
    Ok(namelist)
}

fn apply_wrfvar_sections(namelist: &mut Namelist, config: &Config) -> Result<(), WrfError> {
    for tag in 1..=22 {
        apply_section(namelist, config, &format!("wrfvar{tag}"))?;
    }
    Ok(())
}

/// Write `namelist.input` for `da_wrfvar.exe` on the domain chosen by
/// `run_wrfda_on_dom`. Grid attributes come from the `real.exe` output in
/// `wrf_dir` (default `<work_root>/wrf`).
pub fn config_wrfda(ctx: &RunContext, config: &Config, wrf_dir: Option<&Path>) -> Result<(), WrfError> {
    let wrfda_root = ctx.root(Root::Wrfda)?;
    let wrf_dir = wrf_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.work_root.join("wrf"));
    require_dir(&wrf_dir, "Run config_wrf and real first.")?;
    let dom_idx = config.run_wrfda_on_dom;
    let dom = dom_name(dom_idx);
    let wrfda_work_dir = wrfda_dir(ctx, config);
    ensure_dir(&wrfda_work_dir)?;

    let wrfinput = wrf_dir.join(format!("wrfinput_{dom}_{}", wrf_time(&config.start_time)));
    if !wrfinput.is_file() {
        return Err(WrfError::precondition(format!(
            "{} does not exist! Run real first.",
            wrfinput.display()
        )));
    }
    let num_land_cat = global_attribute_i64(&wrfinput, "NUM_LAND_CAT")?;
    let hypsometric_opt = global_attribute_i64(&wrfinput, "HYPSOMETRIC_OPT")?;

    let version = tool_version(&wrfda_root)?;
    let mut namelist = base_namelist(&wrfda_root, config, version)?;

    set_time_control(&mut namelist, config);
    namelist.set("time_control", "frames_per_outfile", vec![1; config.max_dom()]);
    apply_section(&mut namelist, config, "time_control")?;
    namelist.apply("domains", &config.domains.to_section())?;
    // WRFDA takes the grid of one domain at a time
    namelist.apply("domains", &config.domains.single_domain_section(dom_idx))?;
    if let Some(hypsometric_opt) = hypsometric_opt {
        namelist.set("domains", "hypsometric_opt", hypsometric_opt);
    }

    apply_section(&mut namelist, config, "physics")?;
    if let Some(num_land_cat) = num_land_cat {
        namelist.set("physics", "num_land_cat", num_land_cat);
    }
    if version == Version::new(3, 9, 1) {
        namelist.set("dynamics", "gwd_opt", 0);
    }
    apply_wrfvar_sections(&mut namelist, config)?;

    namelist.write(wrfda_work_dir.join("namelist.input"))?;
    info!("Wrote {}/namelist.input.", wrfda_work_dir.display());
    Ok(())
}

/// WRFDA namelist for the observation impact run of FSO: adjoint
/// sensitivity from `./gr01` with the Lanczos vectors of the analysis.
pub fn config_wrfda_sens(ctx: &RunContext, config: &Config, wrf_dir: &Path) -> Result<(), WrfError> {
    let wrfda_root = ctx.root(Root::Wrfda)?;
    require_dir(wrf_dir, "Run real first.")?;
    let start = wrf_time(&config.start_time);
    let wrfda_work_dir = ctx.work_root.join("wrfda").join(dom_name(0));
    ensure_dir(&wrfda_work_dir)?;

    let wrfinput = wrf_dir.join(format!("wrfinput_d01_{start}"));
    if !wrfinput.is_file() {
        return Err(WrfError::precondition(format!(
            "{} does not exist!",
            wrfinput.display()
        )));
    }
    let e_vert = dimension_len(&wrfinput, "bottom_top_stag")?
        .map(|n| n as i64)
        .unwrap_or(config.domains.e_vert[0]);

    let version = tool_version(&wrfda_root)?;
    let mut namelist = base_namelist(&wrfda_root, config, version)?;
    namelist.set("wrfvar6", "orthonorm_gradient", true);
    namelist.set("wrfvar6", "use_lanczos", true);
    namelist.set("wrfvar6", "read_lanczos", true);
    namelist.set("wrfvar17", "adj_sens", true);
    namelist.set("wrfvar17", "sensitivity_option", 0);
    namelist.set("wrfvar17", "analysis_type", "QC-OBS");

    set_time_control(&mut namelist, config);
    namelist.set("time_control", "io_form_auxinput17", 2);
    namelist.set("time_control", "auxinput17_inname", "./gr01");
    namelist.set(
        "time_control",
        "iofields_filename",
        wrfda_root.join("var/run/fso.io_config").display().to_string(),
    );
    namelist.apply("domains", &config.domains.single_domain_section(0))?;
    namelist.set("domains", "e_vert", e_vert);

    let dx = config.domains.dx[0];
    let physics = namelist.group_mut("physics");
    physics.set("mp_physics", 8);
    physics.set("ra_lw_physics", 4);
    physics.set("ra_sw_physics", 4);
    physics.set("radt", dx / 1000.0);
    physics.set("sf_sfclay_physics", 1);
    physics.set("sf_surface_physics", 2);
    physics.set("bl_pbl_physics", 1);
    physics.set("bldt", 0);
    physics.set("cu_physics", 3);
    physics.set("cudt", 0);
    apply_section(&mut namelist, config, "physics")?;
    apply_wrfvar_sections(&mut namelist, config)?;

    namelist.write(wrfda_work_dir.join("namelist.input"))?;
    info!("Wrote {}/namelist.input.", wrfda_work_dir.display());
    Ok(())
}

/// Domain projection for obsproc, from `wrfinput_d01` when available,
/// otherwise from the geogrid configuration.
fn obsproc_projection(wrfinput: &Path, config: &Config) -> Result<[(&'static str, f64); 5], WrfError> {
    let geogrid = |key: &str| {
        config
            .geogrid
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_default()
    };
    let from_file = |name: &str, fallback: f64| -> Result<f64, WrfError> {
        if wrfinput.is_file() {
            Ok(global_attribute(wrfinput, name)?.unwrap_or(fallback))
        } else {
            Ok(fallback)
        }
    };
    Ok([
        ("IPROJ", from_file("MAP_PROJ", geogrid("map_proj"))?),
        ("PHIC", from_file("CEN_LAT", geogrid("ref_lat"))?),
        ("XLONC", from_file("CEN_LON", geogrid("ref_lon"))?),
        ("MOAD_CEN_LAT", from_file("MOAD_CEN_LAT", geogrid("ref_lat"))?),
        ("STANDARD_LON", from_file("STAND_LON", geogrid("ref_lon"))?),
    ])
}

pub fn run_wrfda_obsproc(ctx: &RunContext, config: &Config) -> Result<StepOutcome, WrfError> {
    let wrfda_root = ctx.root(Root::Wrfda)?;
    let littler_root = ctx.root(Root::Littler)?;
    if config.wrfda.kind != "3dvar" {
        return Err(WrfError::config("Currently, we only support 3DVar..."));
    }
    let start_time = config.start_time;
    let start = wrf_time(&start_time);
    let obsproc_dir = ctx.work_root.join("wrfda/obsproc");
    ensure_dir(&obsproc_dir)?;

    info!("Use builtin obserr.");
    link(wrfda_root.join("var/obsproc/obserr.txt"), &obsproc_dir)?;

    let wrfinput = ctx.work_root.join(format!("wrf/wrfinput_d01_{start}"));
    let projection = obsproc_projection(&wrfinput, config)?;
    let obs_name = format!("obs.gts.{}", start_time.format(LITTLER_TIME_FORMAT));
    let half_window = Duration::minutes(config.wrfda.time_window / 2);

    let mut namelist = read_template(
        &wrfda_root.join("var/obsproc/namelist.obsproc.3dvar.wrfvar-tut"),
    )?;
    namelist.set("record1", "obs_gts_filename", obs_name.as_str());
    namelist.set("record2", "time_window_min", wrf_time(&(start_time - half_window)));
    namelist.set("record2", "time_analysis", start.as_str());
    namelist.set("record2", "time_window_max", wrf_time(&(start_time + half_window)));
    namelist.set("record3", "max_number_of_obs", 1200000);
    for (key, value) in projection {
        if key == "IPROJ" {
            namelist.set("record7", key, value.round() as i64);
        } else {
            namelist.set("record7", key, value);
        }
    }
    let domains = &config.domains;
    namelist.set("record8", "NESTIX", domains.e_sn.clone());
    namelist.set("record8", "NESTJX", domains.e_we.clone());
    // obsproc wants the grid spacing in km
    namelist.set(
        "record8",
        "DIS",
        domains.dx.iter().map(|dx| dx / 1000.0).collect::<Vec<_>>(),
    );
    namelist.set("record9", "OUTPUT_OB_FORMAT", config.obsproc_output_format);
    namelist.write(obsproc_dir.join("namelist.obsproc"))?;

    let expected = obsproc_dir.join(format!("obs_gts_{start}.3DVAR"));
    let step = Step::new("obsproc.exe", obsproc_dir.join("obsproc.out")).expect_files(&[&expected]);
    let outcome = run_step(&step, ctx.force, || {
        remove_files_with_prefix(&obsproc_dir, "obs_gts_")?;
        let littler = littler_root
            .join(start_time.format("%Y%m%d").to_string())
            .join(&obs_name);
        if !littler.is_file() {
            return Err(WrfError::precondition(format!(
                "Failed! {} Not Found.",
                littler.display()
            )));
        }
        link(&littler, &obsproc_dir)?;
        ctx.execute(
            &wrfda_root.join("var/obsproc/obsproc.exe"),
            1,
            &obsproc_dir,
            "obsproc.out",
        )
    })?;
    log_listing(&[&expected]);
    Ok(outcome)
}

/// Link the background error covariance chosen by `cv_options`.
fn link_be(ctx: &RunContext, config: &Config, wrfda_root: &Path, wrfda_work_dir: &Path) -> Result<(), WrfError> {
    let be = wrfda_work_dir.join("be.dat");
    if let Some(cv @ 5..=7) = config.cv_options() {
        let be_dir = ctx
            .work_root
            .parent()
            .unwrap_or(&ctx.work_root)
            .join("be")
            .join(dom_name(config.run_wrfda_on_dom));
        let matrix = be_dir.join(format!("be.dat.cv{cv}"));
        if !matrix.is_file() {
            return Err(WrfError::precondition(format!(
                "BE matrix {} does not exist!",
                matrix.display()
            )));
        }
        return link(matrix, be);
    }
    if fs::symlink_metadata(&be).is_err() {
        link(wrfda_root.join("var/run/be.dat.cv3"), be)?;
    }
    Ok(())
}

/// `obs.radar.<YYYYMMDDHHmm>` files of the analysis time
fn radar_file(littler_root: &Path, start_time: DateTime<Utc>) -> Option<PathBuf> {
    let day_dir = littler_root.join(start_time.format("%Y%m%d").to_string());
    list_files(day_dir, |name| name.starts_with("obs.radar."))
        .into_iter()
        .find(|file| {
            file.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('.').nth(2))
                .and_then(|t| NaiveDateTime::parse_from_str(t, LITTLER_TIME_FORMAT).ok())
                .map(|t| t.and_utc() == start_time)
                .unwrap_or(false)
        })
}

/// Link the observations `da_wrfvar.exe` reads: radar, LITTLE_R through
/// obsproc, or GDAS PREPBUFR.
fn link_observations(ctx: &RunContext, config: &Config, wrfda_work_dir: &Path) -> Result<(), WrfError> {
    if config.wrfda.kind != "3dvar" {
        return Ok(());
    }
    let start_time = config.start_time;
    if config.flag("wrfvar4", "use_radarobs") {
        remove_files_with_prefix(wrfda_work_dir, "ob.")?;
        match radar_file(&ctx.root(Root::Littler)?, start_time) {
            Some(file) => link(file, wrfda_work_dir.join("ob.radar"))?,
            None => warn!("There is no radar observation at {start_time}."),
        }
        return Ok(());
    }
    let obs_gts = ctx.work_root.join(format!(
        "wrfda/obsproc/obs_gts_{}.3DVAR",
        start_time.format(WRF_TIME_FORMAT)
    ));
    match (config.wrfda.ob_format, config.wrfda.prepbufr_source.as_deref()) {
        (2, _) if obs_gts.is_file() => link(obs_gts, wrfda_work_dir.join("ob.ascii")),
        (1, Some("gdas")) => {
            let gdas = ctx
                .root(Root::Prepbufr)?
                .join(format!("gdas.{}", start_time.format("%Y%m%d")))
                .join(format!("gdas.t{}z.prepbufr.nr", start_time.format("%H")));
            if !gdas.is_file() {
                return Err(WrfError::precondition(format!(
                    "{} does not exist!",
                    gdas.display()
                )));
            }
            link(gdas, wrfda_work_dir.join("ob.bufr"))
        }
        _ => {
            warn!("No observation is linked for da_wrfvar.exe.");
            Ok(())
        }
    }
}

/// Run `da_wrfvar.exe`. The first guess is `fg` when given, otherwise the
/// `real.exe` output of the domain in `wrf_dir` (default `<work_root>/wrf`).
/// With radar observations a previous conventional analysis is kept as
/// `wrfvar_output_conv_<t>` and used as first guess.
pub fn run_wrfda_3dvar(
    ctx: &RunContext,
    config: &Config,
    wrf_dir: Option<&Path>,
    fg: Option<&Path>,
) -> Result<StepOutcome, WrfError> {
    let wrfda_root = ctx.root(Root::Wrfda)?;
    let wrf_dir = wrf_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.work_root.join("wrf"));
    require_dir(&wrf_dir, "Run real first.")?;
    let wrfda_work_dir = wrfda_dir(ctx, config);
    if !wrfda_work_dir.join("namelist.input").is_file() {
        return Err(WrfError::precondition(
            "namelist.input has not been generated! Run config_wrfda first.",
        ));
    }
    let start = wrf_time(&config.start_time);
    let dom = dom_name(config.run_wrfda_on_dom);
    let analysis = wrfda_work_dir.join(format!("wrfvar_output_{start}"));

    let wrfinputs: Vec<_> = (0..config.max_dom())
        .map(|i| wrf_dir.join(format!("wrfinput_{}_{start}", dom_name(i))))
        .collect();
    if !check_files(&wrfinputs) {
        return Err(WrfError::precondition(
            "real.exe or da_update_bc.exe wasn't executed successfully!",
        ));
    }

    // a conventional run invalidates the saved conventional analysis
    let radar = config.flag("wrfvar4", "use_radarobs");
    let conventional = wrfda_work_dir.join(format!("wrfvar_output_conv_{start}"));
    let mut first_guess = fg
        .map(Path::to_path_buf)
        .unwrap_or_else(|| wrf_dir.join(format!("wrfinput_{dom}_{start}")));
    if radar {
        if analysis.is_file() && !conventional.is_file() {
            info!("Use previous analysis data as the background.");
            fs::rename(&analysis, &conventional)?;
        }
        if conventional.is_file() {
            first_guess = conventional.clone();
        }
    }

    let step = Step::new("da_wrfvar.exe", wrfda_work_dir.join("rsl.error.0000"))
        .expect_files(&[&analysis]);
    let outcome = run_step(&step, ctx.force, || {
        if !radar && fs::symlink_metadata(&conventional).is_ok() {
            info!("Remove stale {}.", conventional.display());
            fs::remove_file(&conventional)?;
        }
        link(wrfda_root.join("run/LANDUSE.TBL"), &wrfda_work_dir)?;
        link_be(ctx, config, &wrfda_root, &wrfda_work_dir)?;
        link(&first_guess, wrfda_work_dir.join("fg"))?;
        link_observations(ctx, config, &wrfda_work_dir)?;

        for stale in ["wrfvar_output", "statistics"] {
            let stale = wrfda_work_dir.join(stale);
            if stale.is_file() {
                fs::remove_file(stale)?;
            }
        }
        let outputs = Step::new("da_wrfvar.exe", wrfda_work_dir.join("rsl.error.0000"))
            .expect_files(&[
                wrfda_work_dir.join("wrfvar_output"),
                wrfda_work_dir.join("statistics"),
            ]);
        let program = wrfda_root.join("var/build/da_wrfvar.exe");
        invoke_with_retry(
            &outputs,
            ctx.ntasks,
            &wrfda_work_dir,
            INVALID_CV_DIAGNOSTIC,
            |ntasks| ctx.execute(&program, ntasks, &wrfda_work_dir, "rsl.error.0000"),
        )?;
        if outputs.is_complete() {
            if let Ok(statistics) = fs::read_to_string(wrfda_work_dir.join("statistics")) {
                info!("{statistics}");
            }
            copy(wrfda_work_dir.join("wrfvar_output"), &analysis)?;
        }
        Ok(())
    })?;
    log_listing(&[&analysis]);
    Ok(outcome)
}

/// Run `da_update_bc.exe` so that the boundary file agrees with the
/// analysis of `run_wrfda_3dvar`.
pub fn run_wrfda_update_bc(
    ctx: &RunContext,
    config: &Config,
    mode: BoundaryMode,
    wrf_dir: Option<&Path>,
) -> Result<StepOutcome, WrfError> {
    let wrfda_root = ctx.root(Root::Wrfda)?;
    let wrf_dir = wrf_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.work_root.join("wrf"));
    let wrfda_work_dir = wrfda_dir(ctx, config);
    ensure_dir(&wrfda_work_dir)?;
    let start = wrf_time(&config.start_time);
    let dom = dom_name(config.run_wrfda_on_dom);

    let wrfbdy = wrf_dir.join(format!("wrfbdy_{dom}_{start}"));
    let analysis = wrfda_work_dir.join(format!("wrfvar_output_{start}"));
    if !check_files(&[&wrfbdy, &analysis, &wrfda_work_dir.join("fg")]) {
        return Err(WrfError::precondition(
            "da_wrfvar.exe or real.exe wasn't executed successfully!",
        ));
    }

    let expected = wrfda_work_dir.join(format!("wrfbdy_{dom}_{start}.{}", mode.suffix()));
    let step = Step::new("da_update_bc.exe", wrfda_work_dir.join("da_update_bc.out"))
        .expect_files(&[&expected]);
    let outcome = run_step(&step, ctx.force, || {
        copy(&wrfbdy, wrfda_work_dir.join(format!("wrfbdy_{dom}")))?;
        copy(&analysis, wrfda_work_dir.join("wrfvar_output"))?;

        let mut parame = read_template(&wrfda_root.join("var/test/update_bc/parame.in"))?;
        parame.set("control_param", "wrf_input", "./fg");
        if mode == BoundaryMode::Low {
            info!("Update only low boundary condition.");
            parame.set("control_param", "low_bdy_only", true);
        }
        parame.write(wrfda_work_dir.join("parame.in"))?;

        ctx.execute(
            &wrfda_root.join("var/build/da_update_bc.exe"),
            1,
            &wrfda_work_dir,
            "da_update_bc.out",
        )?;
        copy(wrfda_work_dir.join(format!("wrfbdy_{dom}")), &expected)
    })?;
    log_listing(&[&expected]);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cleans_readme_namelist() {
        let text = "WRFDA namelist options\n\n&wrfvar1\nwrite_increments=false, ; whether to write increments\nvar4d=false,\n/\n&wrfvar7\ncv_options=5, ; (3, 5, 6 or 7)\nlen_scaling1=1.0 (m)\n/\n";
        let namelist = Namelist::parse(&clean_readme_namelist(text)).unwrap();
        assert_eq!(
            namelist.get("wrfvar7", "cv_options").map(|v| v.to_string()),
            Some("5".to_string())
        );
        assert!(namelist.get("wrfvar1", "var4d").is_some());
    }

    #[test]
    fn boundary_mode_suffix() {
        assert_eq!(BoundaryMode::Lateral.suffix(), "lateral_updated");
        assert_eq!("low".parse::<BoundaryMode>().unwrap(), BoundaryMode::Low);
    }

    #[test]
    fn finds_radar_file_of_analysis_time() {
        let dir = tempfile::TempDir::new().unwrap();
        let day = dir.path().join("20190601");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("obs.radar.201906010000"), "").unwrap();
        fs::write(day.join("obs.radar.201906010300"), "").unwrap();
        let start = Utc.with_ymd_and_hms(2019, 6, 1, 3, 0, 0).unwrap();
        assert_eq!(
            radar_file(dir.path(), start),
            Some(day.join("obs.radar.201906010300"))
        );
        let start = Utc.with_ymd_and_hms(2019, 6, 1, 6, 0, 0).unwrap();
        assert_eq!(radar_file(dir.path(), start), None);
    }
}
