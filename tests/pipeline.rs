use std::{
    cell::Cell,
    collections::HashMap,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use tempfile::TempDir;
use wrf_scripts::{
    config::{Config, Root, Settings},
    helpers::{ErrorKind, WrfError},
    pipeline::{radar_pass_config, Pipeline},
    queue::{ClusterConfig, Launcher},
    runner::StepOutcome,
    stages::{config_wps, run_wps_geogrid, run_wrfda_3dvar, RunContext},
};

const CONFIG: &str = r#"{
    "domains": {"max_dom": 1, "dx": 9000, "dy": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
    "custom": {"start_time": "2019060100", "forecast_hours": 6}
}"#;

const NAMELIST_WPS: &str = "&share
 wrf_core = 'ARW',
 max_dom = 2,
/
&geogrid
 map_proj = 'lambert',
/
&ungrib
 out_format = 'WPS',
/
&metgrid
 fg_name = 'FILE',
/
";

fn script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A WPS tree whose geogrid.exe counts its runs in `calls` and writes
/// `geo_em.d01.nc` only when `produce` is set.
fn fake_wps(root: &Path, produce: bool) -> PathBuf {
    let wps = root.join("WPS");
    fs::create_dir_all(wps.join("geogrid")).unwrap();
    fs::write(wps.join("README"), "WPS Version 4.1\n").unwrap();
    fs::write(wps.join("namelist.wps"), NAMELIST_WPS).unwrap();
    fs::write(wps.join("geogrid/GEOGRID.TBL.ARW"), "").unwrap();
    let calls = root.join("calls");
    let mut body = format!("echo run >> {}\necho 'Successful completion' > geogrid.log.0000\n", calls.display());
    if produce {
        body.push_str("echo nc > geo_em.d01.nc\n");
    }
    script(&wps.join("geogrid/src/geogrid.exe"), &body);
    wps
}

fn context(root: &Path, wps: &Path) -> RunContext {
    fs::create_dir_all(root.join("WPS_GEOG")).unwrap();
    let settings = Settings::new(HashMap::new())
        .with_cli(Root::Wps, Some(wps))
        .with_cli(Root::Geog, Some(root.join("WPS_GEOG")))
        .with_cli(Root::Work, Some(root.join("work")));
    let work_root = settings.work_root().unwrap();
    let cluster = ClusterConfig::local()
        .with_launcher(Launcher::Direct)
        .with_poll_interval(Duration::from_millis(50));
    RunContext::new(settings, cluster, work_root).with_ntasks(1)
}

fn calls(root: &Path) -> usize {
    fs::read_to_string(root.join("calls"))
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

#[test]
fn completed_step_is_not_run_again() {
    let dir = TempDir::new().unwrap();
    let wps = fake_wps(dir.path(), true);
    let ctx = context(dir.path(), &wps);
    let config = Config::load(CONFIG).unwrap();

    config_wps(&ctx, &config).unwrap();
    let namelist = fs::read_to_string(ctx.work_root.join("wps/namelist.wps")).unwrap();
    assert!(namelist.contains("2019-06-01_06:00:00"));

    assert_eq!(run_wps_geogrid(&ctx, &config).unwrap(), StepOutcome::Completed);
    assert_eq!(
        run_wps_geogrid(&ctx, &config).unwrap(),
        StepOutcome::AlreadyComplete
    );
    assert_eq!(calls(dir.path()), 1);
}

#[test]
fn force_runs_completed_step_again() {
    let dir = TempDir::new().unwrap();
    let wps = fake_wps(dir.path(), true);
    let ctx = context(dir.path(), &wps);
    let config = Config::load(CONFIG).unwrap();

    config_wps(&ctx, &config).unwrap();
    run_wps_geogrid(&ctx, &config).unwrap();
    let forced = ctx.clone().with_force(true);
    assert_eq!(run_wps_geogrid(&forced, &config).unwrap(), StepOutcome::Completed);
    assert_eq!(calls(dir.path()), 2);
}

#[test]
fn pipeline_stops_at_step_without_outputs() {
    let dir = TempDir::new().unwrap();
    let wps = fake_wps(dir.path(), false);
    let ctx = context(dir.path(), &wps);
    let config = Config::load(CONFIG).unwrap();
    let after = Cell::new(false);

    let report = Pipeline::new("test")
        .stage("config_wps", || config_wps(&ctx, &config))
        .stage("geogrid", || run_wps_geogrid(&ctx, &config))
        .stage("after", || -> Result<(), WrfError> {
            after.set(true);
            Ok(())
        })
        .run();

    assert_eq!(report.executed, vec!["config_wps".to_string()]);
    assert!(!after.get());
    assert_eq!(calls(dir.path()), 1);
    let (stage, err) = report.failure.as_ref().unwrap();
    assert_eq!(stage, "geogrid");
    assert_eq!(err.kind(), ErrorKind::StepFailed);
    assert!(err.message().contains("geogrid.log.0000"));
    assert!(report.into_result().is_err());
}

#[test]
fn missing_tool_root_is_an_environment_error() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::new(HashMap::new()).with_cli(Root::Work, Some(dir.path()));
    let ctx = RunContext::new(settings, ClusterConfig::local(), dir.path().to_path_buf());
    let config = Config::load(CONFIG).unwrap();

    let err = config_wps(&ctx, &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Environment);
    assert!(err.message().contains("WPS_ROOT"));
}

const START: &str = "2019-06-01_00:00:00";

/// A WRFDA tree whose da_wrfvar.exe returns its first guess as analysis.
fn fake_wrfda(root: &Path) -> PathBuf {
    let wrfda = root.join("WRFDA");
    script(
        &wrfda.join("var/build/da_wrfvar.exe"),
        "cp fg wrfvar_output\n\
         echo 'Diagnostics' > statistics\n\
         echo 'WRF-Var completed successfully' > rsl.error.0000\n",
    );
    wrfda
}

fn assimilation_context(root: &Path) -> RunContext {
    let wrfda = fake_wrfda(root);
    fs::create_dir_all(root.join("littler")).unwrap();
    let settings = Settings::new(HashMap::new())
        .with_cli(Root::Wrfda, Some(wrfda))
        .with_cli(Root::Littler, Some(root.join("littler")))
        .with_cli(Root::Work, Some(root.join("work")));
    let work_root = settings.work_root().unwrap();
    let cluster = ClusterConfig::local()
        .with_launcher(Launcher::Direct)
        .with_poll_interval(Duration::from_millis(50));
    RunContext::new(settings, cluster, work_root).with_ntasks(1)
}

#[test]
fn radar_pass_starts_from_fresh_conventional_analysis() {
    let dir = TempDir::new().unwrap();
    let ctx = assimilation_context(dir.path()).with_force(true);
    let config = Config::load(CONFIG).unwrap();

    let wrf_dir = ctx.work_root.join("wrf");
    fs::create_dir_all(&wrf_dir).unwrap();
    fs::write(wrf_dir.join(format!("wrfinput_d01_{START}")), "REAL\n").unwrap();
    let wrfda_dir = ctx.work_root.join("wrfda/d01");
    fs::create_dir_all(&wrfda_dir).unwrap();
    fs::write(wrfda_dir.join("namelist.input"), "&wrfvar1\n/\n").unwrap();
    let conventional = wrfda_dir.join(format!("wrfvar_output_conv_{START}"));
    fs::write(&conventional, "OLD_CONV\n").unwrap();
    let analysis = wrfda_dir.join(format!("wrfvar_output_{START}"));

    let radar_config = radar_pass_config(&config);
    let report = Pipeline::new("test")
        .stage("3dvar d01", || run_wrfda_3dvar(&ctx, &config, None, None))
        .stage("check d01", || -> Result<(), WrfError> {
            assert_eq!(fs::read_to_string(&analysis)?, "REAL\n");
            assert!(!conventional.exists());
            Ok(())
        })
        .stage("3dvar radar", || run_wrfda_3dvar(&ctx, &radar_config, None, None))
        .run();
    assert!(report.is_success(), "{:?}", report.failure);

    assert_eq!(fs::read_to_string(&conventional).unwrap(), "REAL\n");
    assert_eq!(fs::read_link(wrfda_dir.join("fg")).unwrap(), conventional);
    assert_eq!(fs::read_to_string(&analysis).unwrap(), "REAL\n");
}
