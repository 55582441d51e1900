use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use lazy_static::lazy_static;
use log::info;
use regex::{Captures, Regex};

use crate::config::{Config, OneOrMany, Root};
use crate::constants::BACKGROUND_CYCLE_HOURS;
use crate::helpers::{
    copy, ensure_dir, link, list_files, log_listing, remove_files_with_prefix, require_dir,
    tool_version, Version, WrfError,
};
use crate::namelist::{Namelist, Value};
use crate::runner::{run_step, Step, StepOutcome};

use super::{dom_name, read_template, RunContext};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\s*(\w+)\s*(?::([^}]*))?\}").expect("placeholder regex should compile");
}

const DEFAULT_GFS_FILE_PATTERN: &str = "gfs.t{bkg_start_time:%H}z.pgrb2.*.f{bkg_forecast_hour:03}";

/// Values a background directory or file pattern can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundTemplate {
    /// start of the background forecast cycle
    pub bkg_start_time: DateTime<Utc>,
    /// valid time of one background file
    pub bkg_time: DateTime<Utc>,
}

impl BackgroundTemplate {
    pub fn forecast_hour(&self) -> i64 {
        (self.bkg_time - self.bkg_start_time).num_hours()
    }
}

/// Render `{bkg_start_time:%Y%m%d}`, `{bkg_time:%H}` and
/// `{bkg_forecast_hour:03}` placeholders. Times default to `%Y%m%d%H`.
pub fn render_pattern(pattern: &str, values: &BackgroundTemplate) -> Result<String, WrfError> {
    let mut error = None;
    let rendered = PLACEHOLDER_RE.replace_all(pattern, |caps: &Captures| {
        let spec = caps.get(2).map(|m| m.as_str());
        match &caps[1] {
            "bkg_start_time" => values
                .bkg_start_time
                .format(spec.unwrap_or("%Y%m%d%H"))
                .to_string(),
            "bkg_time" => values.bkg_time.format(spec.unwrap_or("%Y%m%d%H")).to_string(),
            "bkg_forecast_hour" => {
                let hour = values.forecast_hour();
                match spec.and_then(|s| s.trim_start_matches('0').parse::<usize>().ok()) {
                    Some(width) => format!("{hour:0width$}"),
                    None => hour.to_string(),
                }
            }
            other => {
                error = Some(format!("Unknown placeholder {other} in {pattern}"));
                String::new()
            }
        }
    });
    match error {
        Some(msg) => Err(WrfError::config(msg)),
        None => Ok(rendered.into_owned()),
    }
}

/// `GRIBFILE.AAA`, `GRIBFILE.AAB`, ... as `link_grib.csh` names them
pub fn grib_link_name(index: usize) -> String {
    let letter = |n: usize| (b'A' + (n % 26) as u8) as char;
    format!(
        "GRIBFILE.{}{}{}",
        letter(index / 676),
        letter(index / 26),
        letter(index)
    )
}

/// Background valid times every `interval_seconds` from start to end.
pub fn background_times(
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    interval_seconds: i64,
) -> Result<Vec<DateTime<Utc>>, WrfError> {
    if interval_seconds <= 0 {
        return Err(WrfError::config("interval_seconds must be positive!"));
    }
    let mut times = vec![];
    let mut time = start_time;
    while time <= end_time {
        times.push(time);
        time += Duration::seconds(interval_seconds);
    }
    if times.is_empty() {
        return Err(WrfError::config(
            "Failed to set background times, check start_time and forecast_hours.",
        ));
    }
    Ok(times)
}

fn wrf_time(time: &DateTime<Utc>) -> String {
    crate::config::time::wrf_time(time)
}

pub fn config_wps(ctx: &RunContext, config: &Config) -> Result<(), WrfError> {
    let wps_root = ctx.root(Root::Wps)?;
    let geog_root = ctx.root(Root::Geog)?;
    let wps_work_dir = ctx.stage_dir("wps")?;

    let version = tool_version(&wps_root)?;
    if version < Version::new(3, 9, 1) {
        return Err(WrfError::environment(format!(
            "WPS {version} may not handle GFS data correctly! Please use WPS >= 3.9.1."
        )));
    }

    let max_dom = config.max_dom();
    let start = wrf_time(&config.start_time);
    let end = wrf_time(&config.end_time);

    let mut namelist = read_template(&wps_root.join("namelist.wps"))?;
    let share = namelist.group_mut("share");
    share.set("max_dom", max_dom);
    share.set("start_date", vec![start.clone(); max_dom]);
    share.set(
        "end_date",
        (0..max_dom)
            .map(|i| if i == 0 { end.clone() } else { start.clone() })
            .collect::<Vec<_>>(),
    );
    if let Some(interval_seconds) = config.background.interval_seconds {
        share.set("interval_seconds", interval_seconds);
    }
    namelist.apply("share", &config.share)?;

    namelist.set(
        "geogrid",
        "geog_data_path",
        geog_root.display().to_string(),
    );
    namelist.apply("geogrid", &config.geogrid)?;
    let tbl_path = wps_work_dir.display().to_string();
    namelist.set("geogrid", "opt_geogrid_tbl_path", tbl_path.clone());
    namelist.set("metgrid", "opt_metgrid_tbl_path", tbl_path);

    namelist.write(wps_work_dir.join("namelist.wps"))?;
    info!("Wrote {}/namelist.wps.", wps_work_dir.display());
    Ok(())
}

pub fn run_wps_geogrid(ctx: &RunContext, config: &Config) -> Result<StepOutcome, WrfError> {
    let wps_root = ctx.root(Root::Wps)?;
    let wps_work_dir = ctx.stage_dir("wps")?;
    require_namelist(&wps_work_dir)?;

    link(
        wps_root.join("geogrid/GEOGRID.TBL.ARW"),
        wps_work_dir.join("GEOGRID.TBL"),
    )?;
    let expected: Vec<PathBuf> = (0..config.max_dom())
        .map(|i| wps_work_dir.join(format!("geo_em.{}.nc", dom_name(i))))
        .collect();
    let step = Step::new("geogrid.exe", wps_work_dir.join("geogrid.log.0000"))
        .expect_files(&expected);

    let outcome = run_step(&step, ctx.force, || {
        remove_files_with_prefix(&wps_work_dir, "geo_em.d")?;
        ctx.execute(
            &wps_root.join("geogrid/src/geogrid.exe"),
            ctx.ntasks,
            &wps_work_dir,
            "geogrid.log.0000",
        )
    })?;
    log_listing(&expected);
    Ok(outcome)
}

fn require_namelist(wps_work_dir: &Path) -> Result<(), WrfError> {
    if wps_work_dir.join("namelist.wps").is_file() {
        Ok(())
    } else {
        Err(WrfError::precondition(format!(
            "{}/namelist.wps does not exist! Run config_wps first.",
            wps_work_dir.display()
        )))
    }
}

/// Resolved background settings for one run.
struct Background {
    kind: String,
    root: PathBuf,
    dir_pattern: Option<String>,
    file_patterns: Vec<String>,
}

impl Background {
    fn new(config: &Config, root: PathBuf) -> Result<Self, WrfError> {
        let kind = config
            .background
            .kind
            .clone()
            .unwrap_or_else(|| "gfs".to_string())
            .to_lowercase();
        let file_patterns = match &config.background.file_pattern {
            Some(OneOrMany::One(pattern)) => vec![pattern.clone()],
            Some(OneOrMany::Many(patterns)) => patterns.clone(),
            None if kind == "gfs" => vec![DEFAULT_GFS_FILE_PATTERN.to_string()],
            None => {
                return Err(WrfError::config(format!(
                    "Parameter background.file_pattern is needed for {kind} data!"
                )))
            }
        };
        Ok(Background {
            kind,
            root,
            dir_pattern: config.background.dir_pattern.clone(),
            file_patterns,
        })
    }

    fn dir(&self, values: &BackgroundTemplate) -> Result<PathBuf, WrfError> {
        match (&self.dir_pattern, self.kind.as_str()) {
            (Some(pattern), _) => Ok(self.root.join(render_pattern(pattern, values)?)),
            (None, "gfs") => Ok(self
                .root
                .join(format!("gfs.{}", values.bkg_start_time.format("%Y%m%d")))
                .join(values.bkg_start_time.format("%H").to_string())),
            (None, _) => Ok(self.root.clone()),
        }
    }

    fn find(&self, pattern: &str, values: &BackgroundTemplate) -> Result<Vec<PathBuf>, WrfError> {
        let full = self.dir(values)?.join(render_pattern(pattern, values)?);
        let full = full.display().to_string();
        let paths = glob::glob(&full)
            .map_err(|err| WrfError::config(format!("Invalid background pattern {full}: {err}")))?
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        Ok(paths)
    }

    fn cycle_exists(&self, cycle: DateTime<Utc>) -> Result<bool, WrfError> {
        let values = BackgroundTemplate {
            bkg_start_time: cycle,
            bkg_time: cycle,
        };
        Ok(!self.find(&self.file_patterns[0], &values)?.is_empty())
    }

    /// The latest cycle not after the start time whose first file exists,
    /// looking at the start day and the day before.
    fn find_cycle(&self, start_time: DateTime<Utc>) -> Result<DateTime<Utc>, WrfError> {
        for days_back in 0..2 {
            let date = (start_time - Duration::days(days_back)).date_naive();
            for hour in BACKGROUND_CYCLE_HOURS {
                if days_back == 0 && start_time.hour() < hour {
                    continue;
                }
                let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
                    continue;
                };
                let cycle = Utc.from_utc_datetime(&date.and_time(time));
                if self.cycle_exists(cycle)? {
                    return Ok(cycle);
                }
            }
        }
        Err(WrfError::precondition("Background data is not available!"))
    }
}

fn interval_seconds(wps_work_dir: &Path, config: &Config) -> Result<i64, WrfError> {
    let namelist = Namelist::read(wps_work_dir.join("namelist.wps"))?;
    Ok(namelist
        .get("share", "interval_seconds")
        .and_then(Value::first)
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| config.interval_seconds()))
}

fn link_vtable(wps_root: &Path, wps_work_dir: &Path, config: &Config, kind: &str) -> Result<(), WrfError> {
    let tables = wps_root.join("ungrib/Variable_Tables");
    let vtable = match &config.background.vtable {
        Some(vtable) if Path::new(vtable).is_file() => PathBuf::from(vtable),
        Some(vtable) => tables.join(format!("Vtable.{vtable}")),
        None if kind == "era5" => tables.join("Vtable.ERA-interim.pl"),
        None => tables.join(format!("Vtable.{}", kind.to_uppercase())),
    };
    link(vtable, wps_work_dir.join("Vtable"))
}

pub fn run_wps_ungrib_metgrid(ctx: &RunContext, config: &Config) -> Result<StepOutcome, WrfError> {
    let wps_root = ctx.root(Root::Wps)?;
    let bkg_root = ctx.root(Root::Bkg)?;
    let wps_work_dir = ctx.work_root.join("wps");
    require_dir(&wps_work_dir, "Run geogrid first.")?;
    require_namelist(&wps_work_dir)?;

    let background = Background::new(config, bkg_root)?;
    let version = tool_version(&wps_root)?;
    let new_gfs = Utc.with_ymd_and_hms(2019, 6, 11, 0, 0, 0).single();
    if background.kind == "gfs"
        && new_gfs.map(|t| config.start_time >= t).unwrap_or(false)
        && version < Version::new(4, 0, 0)
    {
        return Err(WrfError::environment(
            "WPS (>= 4.0) is needed to process new GFS data since 2019-06-12!",
        ));
    }

    link_vtable(&wps_root, &wps_work_dir, config, &background.kind)?;
    let bkg_start_time = background.find_cycle(config.start_time)?;
    info!("Use background starting from {bkg_start_time}.");

    let bkg_times = background_times(
        config.start_time,
        config.end_time,
        interval_seconds(&wps_work_dir, config)?,
    )?;

    let ungrib_files: Vec<PathBuf> = bkg_times
        .iter()
        .map(|t| wps_work_dir.join(format!("FILE:{}", t.format("%Y-%m-%d_%H"))))
        .collect();
    let ungrib = Step::new("ungrib.exe", wps_work_dir.join("ungrib.log")).expect_files(&ungrib_files);
    run_step(&ungrib, ctx.force, || {
        remove_files_with_prefix(&wps_work_dir, "GRIBFILE.")?;
        remove_files_with_prefix(&wps_work_dir, "FILE:")?;
        let bkg_dir = wps_work_dir.join("background");
        ensure_dir(&bkg_dir)?;
        remove_files_with_prefix(&bkg_dir, "")?;
        for bkg_time in &bkg_times {
            let values = BackgroundTemplate {
                bkg_start_time,
                bkg_time: *bkg_time,
            };
            for pattern in &background.file_patterns {
                let file = background
                    .find(pattern, &values)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        WrfError::precondition(format!(
                            "Failed to link background file! {} has no {}",
                            background.dir(&values).map(|d| d.display().to_string()).unwrap_or_default(),
                            pattern
                        ))
                    })?;
                let name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                link(
                    &file,
                    bkg_dir.join(format!("{}_{name}", bkg_time.format("%Y%m%d%H"))),
                )?;
            }
        }
        for (i, file) in list_files(&bkg_dir, |_| true).iter().enumerate() {
            link(file, wps_work_dir.join(grib_link_name(i)))?;
        }
        // surface and level files may be split, ungrib then needs one task
        ctx.execute(&wps_root.join("ungrib/ungrib.exe"), 1, &wps_work_dir, "ungrib.log")
    })?;
    log_listing(&ungrib_files);

    copy(
        wps_root.join("metgrid/METGRID.TBL.ARW"),
        wps_work_dir.join("METGRID.TBL"),
    )?;
    let met_files: Vec<PathBuf> = bkg_times
        .iter()
        .map(|t| wps_work_dir.join(format!("met_em.d01.{}.nc", wrf_time(t))))
        .collect();
    let metgrid = Step::new("metgrid.exe", wps_work_dir.join("metgrid.log.0000"))
        .expect_files(&met_files);
    let outcome = run_step(&metgrid, ctx.force, || {
        remove_files_with_prefix(&wps_work_dir, "met_em.")?;
        ctx.execute(
            &wps_root.join("metgrid/metgrid.exe"),
            ctx.ntasks,
            &wps_work_dir,
            "metgrid.log.0000",
        )
    })?;
    log_listing(&met_files);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn renders_background_patterns() {
        let values = BackgroundTemplate {
            bkg_start_time: at(2019, 6, 1, 12),
            bkg_time: at(2019, 6, 1, 18),
        };
        assert_eq!(
            render_pattern(DEFAULT_GFS_FILE_PATTERN, &values).unwrap(),
            "gfs.t12z.pgrb2.*.f006"
        );
        assert_eq!(
            render_pattern("gfs.{bkg_start_time:%Y%m%d}/{ bkg_time }", &values).unwrap(),
            "gfs.20190601/2019060118"
        );
        assert_eq!(
            render_pattern("f{bkg_forecast_hour}", &values).unwrap(),
            "f6"
        );
        assert!(render_pattern("{unknown}", &values).is_err());
    }

    #[test]
    fn grib_names_follow_link_grib() {
        assert_eq!(grib_link_name(0), "GRIBFILE.AAA");
        assert_eq!(grib_link_name(1), "GRIBFILE.AAB");
        assert_eq!(grib_link_name(26), "GRIBFILE.ABA");
        assert_eq!(grib_link_name(676), "GRIBFILE.BAA");
    }

    #[test]
    fn background_times_cover_the_window() {
        let times = background_times(at(2019, 6, 1, 0), at(2019, 6, 1, 12), 21600).unwrap();
        assert_eq!(times, vec![at(2019, 6, 1, 0), at(2019, 6, 1, 6), at(2019, 6, 1, 12)]);
        assert!(background_times(at(2019, 6, 1, 0), at(2019, 6, 1, 12), 0).is_err());
    }

    #[test]
    fn finds_latest_available_cycle() {
        let dir = tempfile::TempDir::new().unwrap();
        let cycle = dir.path().join("gfs.20190531/18");
        std::fs::create_dir_all(&cycle).unwrap();
        std::fs::write(cycle.join("gfs.t18z.pgrb2.0p25.f000"), "grib").unwrap();

        let config = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 9000, "dy": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
                "custom": {"start_time": "2019060103", "forecast_hours": 6}}"#,
        )
        .unwrap();
        let background = Background::new(&config, dir.path().to_path_buf()).unwrap();
        assert_eq!(background.find_cycle(config.start_time).unwrap(), at(2019, 5, 31, 18));

        let today = dir.path().join("gfs.20190601/00");
        std::fs::create_dir_all(&today).unwrap();
        std::fs::write(today.join("gfs.t00z.pgrb2.0p25.f000"), "grib").unwrap();
        assert_eq!(background.find_cycle(config.start_time).unwrap(), at(2019, 6, 1, 0));
    }
}
