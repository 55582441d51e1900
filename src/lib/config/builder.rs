use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use chrono::Duration;
use log::{debug, warn};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};

use crate::constants::DEFAULT_TIME_WINDOW_MINUTES;
use crate::helpers::WrfError;

use super::{
    models::{
        Config, CustomConfig, Domains, DomainsConfig, OneOrMany, RawConfig, Section, WrfdaConfig,
    },
    time::parse_time,
};

/// Default time step (seconds) for the outer domain resolution (meters).
pub fn default_time_step(dx: f64) -> i64 {
    match dx {
        dx if dx >= 30000.0 => 120,
        dx if dx >= 25000.0 => 120,
        dx if dx >= 20000.0 => 120,
        dx if dx >= 15000.0 => 90,
        dx if dx >= 10000.0 => 60,
        dx if dx >= 5000.0 => 30,
        dx if dx >= 2500.0 => 10,
        _ => 5,
    }
}

fn mandatory<T: Clone>(value: &Option<T>, key: &str) -> Result<T, WrfError> {
    value
        .clone()
        .ok_or_else(|| WrfError::config(format!("Parameter {key} is not in configuration file!")))
}

fn build_domains(raw: &DomainsConfig) -> Result<Domains, WrfError> {
    let max_dom = mandatory(&raw.max_dom, "max_dom")?;
    if max_dom == 0 {
        return Err(WrfError::config("Parameter max_dom must be at least 1!"));
    }
    let dx = mandatory(&raw.dx, "dx")?.broadcast("dx", max_dom)?;
    let dy = mandatory(&raw.dy, "dy")?.broadcast("dy", max_dom)?;
    let e_we = mandatory(&raw.e_we, "e_we")?.broadcast("e_we", max_dom)?;
    let e_sn = mandatory(&raw.e_sn, "e_sn")?.broadcast("e_sn", max_dom)?;
    let e_vert = mandatory(&raw.e_vert, "e_vert")?.broadcast("e_vert", max_dom)?;

    let (i_parent_start, j_parent_start) = if max_dom == 1 {
        (vec![1], vec![1])
    } else {
        (
            mandatory(&raw.i_parent_start, "i_parent_start")?
                .broadcast("i_parent_start", max_dom)?,
            mandatory(&raw.j_parent_start, "j_parent_start")?
                .broadcast("j_parent_start", max_dom)?,
        )
    };

    let parent_grid_ratio = match (&raw.parent_grid_ratio, max_dom) {
        (_, 1) => vec![1],
        (Some(ratio), _) => ratio.broadcast("parent_grid_ratio", max_dom)?,
        (None, _) => std::iter::once(1)
            .chain(dx.windows(2).map(|pair| (pair[0] / pair[1]).round() as i64))
            .collect(),
    };
    // nests step in time as they do in space unless told otherwise
    let parent_time_step_ratio = match (&raw.parent_time_step_ratio, max_dom) {
        (_, 1) => vec![1],
        (Some(ratio), _) => ratio.broadcast("parent_time_step_ratio", max_dom)?,
        (None, _) => parent_grid_ratio.clone(),
    };

    let time_step = raw.time_step.unwrap_or_else(|| default_time_step(dx[0]));

    let mut extra = raw.extra.clone();
    // derived below, never taken from the file
    extra.remove("grid_id");
    extra.remove("parent_id");

    Ok(Domains {
        max_dom,
        dx,
        dy,
        e_we,
        e_sn,
        e_vert,
        grid_id: (1..=max_dom as i64).collect(),
        parent_id: (0..max_dom as i64).collect(),
        parent_grid_ratio,
        parent_time_step_ratio,
        i_parent_start,
        j_parent_start,
        time_step,
        extra,
    })
}

fn build_wrfda(custom: &CustomConfig, sections: &BTreeMap<String, Section>) -> WrfdaConfig {
    let settings = custom.wrfda.clone().unwrap_or_default();
    let ob_format = settings
        .ob_format
        .or_else(|| {
            sections
                .get("wrfvar3")
                .and_then(|s| s.get("ob_format"))
                .and_then(Value::as_i64)
        })
        .unwrap_or(2);
    let prepbufr_source = match (settings.prepbufr_source, ob_format) {
        (Some(source), _) => Some(source),
        (None, 1) => Some("gdas".to_string()),
        (None, _) => None,
    };
    WrfdaConfig {
        kind: settings.kind.unwrap_or_else(|| "3dvar".to_string()),
        ob_format,
        prepbufr_source,
        time_window: settings.time_window.unwrap_or(DEFAULT_TIME_WINDOW_MINUTES),
    }
}

impl RawConfig {
    /// Validate and derive every value the stages need.
    pub fn resolve(self) -> Result<Config, WrfError> {
        let raw_domains = self
            .domains
            .as_ref()
            .ok_or_else(|| WrfError::config("Section domains is not in configuration file!"))?;
        let domains = build_domains(raw_domains)?;

        let custom = self
            .custom
            .clone()
            .ok_or_else(|| WrfError::config("Section custom is not in configuration file!"))?;
        let start_time = parse_time(&mandatory(&custom.start_time, "start_time")?)?;
        let (end_time, forecast_hours) = match (&custom.end_time, custom.forecast_hours) {
            (Some(end_time), _) => {
                let end_time = parse_time(end_time)?;
                (end_time, (end_time - start_time).num_hours())
            }
            (None, Some(hours)) => (start_time + Duration::hours(hours), hours),
            (None, None) => {
                return Err(WrfError::config(
                    "Parameter forecast_hours is not in configuration file!",
                ))
            }
        };
        if end_time < start_time {
            return Err(WrfError::config("end_time is before start_time!"));
        }

        let mut sections = self.sections;
        let wrfda = build_wrfda(&custom, &sections);
        sections
            .entry("wrfvar3".to_string())
            .or_default()
            .insert("ob_format".into(), Value::from(wrfda.ob_format));

        let mut geogrid = self.geogrid;
        geogrid.insert("e_we".into(), Value::from(domains.e_we.clone()));
        geogrid.insert("e_sn".into(), Value::from(domains.e_sn.clone()));
        geogrid.insert(
            "parent_grid_ratio".into(),
            Value::from(domains.parent_grid_ratio.clone()),
        );
        geogrid.insert(
            "i_parent_start".into(),
            Value::from(domains.i_parent_start.clone()),
        );
        geogrid.insert(
            "j_parent_start".into(),
            Value::from(domains.j_parent_start.clone()),
        );
        // WPS numbers parents from 1, d01 is its own parent
        let wps_parent_id: Vec<i64> = domains.parent_id.iter().map(|id| (*id).max(1)).collect();
        geogrid.insert("parent_id".into(), Value::from(wps_parent_id));
        geogrid.insert("dx".into(), Value::from(domains.dx[0]));
        geogrid.insert("dy".into(), Value::from(domains.dy[0]));

        let run_wrfda_on_dom = custom.run_wrfda_on_dom.unwrap_or(0);
        if run_wrfda_on_dom >= domains.max_dom {
            return Err(WrfError::config(format!(
                "run_wrfda_on_dom {run_wrfda_on_dom} is out of range for max_dom {}!",
                domains.max_dom
            )));
        }

        let background = custom.background.clone().unwrap_or_default();
        if let Some(OneOrMany::Many(patterns)) = &background.file_pattern {
            if patterns.is_empty() {
                return Err(WrfError::config("background.file_pattern is empty!"));
            }
        }

        Ok(Config {
            domains,
            start_time,
            end_time,
            forecast_hours,
            background,
            wrfda,
            obsproc_output_format: custom
                .obsproc
                .as_ref()
                .and_then(|o| o.output_format)
                .unwrap_or(2),
            run_wrfda_on_dom,
            tag: custom.tag.clone().unwrap_or_else(|| "wrf-scripts".to_string()),
            geogrid,
            share: self.share,
            sections,
            custom_extra: custom.extra,
        })
    }
}

impl Config {
    /// Load from a JSON (or YAML) file, or from literal JSON text.
    pub fn load(config_json: &str) -> Result<Config, WrfError> {
        let raw = if Path::new(config_json).is_file() {
            Self::read_file(config_json)?
        } else {
            serde_json::from_str::<RawConfig>(config_json).map_err(|err| {
                WrfError::config(format!("{config_json} is not a JSON file or text! ({err})"))
            })?
        };
        raw.resolve()
    }

    fn read_file(config_file: &str) -> Result<RawConfig, WrfError> {
        let mut file = File::open(config_file)
            .map_err(|err| format!("Cannot open config file {config_file}: {err}"))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|err| format!("Cannot read config file {config_file}: {err}"))?;

        if config_file.ends_with(".yaml") || config_file.ends_with(".yml") {
            serde_yaml::from_str(&contents).map_err(|err| {
                WrfError::config(format!("Cannot parse config file {config_file}: {err}"))
            })
        } else {
            serde_json::from_str(&contents).map_err(|err| {
                WrfError::config(format!("Cannot parse config file {config_file}: {err}"))
            })
        }
    }
}

/// Directories a run can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter)]
pub enum Root {
    #[strum(serialize = "wrf")]
    Wrf,
    #[strum(serialize = "wps")]
    Wps,
    #[strum(serialize = "wrfda")]
    Wrfda,
    #[strum(serialize = "wrfplus")]
    Wrfplus,
    #[strum(serialize = "geog")]
    Geog,
    #[strum(serialize = "bkg")]
    Bkg,
    #[strum(serialize = "littler")]
    Littler,
    #[strum(serialize = "prepbufr")]
    Prepbufr,
    #[strum(serialize = "work")]
    Work,
}

impl Root {
    pub fn env_var(&self) -> &'static str {
        match self {
            Root::Wrf => "WRF_ROOT",
            Root::Wps => "WPS_ROOT",
            Root::Wrfda => "WRFDA_ROOT",
            Root::Wrfplus => "WRFPLUS_ROOT",
            Root::Geog => "WPS_GEOG_ROOT",
            Root::Bkg => "BKG_ROOT",
            Root::Littler => "LITTLER_ROOT",
            Root::Prepbufr => "PREPBUFR_ROOT",
            Root::Work => "WORK_ROOT",
        }
    }

    pub fn option(&self) -> String {
        format!("--{self}-root")
    }

    /// key looked up in the `custom` configuration section
    pub fn config_key(&self) -> String {
        format!("{self}_root")
    }

    /// subdirectory of `--codes` holding the tool
    pub fn codes_subdir(&self) -> Option<&'static str> {
        match self {
            Root::Wrf => Some("WRF"),
            Root::Wps => Some("WPS"),
            Root::Wrfda => Some("WRFDA"),
            Root::Wrfplus => Some("WRFPLUS"),
            Root::Geog => Some("WPS_GEOG"),
            _ => None,
        }
    }
}

/// Run settings gathered once at process start. Every lookup follows
/// CLI flag > environment variable > `custom` config value > `--codes` default.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    cli: HashMap<Root, PathBuf>,
    env: HashMap<String, String>,
    custom: BTreeMap<String, Value>,
    codes: Option<PathBuf>,
}

impl Settings {
    pub fn new(env: HashMap<String, String>) -> Self {
        Settings {
            env,
            ..Default::default()
        }
    }

    pub fn with_cli(mut self, root: Root, path: Option<impl Into<PathBuf>>) -> Self {
        if let Some(path) = path {
            self.cli.insert(root, path.into());
        }
        self
    }

    pub fn with_codes(mut self, codes: Option<impl Into<PathBuf>>) -> Self {
        self.codes = codes.map(Into::into);
        self
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.custom = config.custom_extra.clone();
        self
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Resolve a root without touching the filesystem.
    pub fn lookup(&self, root: Root) -> Option<PathBuf> {
        if let Some(path) = self.cli.get(&root) {
            return Some(path.clone());
        }
        if let Some(path) = self.env(root.env_var()) {
            return Some(PathBuf::from(path));
        }
        if let Some(path) = self.custom.get(&root.config_key()).and_then(Value::as_str) {
            return Some(PathBuf::from(path));
        }
        match (&self.codes, root.codes_subdir()) {
            (Some(codes), Some(subdir)) => Some(codes.join(subdir)),
            _ => None,
        }
    }

    /// Resolve a root that must already exist.
    pub fn root(&self, root: Root) -> Result<PathBuf, WrfError> {
        let path = self.lookup(root).ok_or_else(|| {
            WrfError::environment(format!(
                "Option {} or environment variable {} need to be set!",
                root.option(),
                root.env_var()
            ))
        })?;
        let path = absolute(&path)?;
        if !path.is_dir() {
            return Err(WrfError::environment(format!(
                "Directory {} does not exist!",
                path.display()
            )));
        }
        debug!("{} = {}", root.env_var(), path.display());
        Ok(path)
    }

    /// Resolve the work root, creating it when needed.
    pub fn work_root(&self) -> Result<PathBuf, WrfError> {
        let path = self.lookup(Root::Work).ok_or_else(|| {
            WrfError::environment(format!(
                "Option {} or environment variable {} need to be set!",
                Root::Work.option(),
                Root::Work.env_var()
            ))
        })?;
        let path = absolute(&path)?;
        if !path.is_dir() {
            warn!("Create work directory {}.", path.display());
            std::fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    /// The observation root matching the configured observation format.
    pub fn observation_root(&self, config: &Config) -> Result<PathBuf, WrfError> {
        match config.wrfda.ob_format {
            1 => self.root(Root::Prepbufr),
            _ => self.root(Root::Littler),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, WrfError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::helpers::ErrorKind;

    #[test]
    fn time_step_table() {
        let cases = [
            (35000.0, 120),
            (27000.0, 120),
            (22000.0, 120),
            (17000.0, 90),
            (12000.0, 60),
            (7000.0, 30),
            (3000.0, 10),
            (1000.0, 5),
        ];
        for (dx, expected) in cases {
            assert_eq!(default_time_step(dx), expected, "dx = {dx}");
        }
    }

    #[test]
    fn single_domain_scenario() {
        let config = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 9000, "dy": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
                "custom": {"start_time": "2019060100", "forecast_hours": 6}}"#,
        )
        .unwrap();
        assert_eq!(
            config.end_time,
            Utc.with_ymd_and_hms(2019, 6, 1, 6, 0, 0).unwrap()
        );
        assert_eq!(config.domains.parent_grid_ratio, vec![1]);
        assert_eq!(config.domains.time_step, 30);
        assert_eq!(config.wrfda.ob_format, 2);
        assert_eq!(config.wrfda.time_window, 360);
        assert_eq!(config.geogrid["dx"], Value::from(9000.0));
    }

    #[test]
    fn nested_domains_derive_ratios() {
        let config = Config::load(
            r#"{"domains": {"max_dom": 3, "dx": [27000, 9000, 3000], "dy": [27000, 9000, 3000],
                            "e_we": [100, 121, 151], "e_sn": [90, 121, 151], "e_vert": 40,
                            "parent_time_step_ratio": [1, 3, 3],
                            "i_parent_start": [1, 30, 40], "j_parent_start": [1, 25, 40]},
                "custom": {"start_time": "2019060100", "end_time": "2019060212"}}"#,
        )
        .unwrap();
        let domains = &config.domains;
        assert_eq!(domains.parent_grid_ratio, vec![1, 3, 3]);
        assert_eq!(domains.grid_id, vec![1, 2, 3]);
        assert_eq!(domains.parent_id, vec![0, 1, 2]);
        assert_eq!(domains.e_vert, vec![40, 40, 40]);
        assert_eq!(domains.time_step, 120);
        assert_eq!(config.forecast_hours, 36);
        for key in ["dx", "e_we", "parent_grid_ratio", "i_parent_start"] {
            let n = domains.to_section()[key].as_array().unwrap().len();
            assert_eq!(n, 3, "{key}");
        }
    }

    #[test]
    fn mismatched_array_names_the_key() {
        let err = Config::load(
            r#"{"domains": {"max_dom": 2, "dx": [9000, 3000], "dy": [9000, 3000],
                            "e_we": [100], "e_sn": [100, 100], "e_vert": 30,
                            "parent_time_step_ratio": [1, 3],
                            "i_parent_start": [1, 30], "j_parent_start": [1, 30]},
                "custom": {"start_time": "2019060100", "forecast_hours": 6}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("e_we"));
    }

    #[test]
    fn missing_mandatory_key() {
        let err = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 9000, "e_we": 100, "e_sn": 100, "e_vert": 30},
                "custom": {"start_time": "2019060100", "forecast_hours": 6}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("dy"));

        let err = Config::load("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn prepbufr_defaults_to_gdas() {
        let config = Config::load(
            r#"{"domains": {"max_dom": 1, "dx": 20000, "dy": 20000, "e_we": 50, "e_sn": 50, "e_vert": 30},
                "custom": {"start_time": "2019060100", "forecast_hours": 6, "wrfda": {"ob_format": 1}}}"#,
        )
        .unwrap();
        assert_eq!(config.wrfda.prepbufr_source.as_deref(), Some("gdas"));
        assert_eq!(config.value("wrfvar3", "ob_format"), Some(&Value::from(1)));
    }

    #[test]
    fn yaml_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "domains:\n  max_dom: 1\n  dx: 12000\n  dy: 12000\n  e_we: 80\n  e_sn: 80\n  e_vert: 35\ncustom:\n  start_time: '2020010100'\n  forecast_hours: 24\nphysics:\n  mp_physics: 8\n",
        )
        .unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.domains.time_step, 60);
        assert_eq!(config.value("physics", "mp_physics"), Some(&Value::from(8)));
    }

    #[test]
    fn settings_precedence() {
        let env = HashMap::from([("WRF_ROOT".to_string(), "/from/env".to_string())]);
        let settings = Settings::new(env.clone())
            .with_cli(Root::Wrf, Some("/from/cli"))
            .with_codes(Some("/codes"));
        assert_eq!(settings.lookup(Root::Wrf), Some(PathBuf::from("/from/cli")));

        let settings = Settings::new(env).with_codes(Some("/codes"));
        assert_eq!(settings.lookup(Root::Wrf), Some(PathBuf::from("/from/env")));
        assert_eq!(settings.lookup(Root::Wps), Some(PathBuf::from("/codes/WPS")));
        assert_eq!(settings.lookup(Root::Bkg), None);

        let err = settings.root(Root::Bkg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Environment);
        assert_eq!(
            err.message(),
            "Option --bkg-root or environment variable BKG_ROOT need to be set!"
        );
    }
}
