use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::helpers::WrfError;

/// key/value pairs of one namelist group as read from the configuration
pub type Section = BTreeMap<String, Value>;

/// A per-domain parameter may be written either as a scalar or as an array.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    /// Expand the value to exactly `n` elements. A scalar is repeated, an
    /// array must already have `n` elements.
    pub fn broadcast(&self, key: &str, n: usize) -> Result<Vec<T>, WrfError> {
        match self {
            OneOrMany::One(value) => Ok(vec![value.clone(); n]),
            OneOrMany::Many(values) if values.len() == n => Ok(values.clone()),
            OneOrMany::Many(values) => Err(WrfError::config(format!(
                "Parameter {key} has {} values but max_dom is {n}!",
                values.len()
            ))),
        }
    }

    pub fn first(&self) -> Option<&T> {
        match self {
            OneOrMany::One(value) => Some(value),
            OneOrMany::Many(values) => values.first(),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DomainsConfig {
    pub max_dom: Option<usize>,
    pub dx: Option<OneOrMany<f64>>,
    pub dy: Option<OneOrMany<f64>>,
    pub e_we: Option<OneOrMany<i64>>,
    pub e_sn: Option<OneOrMany<i64>>,
    pub e_vert: Option<OneOrMany<i64>>,
    pub parent_grid_ratio: Option<OneOrMany<i64>>,
    pub parent_time_step_ratio: Option<OneOrMany<i64>>,
    pub i_parent_start: Option<OneOrMany<i64>>,
    pub j_parent_start: Option<OneOrMany<i64>>,
    pub time_step: Option<i64>,
    /// every other `domains` namelist entry, passed through untouched
    #[serde(flatten)]
    pub extra: Section,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackgroundConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub vtable: Option<String>,
    pub dir_pattern: Option<String>,
    pub file_pattern: Option<OneOrMany<String>>,
    pub interval_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WrfdaSettings {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub ob_format: Option<i64>,
    pub prepbufr_source: Option<String>,
    pub time_window: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObsprocSettings {
    pub output_format: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CustomConfig {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub forecast_hours: Option<i64>,
    pub background: Option<BackgroundConfig>,
    pub wrfda: Option<WrfdaSettings>,
    pub obsproc: Option<ObsprocSettings>,
    pub run_wrfda_on_dom: Option<usize>,
    pub tag: Option<String>,
    /// orchestration values not covered above (tool roots among others)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Configuration file as written by the operator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub domains: Option<DomainsConfig>,
    pub custom: Option<CustomConfig>,
    #[serde(default)]
    pub geogrid: Section,
    #[serde(default)]
    pub share: Section,
    /// `physics`, `dynamics`, `time_control`, `wrfvar1`..`wrfvar22`, ...
    #[serde(flatten)]
    pub sections: BTreeMap<String, Section>,
}

/// Domain grid with every per-domain array expanded to `max_dom` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Domains {
    pub max_dom: usize,
    pub dx: Vec<f64>,
    pub dy: Vec<f64>,
    pub e_we: Vec<i64>,
    pub e_sn: Vec<i64>,
    pub e_vert: Vec<i64>,
    pub grid_id: Vec<i64>,
    pub parent_id: Vec<i64>,
    pub parent_grid_ratio: Vec<i64>,
    pub parent_time_step_ratio: Vec<i64>,
    pub i_parent_start: Vec<i64>,
    pub j_parent_start: Vec<i64>,
    pub time_step: i64,
    pub extra: Section,
}

impl Domains {
    /// `domains` namelist entries, derived values included
    pub fn to_section(&self) -> Section {
        let mut section = self.extra.clone();
        section.insert("max_dom".into(), Value::from(self.max_dom));
        section.insert("dx".into(), Value::from(self.dx.clone()));
        section.insert("dy".into(), Value::from(self.dy.clone()));
        section.insert("e_we".into(), Value::from(self.e_we.clone()));
        section.insert("e_sn".into(), Value::from(self.e_sn.clone()));
        section.insert("e_vert".into(), Value::from(self.e_vert.clone()));
        section.insert("grid_id".into(), Value::from(self.grid_id.clone()));
        section.insert("parent_id".into(), Value::from(self.parent_id.clone()));
        section.insert(
            "parent_grid_ratio".into(),
            Value::from(self.parent_grid_ratio.clone()),
        );
        section.insert(
            "parent_time_step_ratio".into(),
            Value::from(self.parent_time_step_ratio.clone()),
        );
        section.insert(
            "i_parent_start".into(),
            Value::from(self.i_parent_start.clone()),
        );
        section.insert(
            "j_parent_start".into(),
            Value::from(self.j_parent_start.clone()),
        );
        section.insert("time_step".into(), Value::from(self.time_step));
        section
    }

    /// the scalar grid values of a single domain, as WRFDA wants them
    pub fn single_domain_section(&self, dom_idx: usize) -> Section {
        let mut section = Section::new();
        section.insert("max_dom".into(), Value::from(1));
        section.insert("e_we".into(), Value::from(self.e_we[dom_idx]));
        section.insert("e_sn".into(), Value::from(self.e_sn[dom_idx]));
        section.insert("e_vert".into(), Value::from(self.e_vert[dom_idx]));
        section.insert("dx".into(), Value::from(self.dx[dom_idx]));
        section.insert("dy".into(), Value::from(self.dy[dom_idx]));
        section.insert("grid_id".into(), Value::from(self.grid_id[dom_idx]));
        section.insert("parent_id".into(), Value::from(self.parent_id[dom_idx]));
        section.insert(
            "i_parent_start".into(),
            Value::from(self.i_parent_start[dom_idx]),
        );
        section.insert(
            "j_parent_start".into(),
            Value::from(self.j_parent_start[dom_idx]),
        );
        section.insert(
            "parent_grid_ratio".into(),
            Value::from(self.parent_grid_ratio[dom_idx]),
        );
        section.insert(
            "parent_time_step_ratio".into(),
            Value::from(self.parent_time_step_ratio[dom_idx]),
        );
        section
    }
}

/// Data assimilation settings after defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct WrfdaConfig {
    pub kind: String,
    pub ob_format: i64,
    pub prepbufr_source: Option<String>,
    pub time_window: i64,
}

/// Validated configuration shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct Config {
    pub domains: Domains,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub forecast_hours: i64,
    pub background: BackgroundConfig,
    pub wrfda: WrfdaConfig,
    pub obsproc_output_format: i64,
    pub run_wrfda_on_dom: usize,
    pub tag: String,
    pub geogrid: Section,
    pub share: Section,
    pub sections: BTreeMap<String, Section>,
    /// free `custom` values, used as the lowest priority source of tool roots
    pub custom_extra: BTreeMap<String, Value>,
}

impl Config {
    pub fn max_dom(&self) -> usize {
        self.domains.max_dom
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// the section, created empty when missing
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        self.sections.entry(name.to_string()).or_default()
    }

    pub fn value(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    pub fn flag(&self, section: &str, key: &str) -> bool {
        self.value(section, key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn cv_options(&self) -> Option<i64> {
        self.value("wrfvar7", "cv_options").and_then(Value::as_i64)
    }

    /// `interval_seconds` of the background data, 6 hours when not configured
    pub fn interval_seconds(&self) -> i64 {
        self.background
            .interval_seconds
            .or_else(|| self.share.get("interval_seconds").and_then(Value::as_i64))
            .unwrap_or(21600)
    }

    /// Copy of the configuration with a different forecast window, keeping
    /// the same end of forecast unless `forecast_hours` says otherwise.
    pub fn with_window(&self, start_time: DateTime<Utc>, forecast_hours: i64) -> Config {
        let mut config = self.clone();
        config.start_time = start_time;
        config.forecast_hours = forecast_hours;
        config.end_time = start_time + Duration::hours(forecast_hours);
        config
    }

    /// Overlay the observation toggles used by the radar assimilation pass.
    pub fn apply_radar_overrides(&mut self) {
        self.section_mut("wrfvar1")
            .insert("write_increments".into(), Value::Bool(true));
        self.section_mut("wrfvar2")
            .insert("calc_w_increment".into(), Value::Bool(true));
        let wrfvar4 = self.section_mut("wrfvar4");
        for key in [
            "use_radarobs",
            "use_radar_rv",
            "use_radar_rqv",
            "use_radar_rhv",
        ] {
            wrfvar4.insert(key.into(), Value::Bool(true));
        }
        for key in [
            "use_synopobs",
            "use_shipsobs",
            "use_metarobs",
            "use_soundobs",
            "use_pilotobs",
            "use_airepobs",
            "use_geoamvobs",
            "use_polaramvobs",
            "use_bogusobs",
            "use_buoyobs",
            "use_profilerobs",
            "use_satemobs",
            "use_gpspwobs",
            "use_gpsrefobs",
            "use_3dvar_phy",
            "use_airsretobs",
        ] {
            wrfvar4.insert(key.into(), Value::Bool(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_scalar_and_check_arrays() {
        let one: OneOrMany<i64> = OneOrMany::One(100);
        assert_eq!(one.broadcast("e_we", 3).unwrap(), vec![100, 100, 100]);

        let many: OneOrMany<i64> = OneOrMany::Many(vec![100, 121]);
        assert_eq!(many.broadcast("e_we", 2).unwrap(), vec![100, 121]);

        let err = many.broadcast("e_we", 3).unwrap_err();
        assert!(err.to_string().contains("e_we"));
    }

    #[test]
    fn untagged_per_domain_values() {
        let raw: DomainsConfig =
            serde_json::from_str(r#"{"max_dom": 2, "dx": [9000, 3000], "e_we": 100}"#).unwrap();
        assert_eq!(raw.dx, Some(OneOrMany::Many(vec![9000.0, 3000.0])));
        assert_eq!(raw.e_we, Some(OneOrMany::One(100)));
    }
}
