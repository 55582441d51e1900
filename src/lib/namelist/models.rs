use std::{
    fmt::{self, Display},
    fs,
    path::Path,
};

use itertools::Itertools;
use log::debug;
use serde_json::Value as JsonValue;

use crate::config::Section;
use crate::helpers::WrfError;

use super::parser::parse_namelist;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Real(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Real(v) => write!(f, "{}", format_real(*v)),
            Scalar::Bool(true) => write!(f, ".true."),
            Scalar::Bool(false) => write!(f, ".false."),
            Scalar::Str(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

/// Fortran real literal, always carrying a decimal point or an exponent.
fn format_real(v: f64) -> String {
    if v != 0.0 && (v.abs() >= 1e15 || v.abs() < 1e-4) {
        format!("{v:e}")
    } else if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

impl Value {
    /// the first element of an array, or the scalar itself
    pub fn first(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Array(values) => values.first(),
        }
    }

    pub fn as_slice(&self) -> &[Scalar] {
        match self {
            Value::Scalar(s) => std::slice::from_ref(s),
            Value::Array(values) => values,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Array(values) => write!(f, "{}", values.iter().join(", ")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(Scalar::Int(v as i64))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Scalar(Scalar::Int(v as i64))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Real(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Scalar(Scalar::Str(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        let scalars = values
            .into_iter()
            .filter_map(|v| match v.into() {
                Value::Scalar(s) => Some(s),
                Value::Array(_) => None,
            })
            .collect();
        Value::Array(scalars)
    }
}

fn json_scalar(value: &JsonValue) -> Option<Scalar> {
    match value {
        JsonValue::Bool(b) => Some(Scalar::Bool(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Some(Scalar::Int(i)),
            None => n.as_f64().map(Scalar::Real),
        },
        JsonValue::String(s) => Some(Scalar::Str(s.clone())),
        _ => None,
    }
}

impl TryFrom<&JsonValue> for Value {
    type Error = WrfError;

    fn try_from(value: &JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    json_scalar(item).ok_or_else(|| {
                        WrfError::config(format!("Unsupported namelist array element {item}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => json_scalar(other)
                .map(Value::Scalar)
                .ok_or_else(|| WrfError::config(format!("Unsupported namelist value {other}"))),
        }
    }
}

/// One `&name ... /` group, keys in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    entries: Vec<(String, Value)>,
}

impl Group {
    pub fn get(&self, key: &str) -> Option<&Value> {
        let key = key.to_lowercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Set a key, replacing any previous value (arrays included) in place.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let key = key.to_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let key = key.to_lowercase();
        let idx = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set one element (0-based) of an array, growing it with the same value.
    pub fn set_element(&mut self, key: &str, index: usize, value: Scalar) {
        let mut values = self
            .get(key)
            .map(|v| v.as_slice().to_vec())
            .unwrap_or_default();
        if values.len() <= index {
            values.resize(index + 1, value.clone());
        }
        values[index] = value;
        self.set(key, Value::Array(values));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply configuration overrides; keys not named keep their value.
    pub fn apply(&mut self, overrides: &Section) -> Result<(), WrfError> {
        for (key, value) in overrides {
            let value = Value::try_from(value)
                .map_err(|err| WrfError::config(format!("{key}: {err}")))?;
            self.set(key, value);
        }
        Ok(())
    }
}

/// A Fortran namelist document, groups in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namelist {
    groups: Vec<(String, Group)>,
}

impl Namelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Namelist, WrfError> {
        parse_namelist(text)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Namelist, WrfError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            WrfError::precondition(format!("Cannot read namelist {}: {err}", path.display()))
        })?;
        parse_namelist(&text)
            .map_err(|err| WrfError::config(format!("{}: {err}", path.display())))
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), WrfError> {
        let path = path.as_ref();
        debug!("Write namelist {}", path.display());
        fs::write(path, self.to_string())
            .map_err(|err| format!("Cannot write namelist {}: {err}", path.display()))?;
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        let name = name.to_lowercase();
        self.groups.iter().find(|(n, _)| *n == name).map(|(_, g)| g)
    }

    /// the group, created empty at the end of the document when missing
    pub fn group_mut(&mut self, name: &str) -> &mut Group {
        let name = name.to_lowercase();
        let idx = match self.groups.iter().position(|(n, _)| *n == name) {
            Some(idx) => idx,
            None => {
                self.groups.push((name, Group::default()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx].1
    }

    pub fn contains_group(&self, name: &str) -> bool {
        self.group(name).is_some()
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&Value> {
        self.group(group).and_then(|g| g.get(key))
    }

    pub fn set(&mut self, group: &str, key: &str, value: impl Into<Value>) {
        self.group_mut(group).set(key, value);
    }

    pub fn remove(&mut self, group: &str, key: &str) -> Option<Value> {
        let name = group.to_lowercase();
        self.groups
            .iter_mut()
            .find(|(n, _)| *n == name)
            .and_then(|(_, g)| g.remove(key))
    }

    /// rename a key keeping its value, a missing key is left alone
    pub fn rename(&mut self, group: &str, from: &str, to: &str) {
        if let Some(value) = self.remove(group, from) {
            self.set(group, to, value);
        }
    }

    /// Apply `{group: {key: value}}` overrides.
    pub fn apply(&mut self, group: &str, overrides: &Section) -> Result<(), WrfError> {
        self.group_mut(group).apply(overrides)
    }

    /// Add the groups of `other` that this document does not have.
    pub fn merge_missing(&mut self, other: &Namelist) {
        for (name, group) in &other.groups {
            if !self.contains_group(name) {
                self.groups.push((name.clone(), group.clone()));
            }
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.groups.iter().map(|(n, g)| (n.as_str(), g))
    }

    pub(crate) fn push_group(&mut self, name: String, group: Group) {
        match self.groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                for (key, value) in group.entries {
                    existing.set(&key, value);
                }
            }
            None => self.groups.push((name, group)),
        }
    }
}

impl Display for Namelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, group)) in self.groups.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "&{name}")?;
            for (key, value) in group.iter() {
                writeln!(f, "    {key} = {value}")?;
            }
            writeln!(f, "/")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Namelist {
        Namelist::parse(
            "&time_control\n run_hours = 36,\n start_year = 2000, 2000,\n history_outname = 'wrfout_d<domain>_<date>'\n/\n&domains\n time_step = 180,\n e_we = 74, 112,\n/\n",
        )
        .unwrap()
    }

    #[test]
    fn overrides_keep_untouched_keys() {
        let mut nml = template();
        let overrides: Section = serde_json::from_value(json!({
            "run_hours": 6,
            "start_year": [2019],
            "debug_level": 0
        }))
        .unwrap();
        nml.apply("time_control", &overrides).unwrap();

        assert_eq!(nml.get("time_control", "run_hours"), Some(&Value::from(6)));
        assert_eq!(
            nml.get("time_control", "start_year"),
            Some(&Value::Array(vec![Scalar::Int(2019)]))
        );
        assert_eq!(nml.get("time_control", "debug_level"), Some(&Value::from(0)));
        assert_eq!(
            nml.get("time_control", "history_outname"),
            Some(&Value::from("wrfout_d<domain>_<date>"))
        );
        assert_eq!(nml.get("domains", "time_step"), Some(&Value::from(180)));
    }

    #[test]
    fn unknown_groups_are_created_last() {
        let mut nml = template();
        nml.set("physics", "mp_physics", 8);
        let names: Vec<&str> = nml.groups().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["time_control", "domains", "physics"]);
    }

    #[test]
    fn writes_fortran_literals() {
        let mut nml = Namelist::new();
        nml.set("share", "max_dom", 1);
        nml.set("geogrid", "dx", 9000.0);
        nml.set("geogrid", "truelat1", 30.5);
        nml.set("geogrid", "geog_data_path", "/data/it's");
        nml.set("wrfvar1", "var4d", false);
        nml.set("share", "start_date", vec!["2019-06-01_00:00:00", "2019-06-01_00:00:00"]);
        let text = nml.to_string();
        assert!(text.contains("&share\n    max_dom = 1\n"));
        assert!(text.contains("start_date = '2019-06-01_00:00:00', '2019-06-01_00:00:00'"));
        assert!(text.contains("dx = 9000.0"));
        assert!(text.contains("truelat1 = 30.5"));
        assert!(text.contains("geog_data_path = '/data/it''s'"));
        assert!(text.contains("var4d = .false."));
        assert_eq!(Namelist::parse(&text).unwrap(), nml);
    }

    #[test]
    fn merge_and_rename() {
        let mut nml = template();
        let other = Namelist::parse("&domains\n time_step = 60\n/\n&physics\n mp_physics = 3\n/").unwrap();
        nml.merge_missing(&other);
        assert_eq!(nml.get("domains", "time_step"), Some(&Value::from(180)));
        assert_eq!(nml.get("physics", "mp_physics"), Some(&Value::from(3)));

        nml.rename("domains", "e_we", "e_we_renamed");
        assert!(nml.get("domains", "e_we").is_none());
        assert!(nml.get("domains", "e_we_renamed").is_some());
    }

    #[test]
    fn rejects_nested_objects() {
        let overrides: Section = serde_json::from_value(json!({"bad": {"x": 1}})).unwrap();
        let mut group = Group::default();
        assert!(group.apply(&overrides).is_err());
    }
}
