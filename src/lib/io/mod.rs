//! NetCDF access for WRF family files. Without the `netcdf` feature the
//! attribute readers report nothing and content checks are skipped.

#[cfg(feature = "netcdf")]
mod files;

use std::path::Path;

use log::warn;
#[cfg(not(feature = "netcdf"))]
use ndarray::ArrayD;

use crate::helpers::WrfError;

pub const NETCDF_ENABLED: bool = cfg!(feature = "netcdf");

#[cfg(feature = "netcdf")]
pub use files::{dimension_len, global_attribute, read_field, read_times, write_field};

#[cfg(not(feature = "netcdf"))]
fn unsupported(path: &Path) -> WrfError {
    WrfError::environment(format!(
        "Cannot read {}: built without netcdf support!",
        path.display()
    ))
}

#[cfg(not(feature = "netcdf"))]
pub fn read_times(path: &Path) -> Result<Vec<String>, WrfError> {
    Err(unsupported(path))
}

#[cfg(not(feature = "netcdf"))]
pub fn global_attribute(_path: &Path, _name: &str) -> Result<Option<f64>, WrfError> {
    Ok(None)
}

#[cfg(not(feature = "netcdf"))]
pub fn dimension_len(_path: &Path, _name: &str) -> Result<Option<usize>, WrfError> {
    Ok(None)
}

#[cfg(not(feature = "netcdf"))]
pub fn read_field(path: &Path, _name: &str) -> Result<Option<ArrayD<f32>>, WrfError> {
    Err(unsupported(path))
}

#[cfg(not(feature = "netcdf"))]
pub fn write_field(
    path: &Path,
    _name: &str,
    _like: &str,
    _values: &ArrayD<f32>,
) -> Result<(), WrfError> {
    Err(unsupported(path))
}

/// Integer global attribute such as `NUM_LAND_CAT`.
pub fn global_attribute_i64(path: &Path, name: &str) -> Result<Option<i64>, WrfError> {
    Ok(global_attribute(path, name)?.map(|v| v.round() as i64))
}

/// Check the `Times` variable: the last entry must be `last`, and when
/// `first` is given the first entry too. Unreadable files fail the check.
pub fn times_match(path: &Path, first: Option<&str>, last: &str) -> bool {
    if !NETCDF_ENABLED {
        warn!(
            "Skip Times check of {}: built without netcdf support.",
            path.display()
        );
        return true;
    }
    match read_times(path) {
        Ok(times) => {
            let last_ok = times.last().map(|t| t == last).unwrap_or(false);
            let first_ok = match first {
                Some(first) => times.first().map(|t| t == first).unwrap_or(false),
                None => true,
            };
            last_ok && first_ok
        }
        Err(err) => {
            warn!("{err}");
            false
        }
    }
}
