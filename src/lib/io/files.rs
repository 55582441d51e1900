use std::path::Path;

use log::debug;
use ndarray::ArrayD;
use netcdf::{extent::Extents, AttributeValue};

use crate::helpers::WrfError;

fn open(path: &Path) -> Result<netcdf::File, WrfError> {
    netcdf::open(path)
        .map_err(|err| WrfError::precondition(format!("Cannot open {}: {err}", path.display())))
}

fn nc_error(path: &Path, err: netcdf::error::Error) -> WrfError {
    WrfError::from(format!("NetCDF error on {}: {err}", path.display()))
}

/// The `Times` strings of a WRF file, one per time level.
pub fn read_times(path: &Path) -> Result<Vec<String>, WrfError> {
    let file = open(path)?;
    let var = file
        .variable("Times")
        .ok_or_else(|| WrfError::step_failed(format!("No Times in {}", path.display())))?;
    let dims = var.dimensions();
    let (ntimes, width) = match dims {
        [time, len] => (time.len(), len.len()),
        _ => return Err(format!("Unexpected Times shape in {}", path.display()).into()),
    };
    let mut buffer = vec![0u8; ntimes * width];
    var.raw_values(&mut buffer, Extents::All)
        .map_err(|err| nc_error(path, err))?;
    Ok(buffer
        .chunks(width.max(1))
        .map(|chunk| {
            String::from_utf8_lossy(chunk)
                .trim_end_matches(['\0', ' '])
                .to_string()
        })
        .collect())
}

fn attribute_f64(value: AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Ints(v) => v.first().map(|v| *v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Floats(v) => v.first().map(|v| *v as f64),
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Longlong(v) => Some(v as f64),
        _ => None,
    }
}

/// A numeric global attribute, `None` when the file does not carry it.
pub fn global_attribute(path: &Path, name: &str) -> Result<Option<f64>, WrfError> {
    let file = open(path)?;
    let Some(attr) = file.attribute(name) else {
        debug!("{} has no attribute {name}", path.display());
        return Ok(None);
    };
    let value = attr.value().map_err(|err| nc_error(path, err))?;
    Ok(attribute_f64(value))
}

pub fn dimension_len(path: &Path, name: &str) -> Result<Option<usize>, WrfError> {
    let file = open(path)?;
    Ok(file.dimension(name).map(|dim| dim.len()))
}

/// A whole variable as f32, `None` when absent.
pub fn read_field(path: &Path, name: &str) -> Result<Option<ArrayD<f32>>, WrfError> {
    let file = open(path)?;
    let Some(var) = file.variable(name) else {
        return Ok(None);
    };
    let values = var
        .values::<f32, _>(Extents::All)
        .map_err(|err| nc_error(path, err))?;
    Ok(Some(values))
}

/// Write `values` into `name`, creating the variable on the dimensions of
/// `like` when the file does not have it yet.
pub fn write_field(
    path: &Path,
    name: &str,
    like: &str,
    values: &ArrayD<f32>,
) -> Result<(), WrfError> {
    let mut file = netcdf::append(path).map_err(|err| nc_error(path, err))?;
    if file.variable(name).is_none() {
        let dims: Vec<String> = file
            .variable(like)
            .ok_or_else(|| format!("No variable {like} in {}", path.display()))?
            .dimensions()
            .iter()
            .map(|dim| dim.name())
            .collect();
        let dims: Vec<&str> = dims.iter().map(String::as_str).collect();
        file.add_variable::<f32>(name, &dims)
            .map_err(|err| nc_error(path, err))?;
    }
    let mut var = file
        .variable_mut(name)
        .ok_or_else(|| format!("No variable {name} in {}", path.display()))?;
    let data: Vec<f32> = values.iter().copied().collect();
    var.put_values(&data, Extents::All)
        .map_err(|err| nc_error(path, err))?;
    debug!("[NC] Wrote {name} to {}", path.display());
    Ok(())
}
