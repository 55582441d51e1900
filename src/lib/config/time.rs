use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::helpers::WrfError;

lazy_static! {
    static ref TIME_RE: Regex = Regex::new(r"^(\d{10})(\d{2})?$").expect("time regex should compile");
    static ref RANGE_RE: Regex =
        Regex::new(r"^(\d{10}(?:\d{2})?)-(\d{10}(?:\d{2})?)$").expect("range regex should compile");
    static ref HOURS_RANGE_RE: Regex =
        Regex::new(r"^(\d+)-(\d+)\+(\d+)$").expect("hours regex should compile");
}

/// Parse `YYYYMMDDHH` or `YYYYMMDDHHmm` as UTC.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>, WrfError> {
    let text = text.trim();
    let caps = TIME_RE
        .captures(text)
        .ok_or_else(|| WrfError::config(format!("Could not parse time '{text}' (YYYYMMDDHH)")))?;
    let full = match caps.get(2) {
        Some(_) => text.to_string(),
        None => format!("{text}00"),
    };
    let naive = NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M")
        .map_err(|err| WrfError::config(format!("Could not parse time '{text}': {err}")))?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Parse `YYYYMMDDHH-YYYYMMDDHH`.
pub fn parse_time_range(text: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), WrfError> {
    let caps = RANGE_RE.captures(text.trim()).ok_or_else(|| {
        WrfError::config(format!(
            "\"{text}\" is not a time range (YYYYMMDDHH-YYYYMMDDHH)!"
        ))
    })?;
    Ok((parse_time(&caps[1])?, parse_time(&caps[2])?))
}

/// Parse forecast hours given as `start-end+step` or as `a:b:c`.
pub fn parse_forecast_hours(text: &str) -> Result<Vec<i64>, WrfError> {
    let text = text.trim();
    if let Some(caps) = HOURS_RANGE_RE.captures(text) {
        let start: i64 = caps[1].parse().map_err(|_| "invalid start hour")?;
        let end: i64 = caps[2].parse().map_err(|_| "invalid end hour")?;
        let step: i64 = caps[3].parse().map_err(|_| "invalid hour step")?;
        if step <= 0 {
            return Err(WrfError::config(format!("Hour step must be positive in '{text}'")));
        }
        return Ok((start..=end).step_by(step as usize).collect());
    }
    text.split(':')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| WrfError::config(format!("Could not parse forecast hours '{text}'")))
        })
        .collect()
}

/// `YYYY-MM-DD_HH:MM:SS`, the format used by WRF file names
pub fn wrf_time(time: &DateTime<Utc>) -> String {
    time.format(crate::constants::WRF_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_hour_and_minute_precision() {
        assert_eq!(
            parse_time("2019060100").unwrap(),
            Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time("201906011230").unwrap(),
            Utc.with_ymd_and_hms(2019, 6, 1, 12, 30, 0).unwrap()
        );
        assert!(parse_time("2019-06-01").is_err());
        assert!(parse_time("2019063100").is_err());
    }

    #[test]
    fn parses_ranges() {
        let (start, end) = parse_time_range("2019060100-2019060206").unwrap();
        assert_eq!(end - start, chrono::Duration::hours(30));
        assert!(parse_time_range("2019060100").is_err());
    }

    #[test]
    fn parses_forecast_hours() {
        assert_eq!(parse_forecast_hours("0-12+3").unwrap(), vec![0, 3, 6, 9, 12]);
        assert_eq!(parse_forecast_hours("0:6:24").unwrap(), vec![0, 6, 24]);
        assert!(parse_forecast_hours("abc").is_err());
    }

    #[test]
    fn formats_wrf_time() {
        let time = Utc.with_ymd_and_hms(2019, 6, 1, 6, 0, 0).unwrap();
        assert_eq!(wrf_time(&time), "2019-06-01_06:00:00");
    }
}
