//! # GNSS Report Parser
//!
//! Turns the modem's `+CGPSINFO` response into a [`PositionFix`].
//!
//! The report is free text. The fields follow the marker as
//! `ddmm.mmmm,N,dddmm.mmmm,E,date,time,alt,speed,course`, and a report made
//! only of separators means the receiver has not converged yet.
//!
//! Degree fields have a fixed width (2 digits for latitude, 3 for
//! longitude), minutes are the next two digits, and the decimal-minute
//! remainder is converted to seconds (`fraction × 60`).

use super::{EastWest, Latitude, Longitude, NorthSouth, PositionFix};
use crate::error::{LoggerError, Result};

/// Marker preceding the position fields in the modem response
pub const REPORT_MARKER: &str = "+CGPSINFO:";

/// Width of the degree field for latitude values
const LATITUDE_DEGREE_WIDTH: usize = 2;

/// Width of the degree field for longitude values
const LONGITUDE_DEGREE_WIDTH: usize = 3;

/// Width of the whole-minute field
const MINUTE_WIDTH: usize = 2;

/// Extract the report fields that follow the marker.
///
/// Returns `None` when the response carries no marker at all.
pub fn extract_report(response: &str) -> Option<&str> {
    let start = response.find(REPORT_MARKER)? + REPORT_MARKER.len();
    let rest = &response[start..];
    let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// A report is usable when it is non-empty and not made only of separators.
pub fn is_usable(fields: &str) -> bool {
    fields.chars().any(|c| c != ',' && !c.is_whitespace())
}

/// Parse a full modem response.
///
/// # Returns
///
/// * `Ok(Some(fix))` - the report carried a position
/// * `Ok(None)` - no marker, or the receiver has not converged yet
/// * `Err(_)` - the report had content but could not be parsed
pub fn parse_report(response: &str) -> Result<Option<PositionFix>> {
    match extract_report(response) {
        Some(fields) if is_usable(fields) => parse_report_fields(fields).map(Some),
        _ => Ok(None),
    }
}

/// Parse the comma separated report fields into a fix.
///
/// # Examples
///
/// ```
/// use field_datalogger::position::parser::parse_report_fields;
///
/// let fix = parse_report_fields("2234.5678,N,11234.1234,W").unwrap();
/// assert_eq!(fix.latitude.degrees, 22);
/// assert_eq!(fix.longitude.degrees, 112);
/// ```
pub fn parse_report_fields(fields: &str) -> Result<PositionFix> {
    let parts: Vec<&str> = fields.split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return Err(LoggerError::MalformedReport(format!(
            "expected at least 4 fields, got {}: {:?}",
            parts.len(),
            fields
        )));
    }

    let (degrees, minutes, seconds) = split_coordinate(parts[0], LATITUDE_DEGREE_WIDTH)?;
    let hemisphere = NorthSouth::from_marker(parts[1]).ok_or_else(|| {
        LoggerError::MalformedReport(format!("invalid latitude hemisphere {:?}", parts[1]))
    })?;
    let latitude = Latitude {
        degrees,
        minutes,
        seconds,
        hemisphere,
    };

    let (degrees, minutes, seconds) = split_coordinate(parts[2], LONGITUDE_DEGREE_WIDTH)?;
    let hemisphere = EastWest::from_marker(parts[3]).ok_or_else(|| {
        LoggerError::MalformedReport(format!("invalid longitude hemisphere {:?}", parts[3]))
    })?;
    let longitude = Longitude {
        degrees,
        minutes,
        seconds,
        hemisphere,
    };

    Ok(PositionFix {
        latitude,
        longitude,
    })
}

/// Split a `d..dmm.mmmm` field into degrees, minutes and seconds.
///
/// Degrees and minutes are fixed-width digit runs; seconds come only from
/// the fractional minutes after the `.`.
fn split_coordinate(field: &str, degree_width: usize) -> Result<(u16, u8, f64)> {
    let malformed = |what: &str| {
        LoggerError::MalformedReport(format!("{} in coordinate {:?}", what, field))
    };

    let minutes_end = degree_width + MINUTE_WIDTH;
    if !field.is_ascii() || field.len() < minutes_end {
        return Err(malformed("field too short"));
    }

    let (degrees, rest) = field.split_at(degree_width);
    let (minutes, remainder) = rest.split_at(MINUTE_WIDTH);
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    if !all_digits(degrees) {
        return Err(malformed("invalid degrees"));
    }
    if !all_digits(minutes) {
        return Err(malformed("invalid minutes"));
    }

    let degrees = degrees
        .parse::<u16>()
        .map_err(|_| malformed("invalid degrees"))?;
    let minutes = minutes
        .parse::<u8>()
        .map_err(|_| malformed("invalid minutes"))?;
    if minutes >= 60 {
        return Err(malformed("minutes out of range"));
    }

    let fraction = match remainder.strip_prefix('.') {
        None if remainder.is_empty() => 0.0,
        None => return Err(malformed("unexpected digits after minutes")),
        Some("") => 0.0,
        Some(digits) if all_digits(digits) => format!("0.{}", digits)
            .parse::<f64>()
            .map_err(|_| malformed("invalid decimal minutes"))?,
        Some(_) => return Err(malformed("invalid decimal minutes")),
    };

    Ok((degrees, minutes, fraction * 60.0))
}
