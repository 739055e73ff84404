//! Composite image keys: the engine tags each image with the gantry,
//! collimator and table angle it was acquired at, e.g. `G0B90P0`.

use thiserror::Error;

/// Angle triple parsed from a composite key, before rounding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleKey {
    pub gantry: f64,
    pub collimator: f64,
    pub table: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("cannot parse angles from image key '{key}'")]
pub struct AngleKeyError {
    pub key: String,
}

const AXES: [char; 3] = ['G', 'B', 'P'];

/// Parse `G<g>B<c>P<t>` or `<g>G<c>B<t>P`.
pub fn parse_angle_key(key: &str) -> Result<AngleKey, AngleKeyError> {
    let err = || AngleKeyError {
        key: key.to_string(),
    };
    let values = if key.starts_with('G') {
        split_prefixed(key)
    } else {
        split_suffixed(key)
    }
    .ok_or_else(err)?;
    Ok(AngleKey {
        gantry: values[0],
        collimator: values[1],
        table: values[2],
    })
}

fn split_prefixed(key: &str) -> Option<[f64; 3]> {
    let mut rest = key;
    let mut out = [0.0; 3];
    for (i, axis) in AXES.iter().enumerate() {
        rest = rest.strip_prefix(*axis)?;
        let end = match AXES.get(i + 1) {
            Some(next) => rest.find(*next)?,
            None => rest.len(),
        };
        out[i] = parse_numeral(&rest[..end])?;
        rest = &rest[end..];
    }
    Some(out)
}

fn split_suffixed(key: &str) -> Option<[f64; 3]> {
    let mut rest = key;
    let mut out = [0.0; 3];
    for (i, axis) in AXES.iter().enumerate() {
        let end = rest.find(*axis)?;
        out[i] = parse_numeral(&rest[..end])?;
        rest = &rest[end + 1..];
    }
    rest.is_empty().then_some(out)
}

fn parse_numeral(s: &str) -> Option<f64> {
    let looks_numeric = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+');
    if !looks_numeric {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Round to the nearest whole degree (ties to even) and snap anything within
/// `tolerance` of 0 or 360 to exactly 0. The comparison is strict.
pub fn normalize_angle(value: f64, tolerance: f64) -> i64 {
    let rounded = value.round_ties_even();
    if (rounded - 360.0).abs() < tolerance || rounded.abs() < tolerance {
        0
    } else {
        rounded as i64
    }
}
