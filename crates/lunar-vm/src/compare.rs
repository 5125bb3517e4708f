//! Exact ordering between integers and floats.
//!
//! Converting an `i64` to `f64` loses precision above 2^53, so mixed
//! comparisons round the float to an integer instead when needed.

/// Integers of at most this magnitude convert to `f64` exactly.
const MAX_EXACT: u64 = 1 << 53;

fn fits_float(i: i64) -> bool {
    i.unsigned_abs() <= MAX_EXACT
}

/// `f` rounded by `round`, if it lies within the `i64` range.
fn to_int_rounded(f: f64, round: fn(f64) -> f64) -> Option<i64> {
    let r = round(f);
    // -2^63 is exact; 2^63 is one past the top.
    if r >= -9_223_372_036_854_775_808.0 && r < 9_223_372_036_854_775_808.0 {
        Some(r as i64)
    } else {
        None
    }
}

/// `i < f`
pub fn lt_int_float(i: i64, f: f64) -> bool {
    if fits_float(i) {
        return (i as f64) < f;
    }
    match to_int_rounded(f, f64::ceil) {
        Some(fi) => i < fi,
        None => f > 0.0,
    }
}

/// `i <= f`
pub fn le_int_float(i: i64, f: f64) -> bool {
    if fits_float(i) {
        return (i as f64) <= f;
    }
    match to_int_rounded(f, f64::floor) {
        Some(fi) => i <= fi,
        None => f > 0.0,
    }
}

/// `f < i`
pub fn lt_float_int(f: f64, i: i64) -> bool {
    if fits_float(i) {
        return f < (i as f64);
    }
    match to_int_rounded(f, f64::floor) {
        Some(fi) => fi < i,
        None => f < 0.0,
    }
}

/// `f <= i`
pub fn le_float_int(f: f64, i: i64) -> bool {
    if fits_float(i) {
        return f <= (i as f64);
    }
    match to_int_rounded(f, f64::ceil) {
        Some(fi) => fi <= i,
        None => f < 0.0,
    }
}
