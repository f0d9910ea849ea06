//! Numeric helpers for instrument ranging.

/// Oscilloscope volts/div steps (1-2-5 sequence, 1 mV to 10 V).
pub const SCOPE_SCALE_TABLE: [f64; 13] = [
    1e-3, 2e-3, 5e-3, 10e-3, 20e-3, 50e-3, 100e-3, 200e-3, 500e-3, 1.0, 2.0, 5.0, 10.0,
];

/// Returned by [`percent_delta`] when exactly one operand is zero.
pub const ZERO_MISMATCH_DELTA: f64 = 1000.0;

/// Smallest entry of `table` that is `>= x`, or the largest entry if none is.
///
/// `table` must be sorted ascending. Values beyond the top of the table clamp to
/// the top entry, leaving the channel under-ranged rather than failing the point.
/// An empty table yields `x` unchanged.
pub fn round_up_to_scale(x: f64, table: &[f64]) -> f64 {
    table
        .iter()
        .copied()
        .find(|&step| x <= step)
        .or_else(|| table.last().copied())
        .unwrap_or(x)
}

/// Percent difference of the magnitudes of `a` and `b`, relative to the smaller one.
///
/// Equal magnitudes give 0. If exactly one magnitude is zero the result is
/// [`ZERO_MISMATCH_DELTA`].
pub fn percent_delta(a: f64, b: f64) -> f64 {
    let a = a.abs();
    let b = b.abs();
    if a == b {
        return 0.0;
    }
    let smaller = a.min(b);
    if smaller == 0.0 {
        return ZERO_MISMATCH_DELTA;
    }
    100.0 * (a - b).abs() / smaller
}
