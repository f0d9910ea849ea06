//! Sweep plan generation.
//!
//! A plan is the ordered list of setpoints for the independent variable
//! (frequency in Hz, amplitude in Vpp or DC offset in V). Plans are computed
//! once before a sweep starts and are never re-sorted: a descending range
//! produces a descending plan.
//!
//! # Example
//!
//! ```
//! use sweep_daq::plan::{generate_plan, PlanSpec};
//!
//! let plan = generate_plan(&PlanSpec::Logarithmic { start: 10.0, end: 1e4, count: 4 })?;
//! assert_eq!(plan.len(), 4);
//! assert!((plan[1] - 100.0).abs() < 1e-9);
//! # Ok::<(), sweep_daq::error::SweepError>(())
//! ```

use crate::error::{SweepError, SweepResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// How the setpoints of a sweep are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSpec {
    /// `count` evenly spaced values from `start` to `end` inclusive.
    Linear {
        /// First value.
        start: f64,
        /// Last value.
        end: f64,
        /// Number of values.
        count: usize,
    },
    /// `count` values evenly spaced in log10 space. Both bounds must be positive.
    Logarithmic {
        /// First value, > 0.
        start: f64,
        /// Last value, > 0.
        end: f64,
        /// Number of values.
        count: usize,
    },
    /// Literal list of values separated by commas, semicolons or whitespace.
    FromList(String),
    /// Text file containing a list in the same grammar as [`PlanSpec::FromList`].
    FromFile(PathBuf),
}

/// Build the setpoint sequence described by `spec`.
pub fn generate_plan(spec: &PlanSpec) -> SweepResult<Vec<f64>> {
    let plan = match spec {
        PlanSpec::Linear { start, end, count } => linear(*start, *end, *count)?,
        PlanSpec::Logarithmic { start, end, count } => logarithmic(*start, *end, *count)?,
        PlanSpec::FromList(text) => parse_list(text)?,
        PlanSpec::FromFile(path) => {
            let text = std::fs::read_to_string(path)?;
            parse_list(&text)?
        }
    };
    debug!(points = plan.len(), ?plan, "generated sweep plan");
    Ok(plan)
}

fn check_bounds(start: f64, end: f64, count: usize) -> SweepResult<()> {
    if count == 0 {
        return Err(SweepError::InvalidRange(
            "a sweep needs at least one point".into(),
        ));
    }
    if !start.is_finite() || !end.is_finite() {
        return Err(SweepError::InvalidRange(format!(
            "bounds must be finite (start {start}, end {end})"
        )));
    }
    Ok(())
}

fn linear(start: f64, end: f64, count: usize) -> SweepResult<Vec<f64>> {
    check_bounds(start, end, count)?;
    if count == 1 {
        return Ok(vec![start]);
    }
    let step = (end - start) / (count - 1) as f64;
    let mut values: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
    values[count - 1] = end;
    Ok(values)
}

fn logarithmic(start: f64, end: f64, count: usize) -> SweepResult<Vec<f64>> {
    check_bounds(start, end, count)?;
    if start <= 0.0 || end <= 0.0 {
        return Err(SweepError::InvalidRange(format!(
            "logarithmic sweep bounds must be positive (start {start}, end {end})"
        )));
    }
    let exponents = linear(start.log10(), end.log10(), count)?;
    let mut values: Vec<f64> = exponents.into_iter().map(|e| 10f64.powf(e)).collect();
    // pin the endpoints so they match what the operator typed
    values[0] = start;
    if count > 1 {
        values[count - 1] = end;
    }
    Ok(values)
}

/// Parse a delimited list of real numbers.
///
/// Fails with [`SweepError::Parse`] on any token that is not a finite number and
/// with [`SweepError::InvalidRange`] if the list holds no values at all.
pub fn parse_list(text: &str) -> SweepResult<Vec<f64>> {
    let values = text
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| parse_real(token))
        .collect::<SweepResult<Vec<f64>>>()?;

    if values.is_empty() {
        return Err(SweepError::InvalidRange("the setpoint list is empty".into()));
    }
    Ok(values)
}

/// Parse one real number typed by the operator.
pub fn parse_real(text: &str) -> SweepResult<f64> {
    let trimmed = text.trim();
    let value = trimmed
        .parse::<f64>()
        .map_err(|e| SweepError::parse(trimmed, e.to_string()))?;
    if !value.is_finite() {
        return Err(SweepError::parse(trimmed, "value is not finite"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{a} != {b}");
    }

    #[test]
    fn linear_hits_both_endpoints() {
        for (start, end, count) in [(0.0, 1.0, 2), (10.0, 20e3, 19), (5.0, 0.1, 7), (-1.0, 1.0, 3)] {
            let plan = generate_plan(&PlanSpec::Linear { start, end, count }).unwrap();
            assert_eq!(plan.len(), count);
            assert_eq!(plan[0], start);
            assert_eq!(plan[count - 1], end);
            let ascending = end > start;
            for pair in plan.windows(2) {
                assert_eq!(pair[1] > pair[0], ascending);
            }
        }
    }

    #[test]
    fn linear_single_point_is_start() {
        let plan = generate_plan(&PlanSpec::Linear { start: 3.0, end: 9.0, count: 1 }).unwrap();
        assert_eq!(plan, vec![3.0]);
    }

    #[test]
    fn constant_range_repeats_value() {
        let plan = generate_plan(&PlanSpec::Linear { start: 2.0, end: 2.0, count: 4 }).unwrap();
        assert_eq!(plan, vec![2.0; 4]);
    }

    #[test]
    fn logarithmic_is_linear_in_log_space() {
        let plan = generate_plan(&PlanSpec::Logarithmic { start: 10.0, end: 100e3, count: 9 }).unwrap();
        assert_eq!(plan.len(), 9);
        assert_eq!(plan[0], 10.0);
        assert_eq!(plan[8], 100e3);
        let logs: Vec<f64> = plan.iter().map(|v| v.log10()).collect();
        for pair in logs.windows(2) {
            assert_close(pair[1] - pair[0], 0.5);
        }
    }

    #[test]
    fn logarithmic_rejects_non_positive_bounds() {
        for (start, end) in [(0.0, 10.0), (10.0, 0.0), (-1.0, 10.0), (10.0, -5.0)] {
            let err = generate_plan(&PlanSpec::Logarithmic { start, end, count: 5 }).unwrap_err();
            assert!(matches!(err, SweepError::InvalidRange(_)), "{err}");
        }
    }

    #[test]
    fn zero_count_is_invalid() {
        let err = generate_plan(&PlanSpec::Linear { start: 1.0, end: 2.0, count: 0 }).unwrap_err();
        assert!(matches!(err, SweepError::InvalidRange(_)));
    }

    #[test]
    fn list_accepts_mixed_separators() {
        let plan = generate_plan(&PlanSpec::FromList("100, 1e3;5000\n 20e3".into())).unwrap();
        assert_eq!(plan, vec![100.0, 1000.0, 5000.0, 20000.0]);
    }

    #[test]
    fn list_rejects_bad_token() {
        let err = generate_plan(&PlanSpec::FromList("100, 1k, 10k".into())).unwrap_err();
        match err {
            SweepError::Parse { input, .. } => assert_eq!(input, "1k"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse_list("1, nan").is_err());
    }

    #[test]
    fn empty_list_is_invalid() {
        assert!(matches!(parse_list(" , "), Err(SweepError::InvalidRange(_))));
    }

    #[test]
    fn plan_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.1\n0.5\n1.0").unwrap();
        let plan = generate_plan(&PlanSpec::FromFile(file.path().to_path_buf())).unwrap();
        assert_eq!(plan, vec![0.1, 0.5, 1.0]);
    }

    #[test]
    fn parses_operator_fields() {
        assert_eq!(parse_real(" 2.5 ").unwrap(), 2.5);
        assert!(parse_real("abc").is_err());
    }
}
