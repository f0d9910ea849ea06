//! Sweep results and post-processing.
//!
//! A [`ResultSet`] holds the accepted samples of one sweep as parallel
//! sequences. Derived views (gain in dB, I-V curve, printable table) are
//! computed on demand and never stored.

use crate::acquisition::{ChannelSet, Sample};
use crate::instrument::{Channel, MeasurementKind};
use crate::sweep::SweepMode;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Accepted samples of one sweep, one entry per completed setpoint.
///
/// All populated sequences have the same length. Disabled channels stay empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    mode: SweepMode,
    channels: ChannelSet,
    setpoints: Vec<f64>,
    frequencies: Vec<f64>,
    ch1: Vec<f64>,
    ch2: Vec<f64>,
    ch3: Vec<f64>,
    ch4: Vec<f64>,
}

impl ResultSet {
    /// Empty result for a sweep in `mode`.
    pub fn new(mode: SweepMode, channels: ChannelSet) -> Self {
        Self {
            mode,
            channels,
            setpoints: Vec::new(),
            frequencies: Vec::new(),
            ch1: Vec::new(),
            ch2: Vec::new(),
            ch3: Vec::new(),
            ch4: Vec::new(),
        }
    }

    /// Append the accepted sample for `setpoint`.
    pub fn push(&mut self, setpoint: f64, sample: &Sample) {
        self.setpoints.push(setpoint);
        self.frequencies.push(sample.frequency);
        self.ch1.push(sample.ch1);
        self.ch2.push(sample.ch2);
        if self.channels.ch3 {
            self.ch3.push(sample.ch3.unwrap_or(f64::NAN));
        }
        if self.channels.ch4 {
            self.ch4.push(sample.ch4.unwrap_or(f64::NAN));
        }
    }

    /// Number of accepted points.
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    /// No point was accepted.
    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    /// Mode the sweep ran in.
    pub fn mode(&self) -> SweepMode {
        self.mode
    }

    /// Channels that were read.
    pub fn channels(&self) -> ChannelSet {
        self.channels
    }

    /// Commanded values of the independent variable.
    pub fn setpoints(&self) -> &[f64] {
        &self.setpoints
    }

    /// Frequencies measured by the scope (0 in I-V sweeps).
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Readings of `channel`, or `None` if it was not enabled.
    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        if !self.channels.is_enabled(channel) {
            return None;
        }
        Some(match channel {
            Channel::Ch1 => &self.ch1,
            Channel::Ch2 => &self.ch2,
            Channel::Ch3 => &self.ch3,
            Channel::Ch4 => &self.ch4,
        })
    }

    /// Measurement recorded on the two main channels.
    pub fn measurement_kind(&self) -> MeasurementKind {
        self.mode.measurement_kind()
    }

    /// Transfer-function gain `20 log10(out / in)` per point.
    pub fn gain_db(&self) -> Vec<f64> {
        self.ch1
            .iter()
            .zip(&self.ch2)
            .map(|(v_in, v_out)| 20.0 * (v_out / v_in).log10())
            .collect()
    }

    /// Device voltage and current for an I-V sweep measured across a shunt.
    ///
    /// Channel 1 probes the source, channel 2 the top of the shunt resistor.
    pub fn iv_curve(&self, shunt_ohms: f64) -> IvCurve {
        let voltage = self
            .ch1
            .iter()
            .zip(&self.ch2)
            .map(|(v_src, v_shunt)| v_src - v_shunt)
            .collect();
        let current = self.ch2.iter().map(|v| v / shunt_ohms).collect();
        IvCurve { voltage, current }
    }

    /// Fixed-width table of the sweep, one row per point.
    pub fn summary_table(&self) -> String {
        let label = self.measurement_kind().label().to_lowercase();
        let mut out = String::new();
        let _ = write!(
            out,
            "{:>5} {:>12} {:>12} {:>12} {:>12}",
            "#",
            "setpoint",
            "freq",
            format!("in_{label}"),
            format!("out_{label}")
        );
        for channel in [Channel::Ch3, Channel::Ch4] {
            if self.channels.is_enabled(channel) {
                let _ = write!(out, " {:>12}", format!("{}_vpp", channel.to_string().to_lowercase()));
            }
        }
        out.push('\n');

        for i in 0..self.len() {
            let _ = write!(
                out,
                "{:>5} {:>12.5e} {:>12.5e} {:>12.5e} {:>12.5e}",
                i, self.setpoints[i], self.frequencies[i], self.ch1[i], self.ch2[i]
            );
            for values in [&self.ch3, &self.ch4] {
                if let Some(v) = values.get(i) {
                    let _ = write!(out, " {v:>12.5e}");
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Voltage across and current through the device under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvCurve {
    /// V(ch1) - V(ch2), in volts.
    pub voltage: Vec<f64>,
    /// V(ch2) / R_shunt, in amperes.
    pub current: Vec<f64>,
}
