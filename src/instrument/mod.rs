//! Instrument adapter contract and implementations.
//!
//! The acquisition controller talks to the bench (one oscilloscope, one
//! signal generator) only through [`InstrumentAdapter`]. All calls are
//! synchronous and strictly sequential: each one completes its
//! command/response exchange before returning, and the adapter is borrowed
//! mutably for the whole sweep so no two controllers can share a session.
//!
//! - [`scpi::ScpiBench`] drives real instruments over a [`scpi::ScpiTransport`].
//! - [`mock::ScriptedInstrument`] replays scripted readings and records every call.
//! - [`sim::SimulatedBench`] models an RC low-pass device under test.

use crate::error::InstrumentError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod mock;
pub mod scpi;
pub mod sim;
pub mod transport;

/// Oscilloscope input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Reference channel (generator output).
    Ch1,
    /// Primary dependent channel.
    Ch2,
    /// Optional auxiliary channel.
    Ch3,
    /// Optional auxiliary channel.
    Ch4,
}

impl Channel {
    /// All channels in front-panel order.
    pub const ALL: [Channel; 4] = [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];

    /// 1-based channel number as printed on the front panel.
    pub fn number(self) -> u8 {
        match self {
            Channel::Ch1 => 1,
            Channel::Ch2 => 2,
            Channel::Ch3 => 3,
            Channel::Ch4 => 4,
        }
    }

    /// Zero-based index into per-channel arrays.
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.number())
    }
}

/// Scope measurement read back per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Peak-to-peak voltage, for sine stimuli.
    PeakToPeak,
    /// Mean voltage, for DC levels.
    Average,
    /// Measured signal frequency.
    Frequency,
}

impl MeasurementKind {
    /// Short label used in statistic queries and saved file names.
    pub fn label(self) -> &'static str {
        match self {
            MeasurementKind::PeakToPeak => "VPP",
            MeasurementKind::Average => "VAVG",
            MeasurementKind::Frequency => "FREQ",
        }
    }
}

/// Generator output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    /// Sine wave.
    Sine,
    /// Constant level set by the offset.
    Dc,
}

/// Scope input coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling {
    /// AC coupled.
    Ac,
    /// DC coupled.
    Dc,
}

/// Scope trigger sweep mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSweep {
    /// Free-running; used for DC levels that never cross a trigger.
    Auto,
    /// Wait for a trigger event.
    Normal,
}

/// One open session with the scope and the generator.
pub trait InstrumentAdapter {
    /// Select the output waveform.
    fn set_generator_waveform(&mut self, waveform: Waveform) -> Result<(), InstrumentError>;

    /// Output frequency in Hz.
    fn set_generator_frequency(&mut self, hz: f64) -> Result<(), InstrumentError>;

    /// Output amplitude in Vpp.
    fn set_generator_amplitude(&mut self, vpp: f64) -> Result<(), InstrumentError>;

    /// DC offset in volts.
    fn set_generator_offset(&mut self, volts: f64) -> Result<(), InstrumentError>;

    /// Switch the output on or off.
    fn set_generator_output(&mut self, enabled: bool) -> Result<(), InstrumentError>;

    /// Horizontal scale in s/div.
    fn set_scope_timebase(&mut self, seconds_per_div: f64) -> Result<(), InstrumentError>;

    /// Vertical scale of `channel` in V/div.
    fn set_scope_channel_scale(
        &mut self,
        channel: Channel,
        volts_per_div: f64,
    ) -> Result<(), InstrumentError>;

    /// Input coupling of `channel`.
    fn set_scope_coupling(
        &mut self,
        channel: Channel,
        coupling: Coupling,
    ) -> Result<(), InstrumentError>;

    /// Trigger sweep mode.
    fn set_scope_trigger_sweep(&mut self, sweep: TriggerSweep) -> Result<(), InstrumentError>;

    /// Current value of `kind` on `channel`.
    fn query_channel_measurement(
        &mut self,
        channel: Channel,
        kind: MeasurementKind,
    ) -> Result<f64, InstrumentError>;

    /// Frequency the scope computes for the reference channel.
    fn query_computed_frequency(&mut self) -> Result<f64, InstrumentError>;
}

impl<A: InstrumentAdapter + ?Sized> InstrumentAdapter for Box<A> {
    fn set_generator_waveform(&mut self, waveform: Waveform) -> Result<(), InstrumentError> {
        (**self).set_generator_waveform(waveform)
    }

    fn set_generator_frequency(&mut self, hz: f64) -> Result<(), InstrumentError> {
        (**self).set_generator_frequency(hz)
    }

    fn set_generator_amplitude(&mut self, vpp: f64) -> Result<(), InstrumentError> {
        (**self).set_generator_amplitude(vpp)
    }

    fn set_generator_offset(&mut self, volts: f64) -> Result<(), InstrumentError> {
        (**self).set_generator_offset(volts)
    }

    fn set_generator_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        (**self).set_generator_output(enabled)
    }

    fn set_scope_timebase(&mut self, seconds_per_div: f64) -> Result<(), InstrumentError> {
        (**self).set_scope_timebase(seconds_per_div)
    }

    fn set_scope_channel_scale(
        &mut self,
        channel: Channel,
        volts_per_div: f64,
    ) -> Result<(), InstrumentError> {
        (**self).set_scope_channel_scale(channel, volts_per_div)
    }

    fn set_scope_coupling(
        &mut self,
        channel: Channel,
        coupling: Coupling,
    ) -> Result<(), InstrumentError> {
        (**self).set_scope_coupling(channel, coupling)
    }

    fn set_scope_trigger_sweep(&mut self, sweep: TriggerSweep) -> Result<(), InstrumentError> {
        (**self).set_scope_trigger_sweep(sweep)
    }

    fn query_channel_measurement(
        &mut self,
        channel: Channel,
        kind: MeasurementKind,
    ) -> Result<f64, InstrumentError> {
        (**self).query_channel_measurement(channel, kind)
    }

    fn query_computed_frequency(&mut self) -> Result<f64, InstrumentError> {
        (**self).query_computed_frequency()
    }
}
