//! Simulated bench for running sweeps without hardware.
//!
//! Models a first-order RC low-pass filter as the device under test:
//!
//! - CH1 probes the generator output (the filter input).
//! - CH2 probes the filter output, `|H(f)| = 1 / sqrt(1 + (f / fc)^2)`.
//! - CH3 and CH4 probe divider taps at 1/2 and 1/4 of the output.
//!
//! With a DC waveform the filter is replaced by a resistor in series with a
//! shunt, so CH1/CH2 averages trace a straight I-V line.
//!
//! Readings carry a small amount of noise, lag a configurable number of
//! samples behind every generator change, and report the scope's invalid
//! value when a signal does not fit on screen at the current volts/div.

use super::mock::{BenchState, INVALID_READING};
use super::{Channel, Coupling, InstrumentAdapter, MeasurementKind, TriggerSweep, Waveform};
use crate::error::InstrumentError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Simulated scope, generator and RC device under test.
pub struct SimulatedBench {
    state: BenchState,
    cutoff_hz: f64,
    dut_resistance: f64,
    shunt_resistance: f64,
    noise: f64,
    vertical_divisions: f64,
    settle_samples: u32,
    pending_settle: u32,
    last_fresh: Option<[f64; 5]>,
    held: Option<[f64; 5]>,
    current: [f64; 5],
    rng: StdRng,
}

impl SimulatedBench {
    /// Low-pass with the given corner frequency, 8 vertical divisions,
    /// 0.2 % noise and a one-sample settling lag.
    pub fn new(cutoff_hz: f64) -> Self {
        Self {
            state: BenchState::default(),
            cutoff_hz,
            dut_resistance: 1000.0,
            shunt_resistance: 100.0,
            noise: 0.002,
            vertical_divisions: 8.0,
            settle_samples: 1,
            pending_settle: 0,
            last_fresh: None,
            held: None,
            current: [0.0; 5],
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    /// Relative uniform noise on every reading (0.002 by default).
    pub fn with_noise(mut self, fraction: f64) -> Self {
        self.noise = fraction;
        self
    }

    /// Samples that still show the previous setting after a generator change.
    pub fn with_settle_samples(mut self, samples: u32) -> Self {
        self.settle_samples = samples;
        self
    }

    /// Divider used for DC stimulus: device under test over shunt.
    pub fn with_resistances(mut self, dut_ohms: f64, shunt_ohms: f64) -> Self {
        self.dut_resistance = dut_ohms;
        self.shunt_resistance = shunt_ohms;
        self
    }

    /// Screen height used for the off-screen check.
    pub fn with_vertical_divisions(mut self, divisions: f64) -> Self {
        self.vertical_divisions = divisions;
        self
    }

    /// Settings as last commanded.
    pub fn state(&self) -> &BenchState {
        &self.state
    }

    fn generator_changed(&mut self) {
        self.held = self.last_fresh;
        self.pending_settle = self.settle_samples;
    }

    fn jitter(&mut self, value: f64) -> f64 {
        if self.noise == 0.0 {
            return value;
        }
        value * (1.0 + self.rng.gen_range(-self.noise..=self.noise))
    }

    /// Frequency followed by the four channel values, before noise.
    fn ideal(&self) -> [f64; 5] {
        if !self.state.output {
            return [0.0; 5];
        }
        match self.state.waveform {
            Some(Waveform::Dc) => {
                let total = self.dut_resistance + self.shunt_resistance;
                let v_in = self.state.offset;
                let v_shunt = v_in * self.shunt_resistance / total;
                [0.0, v_in, v_shunt, 0.0, 0.0]
            }
            _ => {
                let f = self.state.frequency;
                let gain = 1.0 / (1.0 + (f / self.cutoff_hz).powi(2)).sqrt();
                let v_in = self.state.amplitude;
                let v_out = v_in * gain;
                [f, v_in, v_out, v_out / 2.0, v_out / 4.0]
            }
        }
    }

    fn begin_sample(&mut self) {
        let fresh = self.ideal();
        let base = match self.held {
            Some(held) if self.pending_settle > 0 => {
                self.pending_settle -= 1;
                held
            }
            _ => fresh,
        };
        let mut sample = [0.0; 5];
        for (slot, value) in sample.iter_mut().zip(base) {
            *slot = self.jitter(value);
        }
        self.last_fresh = Some(fresh);
        self.current = sample;
        trace!(?sample, "simulated sample");
    }

    fn on_screen(&self, channel: Channel, value: f64, kind: MeasurementKind) -> f64 {
        let span = self.state.scales[channel.index()] * self.vertical_divisions;
        let extent = match kind {
            // a DC level only has half the screen above the centre line
            MeasurementKind::Average => value.abs() * 2.0,
            _ => value.abs(),
        };
        if extent > span {
            INVALID_READING
        } else {
            value
        }
    }
}

impl InstrumentAdapter for SimulatedBench {
    fn set_generator_waveform(&mut self, waveform: Waveform) -> Result<(), InstrumentError> {
        self.state.waveform = Some(waveform);
        self.generator_changed();
        Ok(())
    }

    fn set_generator_frequency(&mut self, hz: f64) -> Result<(), InstrumentError> {
        self.state.frequency = hz;
        self.generator_changed();
        Ok(())
    }

    fn set_generator_amplitude(&mut self, vpp: f64) -> Result<(), InstrumentError> {
        self.state.amplitude = vpp;
        self.generator_changed();
        Ok(())
    }

    fn set_generator_offset(&mut self, volts: f64) -> Result<(), InstrumentError> {
        self.state.offset = volts;
        self.generator_changed();
        Ok(())
    }

    fn set_generator_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        self.state.output = enabled;
        self.generator_changed();
        Ok(())
    }

    fn set_scope_timebase(&mut self, seconds_per_div: f64) -> Result<(), InstrumentError> {
        self.state.timebase = seconds_per_div;
        Ok(())
    }

    fn set_scope_channel_scale(
        &mut self,
        channel: Channel,
        volts_per_div: f64,
    ) -> Result<(), InstrumentError> {
        self.state.scales[channel.index()] = volts_per_div;
        Ok(())
    }

    fn set_scope_coupling(
        &mut self,
        _channel: Channel,
        _coupling: Coupling,
    ) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn set_scope_trigger_sweep(&mut self, _sweep: TriggerSweep) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn query_channel_measurement(
        &mut self,
        channel: Channel,
        kind: MeasurementKind,
    ) -> Result<f64, InstrumentError> {
        if channel == Channel::Ch1 {
            self.begin_sample();
        }
        let value = self.current[channel.index() + 1];
        Ok(self.on_screen(channel, value, kind))
    }

    fn query_computed_frequency(&mut self) -> Result<f64, InstrumentError> {
        Ok(self.current[0])
    }
}
