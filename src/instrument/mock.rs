//! Scripted instrument adapter for testing
//!
//! This adapter implements [`InstrumentAdapter`] without any hardware. It provides:
//! - A queue of scripted readings ("frames"), or a responder closure that
//!   computes readings from the current generator and scope settings
//! - Failure injection (communication errors and corrupt values)
//! - Call logging for test verification
//!
//! A new frame starts each time channel 1 is queried; the acquisition
//! controller always reads channel 1 first, so one frame is one sample.

use super::{Channel, Coupling, InstrumentAdapter, MeasurementKind, TriggerSweep, Waveform};
use crate::error::InstrumentError;
use std::collections::VecDeque;

/// Value the DS1000Z family reports for a measurement it cannot make.
pub const INVALID_READING: f64 = 9.9e37;

/// Values returned for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Computed frequency in Hz.
    pub frequency: f64,
    /// CH1..CH4 values.
    pub channels: [f64; 4],
}

impl Reading {
    /// Reading with the given frequency and channel values.
    pub fn new(frequency: f64, channels: [f64; 4]) -> Self {
        Self {
            frequency,
            channels,
        }
    }
}

/// What the scripted scope does for one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Every query in this sample succeeds with these values.
    Reading(Reading),
    /// Every query in this sample returns [`INVALID_READING`].
    Corrupt,
    /// The channel 1 query fails with a timeout.
    Timeout,
    /// The channel 1 query reports a dropped session.
    Disconnect,
}

/// Generator and scope settings as last commanded.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchState {
    /// None until a waveform is selected.
    pub waveform: Option<Waveform>,
    /// Generator frequency in Hz.
    pub frequency: f64,
    /// Generator amplitude in Vpp.
    pub amplitude: f64,
    /// Generator offset in V.
    pub offset: f64,
    /// Generator output enabled.
    pub output: bool,
    /// Scope timebase in s/div.
    pub timebase: f64,
    /// CH1..CH4 volts/div.
    pub scales: [f64; 4],
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            waveform: None,
            frequency: 1000.0,
            amplitude: 1.0,
            offset: 0.0,
            output: false,
            timebase: 1e-3,
            scales: [1.0; 4],
        }
    }
}

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `set_generator_waveform`
    Waveform(Waveform),
    /// `set_generator_frequency`
    Frequency(f64),
    /// `set_generator_amplitude`
    Amplitude(f64),
    /// `set_generator_offset`
    Offset(f64),
    /// `set_generator_output`
    Output(bool),
    /// `set_scope_timebase`
    Timebase(f64),
    /// `set_scope_channel_scale`
    ChannelScale(Channel, f64),
    /// `set_scope_coupling`
    Coupling(Channel, Coupling),
    /// `set_scope_trigger_sweep`
    TriggerSweep(TriggerSweep),
    /// `query_channel_measurement`
    Measure(Channel, MeasurementKind),
    /// `query_computed_frequency`
    ComputedFrequency,
}

type Responder = Box<dyn FnMut(&BenchState) -> Frame + Send>;

/// Scripted instrument adapter.
///
/// # Example
///
/// ```
/// use sweep_daq::instrument::mock::{Frame, Reading, ScriptedInstrument};
/// use sweep_daq::instrument::{Channel, InstrumentAdapter, MeasurementKind};
///
/// let mut bench = ScriptedInstrument::with_frames(vec![
///     Frame::Reading(Reading::new(1000.0, [1.0, 0.5, 0.0, 0.0])),
/// ]);
/// let ch2 = {
///     bench.query_channel_measurement(Channel::Ch1, MeasurementKind::PeakToPeak).unwrap();
///     bench.query_channel_measurement(Channel::Ch2, MeasurementKind::PeakToPeak).unwrap()
/// };
/// assert_eq!(ch2, 0.5);
/// assert_eq!(bench.samples_started(), 1);
/// ```
pub struct ScriptedInstrument {
    frames: VecDeque<Frame>,
    responder: Option<Responder>,
    current: Frame,
    state: BenchState,
    fail_writes: bool,
    samples_started: usize,
    call_log: Vec<Call>,
}

impl ScriptedInstrument {
    /// Adapter that reports a steady 1 kHz, 1 Vpp reading on every channel.
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            responder: None,
            current: Frame::Reading(Reading::new(1000.0, [1.0; 4])),
            state: BenchState::default(),
            fail_writes: false,
            samples_started: 0,
            call_log: Vec::new(),
        }
    }

    /// Replay `frames` in order, then keep repeating the last one.
    pub fn with_frames(frames: Vec<Frame>) -> Self {
        let mut instrument = Self::new();
        instrument.frames = frames.into();
        instrument
    }

    /// Compute every frame from the commanded bench state.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&BenchState) -> Frame + Send + 'static,
    {
        let mut instrument = Self::new();
        instrument.responder = Some(Box::new(responder));
        instrument
    }

    /// Append frames that take priority over the responder.
    pub fn push_frames(&mut self, frames: impl IntoIterator<Item = Frame>) {
        self.frames.extend(frames);
    }

    /// Make every configuration write fail with a dropped session.
    pub fn fail_writes(&mut self) {
        self.fail_writes = true;
    }

    /// Number of samples the controller has begun (channel 1 queries).
    pub fn samples_started(&self) -> usize {
        self.samples_started
    }

    /// Settings as last commanded.
    pub fn state(&self) -> &BenchState {
        &self.state
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> &[Call] {
        &self.call_log
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&mut self) {
        self.call_log.clear();
    }

    /// Every volts/div value written to `channel`, in order.
    pub fn scales_written(&self, channel: Channel) -> Vec<f64> {
        self.call_log
            .iter()
            .filter_map(|call| match call {
                Call::ChannelScale(c, scale) if *c == channel => Some(*scale),
                _ => None,
            })
            .collect()
    }

    fn record_write(&mut self, call: Call) -> Result<(), InstrumentError> {
        self.call_log.push(call);
        if self.fail_writes {
            return Err(InstrumentError::Disconnected("scripted write failure".into()));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Frame {
        if let Some(frame) = self.frames.pop_front() {
            return frame;
        }
        match self.responder.as_mut() {
            Some(responder) => responder(&self.state),
            None => self.current.clone(),
        }
    }

    fn current_value(&self, pick: impl Fn(&Reading) -> f64) -> Result<f64, InstrumentError> {
        match &self.current {
            Frame::Reading(reading) => Ok(pick(reading)),
            Frame::Corrupt => Ok(INVALID_READING),
            Frame::Timeout => Err(InstrumentError::Timeout("scripted timeout".into())),
            Frame::Disconnect => Err(InstrumentError::Disconnected("scripted disconnect".into())),
        }
    }
}

impl Default for ScriptedInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentAdapter for ScriptedInstrument {
    fn set_generator_waveform(&mut self, waveform: Waveform) -> Result<(), InstrumentError> {
        self.record_write(Call::Waveform(waveform))?;
        self.state.waveform = Some(waveform);
        Ok(())
    }

    fn set_generator_frequency(&mut self, hz: f64) -> Result<(), InstrumentError> {
        self.record_write(Call::Frequency(hz))?;
        self.state.frequency = hz;
        Ok(())
    }

    fn set_generator_amplitude(&mut self, vpp: f64) -> Result<(), InstrumentError> {
        self.record_write(Call::Amplitude(vpp))?;
        self.state.amplitude = vpp;
        Ok(())
    }

    fn set_generator_offset(&mut self, volts: f64) -> Result<(), InstrumentError> {
        self.record_write(Call::Offset(volts))?;
        self.state.offset = volts;
        Ok(())
    }

    fn set_generator_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        self.record_write(Call::Output(enabled))?;
        self.state.output = enabled;
        Ok(())
    }

    fn set_scope_timebase(&mut self, seconds_per_div: f64) -> Result<(), InstrumentError> {
        self.record_write(Call::Timebase(seconds_per_div))?;
        self.state.timebase = seconds_per_div;
        Ok(())
    }

    fn set_scope_channel_scale(
        &mut self,
        channel: Channel,
        volts_per_div: f64,
    ) -> Result<(), InstrumentError> {
        self.record_write(Call::ChannelScale(channel, volts_per_div))?;
        self.state.scales[channel.index()] = volts_per_div;
        Ok(())
    }

    fn set_scope_coupling(
        &mut self,
        channel: Channel,
        coupling: Coupling,
    ) -> Result<(), InstrumentError> {
        self.record_write(Call::Coupling(channel, coupling))
    }

    fn set_scope_trigger_sweep(&mut self, sweep: TriggerSweep) -> Result<(), InstrumentError> {
        self.record_write(Call::TriggerSweep(sweep))
    }

    fn query_channel_measurement(
        &mut self,
        channel: Channel,
        kind: MeasurementKind,
    ) -> Result<f64, InstrumentError> {
        self.call_log.push(Call::Measure(channel, kind));
        if channel == Channel::Ch1 {
            self.samples_started += 1;
            self.current = self.next_frame();
        }
        self.current_value(|reading| reading.channels[channel.index()])
    }

    fn query_computed_frequency(&mut self) -> Result<f64, InstrumentError> {
        self.call_log.push(Call::ComputedFrequency);
        self.current_value(|reading| reading.frequency)
    }
}
