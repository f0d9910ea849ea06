//! SCPI implementation of the instrument adapter.
//!
//! [`ScpiBench`] pairs a DS1000Z-class oscilloscope with an SDG-class
//! arbitrary waveform generator. Both are reached through a [`ScpiTransport`],
//! so the same command set works over a raw LXI socket or a serial line.

use super::{Channel, Coupling, InstrumentAdapter, MeasurementKind, TriggerSweep, Waveform};
use crate::error::InstrumentError;
use std::collections::HashSet;
use tracing::trace;

/// Abstraction over the link to one SCPI instrument.
pub trait ScpiTransport {
    /// Short identifier used in log output.
    fn name(&self) -> &str;

    /// Send a command that produces no response.
    fn write(&mut self, command: &str) -> Result<(), InstrumentError>;

    /// Send a query and return the trimmed response line.
    fn query(&mut self, command: &str) -> Result<String, InstrumentError>;
}

impl<T: ScpiTransport + ?Sized> ScpiTransport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        (**self).query(command)
    }
}

/// Parse a floating-point response from a SCPI query.
pub fn parse_f64_response(command: &str, response: &str) -> Result<f64, InstrumentError> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| InstrumentError::Malformed {
            command: command.to_string(),
            response: response.to_string(),
        })
}

/// Oscilloscope plus generator, each on its own transport.
pub struct ScpiBench<S, G> {
    scope: S,
    generator: G,
    generator_channel: String,
    enabled_items: HashSet<(Channel, MeasurementKind)>,
}

impl<S: ScpiTransport, G: ScpiTransport> ScpiBench<S, G> {
    /// `generator_channel` is the output prefix, e.g. `"C2"`.
    pub fn new(scope: S, generator: G, generator_channel: impl Into<String>) -> Self {
        Self {
            scope,
            generator,
            generator_channel: generator_channel.into(),
            enabled_items: HashSet::new(),
        }
    }

    fn scope_write(&mut self, command: String) -> Result<(), InstrumentError> {
        trace!(target: "scpi", instrument = self.scope.name(), %command, "write");
        self.scope.write(&command)
    }

    fn generator_write(&mut self, command: String) -> Result<(), InstrumentError> {
        trace!(target: "scpi", instrument = self.generator.name(), %command, "write");
        self.generator.write(&command)
    }

    fn basic_wave(&mut self, parameter: &str, value: impl std::fmt::Display) -> Result<(), InstrumentError> {
        let command = format!("{}:BSWV {},{}", self.generator_channel, parameter, value);
        self.generator_write(command)
    }

    /// Statistic items must be enabled on the scope before they can be read.
    fn ensure_item(&mut self, channel: Channel, kind: MeasurementKind) -> Result<(), InstrumentError> {
        if self.enabled_items.insert((channel, kind)) {
            self.scope_write(format!("MEAS:STAT:ITEM {},CHAN{}", kind.label(), channel.number()))?;
        }
        Ok(())
    }

    fn read_item(&mut self, channel: Channel, kind: MeasurementKind) -> Result<f64, InstrumentError> {
        self.ensure_item(channel, kind)?;
        let command = format!("MEAS:STAT:ITEM? CURR,{},CHAN{}", kind.label(), channel.number());
        let response = self.scope.query(&command)?;
        trace!(target: "scpi", instrument = self.scope.name(), %command, %response, "query");
        parse_f64_response(&command, &response)
    }
}

impl<S: ScpiTransport, G: ScpiTransport> InstrumentAdapter for ScpiBench<S, G> {
    fn set_generator_waveform(&mut self, waveform: Waveform) -> Result<(), InstrumentError> {
        let shape = match waveform {
            Waveform::Sine => "SINE",
            Waveform::Dc => "DC",
        };
        self.basic_wave("WVTP", shape)
    }

    fn set_generator_frequency(&mut self, hz: f64) -> Result<(), InstrumentError> {
        self.basic_wave("FRQ", hz)
    }

    fn set_generator_amplitude(&mut self, vpp: f64) -> Result<(), InstrumentError> {
        self.basic_wave("AMP", vpp)
    }

    fn set_generator_offset(&mut self, volts: f64) -> Result<(), InstrumentError> {
        self.basic_wave("OFST", volts)
    }

    fn set_generator_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        let state = if enabled { "ON" } else { "OFF" };
        let command = format!("{}:OUTP {}", self.generator_channel, state);
        self.generator_write(command)
    }

    fn set_scope_timebase(&mut self, seconds_per_div: f64) -> Result<(), InstrumentError> {
        self.scope_write(format!("TIM:MAIN:SCAL {seconds_per_div}"))
    }

    fn set_scope_channel_scale(
        &mut self,
        channel: Channel,
        volts_per_div: f64,
    ) -> Result<(), InstrumentError> {
        self.scope_write(format!("CHAN{}:SCAL {}", channel.number(), volts_per_div))
    }

    fn set_scope_coupling(
        &mut self,
        channel: Channel,
        coupling: Coupling,
    ) -> Result<(), InstrumentError> {
        let mode = match coupling {
            Coupling::Ac => "AC",
            Coupling::Dc => "DC",
        };
        self.scope_write(format!("CHAN{}:COUP {}", channel.number(), mode))
    }

    fn set_scope_trigger_sweep(&mut self, sweep: TriggerSweep) -> Result<(), InstrumentError> {
        let mode = match sweep {
            TriggerSweep::Auto => "AUTO",
            TriggerSweep::Normal => "NORM",
        };
        self.scope_write(format!("TRIG:SWE {mode}"))
    }

    fn query_channel_measurement(
        &mut self,
        channel: Channel,
        kind: MeasurementKind,
    ) -> Result<f64, InstrumentError> {
        self.read_item(channel, kind)
    }

    fn query_computed_frequency(&mut self) -> Result<f64, InstrumentError> {
        self.read_item(Channel::Ch1, MeasurementKind::Frequency)
    }
}
