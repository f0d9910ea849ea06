//! Per-setpoint acquisition with equilibrium and integrity checks.
//!
//! [`AcquisitionController::acquire`] configures the bench for one setpoint,
//! waits for the circuit to settle and then samples until two consecutive
//! readings agree:
//!
//! 1. **Configure**: generator stimulus, timebase and vertical scales.
//! 2. **Settle**: one fixed delay before the first sample.
//! 3. **Collecting**: a sample whose frequency matches the commanded one
//!    becomes the candidate.
//! 4. **Verifying**: each further sample is compared against the candidate.
//!    Within tolerance the new sample is accepted; otherwise it replaces the
//!    candidate and sampling continues.
//!
//! Failed and corrupt reads count against a consecutive-failure budget.
//! Frequency mismatches and drifting readings are bounded by the retry
//! window, measured from the start of configuration.

use crate::clock::Clock;
use crate::config::{AcquisitionSettings, ScopeSettings};
use crate::error::{InstrumentError, SweepError, SweepResult};
use crate::instrument::{Channel, InstrumentAdapter, MeasurementKind};
use crate::range::{percent_delta, round_up_to_scale};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, debug_span, info, warn};

// =============================================================================
// Setpoints and samples
// =============================================================================

/// What the generator drives at one setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Stimulus {
    /// Sine wave; every channel is read peak-to-peak.
    Sine {
        /// Hz.
        frequency: f64,
        /// Vpp.
        amplitude: f64,
    },
    /// DC level; channels 1 and 2 are read as averages.
    Dc {
        /// Volts.
        offset: f64,
    },
}

impl Stimulus {
    /// Measurement taken on `channel` for this stimulus.
    pub fn measurement_kind(&self, channel: Channel) -> MeasurementKind {
        match (self, channel) {
            (Stimulus::Dc { .. }, Channel::Ch1 | Channel::Ch2) => MeasurementKind::Average,
            _ => MeasurementKind::PeakToPeak,
        }
    }

    /// Commanded frequency, if a periodic signal is driven.
    pub fn frequency(&self) -> Option<f64> {
        match self {
            Stimulus::Sine { frequency, .. } => Some(*frequency),
            Stimulus::Dc { .. } => None,
        }
    }

    /// Signal size used for vertical ranging: Vpp for a sine, |V| for DC.
    pub fn level(&self) -> f64 {
        match self {
            Stimulus::Sine { amplitude, .. } => amplitude.abs(),
            Stimulus::Dc { offset } => offset.abs(),
        }
    }

    /// Screen fraction multiplier; a unipolar DC level only uses half the screen.
    pub fn screen_factor(&self) -> f64 {
        match self {
            Stimulus::Sine { .. } => 1.0,
            Stimulus::Dc { .. } => 2.0,
        }
    }
}

/// One point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    /// Position in the plan.
    pub index: usize,
    /// Value of the independent variable (Hz, Vpp or V).
    pub value: f64,
    /// Generator settings for this point.
    pub stimulus: Stimulus,
}

/// Which optional channels are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSet {
    /// Read channel 3.
    pub ch3: bool,
    /// Read channel 4.
    pub ch4: bool,
}

impl ChannelSet {
    /// Channels 1 and 2 plus the chosen auxiliaries.
    pub fn new(ch3: bool, ch4: bool) -> Self {
        Self { ch3, ch4 }
    }

    /// All four channels.
    pub fn all() -> Self {
        Self::new(true, true)
    }

    /// Channels 1 and 2 are always enabled.
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Ch1 | Channel::Ch2 => true,
            Channel::Ch3 => self.ch3,
            Channel::Ch4 => self.ch4,
        }
    }

    /// Every enabled channel, channel 1 first.
    pub fn active(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    /// Enabled channels other than the reference channel.
    pub fn dependent(&self) -> Vec<Channel> {
        self.active()
            .into_iter()
            .filter(|c| *c != Channel::Ch1)
            .collect()
    }
}

/// One accepted reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Frequency measured by the scope; 0 for DC stimulus.
    pub frequency: f64,
    /// Reference channel reading.
    pub ch1: f64,
    /// Primary dependent reading.
    pub ch2: f64,
    /// Present only when channel 3 is enabled.
    pub ch3: Option<f64>,
    /// Present only when channel 4 is enabled.
    pub ch4: Option<f64>,
}

impl Sample {
    /// Reading for `channel`, if it was taken.
    pub fn channel(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Ch1 => Some(self.ch1),
            Channel::Ch2 => Some(self.ch2),
            Channel::Ch3 => self.ch3,
            Channel::Ch4 => self.ch4,
        }
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        [Some(self.frequency), Some(self.ch1), Some(self.ch2), self.ch3, self.ch4]
            .into_iter()
            .flatten()
    }

    /// Non-finite values and values above `ceiling` mark a corrupt read.
    pub fn is_corrupt(&self, ceiling: f64) -> bool {
        self.values().any(|v| !v.is_finite() || v.abs() > ceiling)
    }

    /// Largest channel delta to `other`, including frequency if requested.
    pub fn max_delta(&self, other: &Sample, include_frequency: bool) -> f64 {
        let mut delta: f64 = 0.0;
        if include_frequency {
            delta = percent_delta(self.frequency, other.frequency);
        }
        for channel in Channel::ALL {
            if let (Some(a), Some(b)) = (self.channel(channel), other.channel(channel)) {
                delta = delta.max(percent_delta(a, b));
            }
        }
        delta
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Drives one setpoint at a time against an instrument session.
pub struct AcquisitionController<'a, A: ?Sized, C> {
    adapter: &'a mut A,
    clock: C,
    policy: AcquisitionSettings,
    scope: ScopeSettings,
    vertical_expand_factor: f64,
}

enum Read {
    Good(Sample),
    Bad,
}

impl<'a, A, C> AcquisitionController<'a, A, C>
where
    A: InstrumentAdapter + ?Sized,
    C: Clock,
{
    /// `vertical_expand_factor` is the headroom on the channel 1 scale.
    pub fn new(
        adapter: &'a mut A,
        clock: C,
        policy: AcquisitionSettings,
        scope: ScopeSettings,
        vertical_expand_factor: f64,
    ) -> Self {
        Self {
            adapter,
            clock,
            policy,
            scope,
            vertical_expand_factor,
        }
    }

    /// Give the adapter back for the next step of the sweep.
    pub fn adapter(&mut self) -> &mut A {
        &mut *self.adapter
    }

    /// Seconds/div that fits the configured number of periods on screen.
    pub fn timebase_for(&self, frequency: f64) -> f64 {
        (1.0 / frequency) * self.scope.peaks_per_frame / self.scope.horizontal_divisions
    }

    /// Volts/div for the reference channel, which probes the stimulus directly.
    pub fn reference_scale(&self, stimulus: &Stimulus) -> f64 {
        let wanted = stimulus.level() * stimulus.screen_factor() / self.scope.vertical_divisions
            * self.vertical_expand_factor;
        round_up_to_scale(wanted, &self.scope.scale_table)
    }

    /// Acquire one equilibrium sample at `setpoint`.
    ///
    /// `scales` gives the volts/div for every dependent channel; the reference
    /// channel is ranged from the stimulus.
    pub fn acquire(
        &mut self,
        setpoint: &Setpoint,
        channels: ChannelSet,
        scales: &[(Channel, f64)],
    ) -> SweepResult<Sample> {
        let span = debug_span!("setpoint", index = setpoint.index, value = setpoint.value);
        let _enter = span.enter();

        let started = self.clock.now();
        self.configure(&setpoint.stimulus, scales)?;
        self.clock.sleep(self.policy.settle_delay);

        let expected_frequency = setpoint.stimulus.frequency();
        let mut failures: u32 = 0;
        let mut candidate: Option<Sample> = None;

        loop {
            let sample = match self.read(&setpoint.stimulus, channels)? {
                Read::Good(sample) => sample,
                Read::Bad => {
                    failures += 1;
                    if failures > self.policy.max_consecutive_failures {
                        warn!(failures, "too many consecutive bad readings");
                        return Err(SweepError::AcquisitionFailed {
                            index: setpoint.index,
                            setpoint: setpoint.value,
                            failures,
                        });
                    }
                    self.clock.sleep(self.policy.failure_backoff);
                    continue;
                }
            };
            failures = 0;

            match candidate.take() {
                None => {
                    if let Some(expected) = expected_frequency {
                        let delta = percent_delta(sample.frequency, expected);
                        if delta > self.policy.frequency_tolerance_percent {
                            debug!(
                                measured = sample.frequency,
                                expected,
                                delta,
                                "frequency mismatch"
                            );
                            self.check_window(setpoint, started, delta)?;
                            self.clock.sleep(self.policy.equilibrium_interval);
                            continue;
                        }
                    }
                    candidate = Some(sample);
                    self.clock.sleep(self.policy.equilibrium_interval);
                }
                Some(previous) => {
                    let delta = previous.max_delta(&sample, expected_frequency.is_some());
                    if delta <= self.policy.equilibrium_tolerance_percent {
                        info!(
                            index = setpoint.index,
                            value = setpoint.value,
                            ch1 = sample.ch1,
                            ch2 = sample.ch2,
                            "point accepted"
                        );
                        return Ok(sample);
                    }
                    debug!(delta, "not settled");
                    candidate = Some(sample);
                    self.check_window(setpoint, started, delta)?;
                    self.clock.sleep(self.policy.equilibrium_interval);
                }
            }
        }
    }

    fn configure(
        &mut self,
        stimulus: &Stimulus,
        scales: &[(Channel, f64)],
    ) -> Result<(), InstrumentError> {
        match *stimulus {
            Stimulus::Sine {
                frequency,
                amplitude,
            } => {
                self.adapter.set_generator_frequency(frequency)?;
                self.adapter.set_generator_amplitude(amplitude)?;
                if frequency > 0.0 {
                    let timebase = self.timebase_for(frequency);
                    self.adapter.set_scope_timebase(timebase)?;
                }
            }
            Stimulus::Dc { offset } => {
                self.adapter.set_generator_offset(offset)?;
            }
        }

        let reference = self.reference_scale(stimulus);
        self.adapter.set_scope_channel_scale(Channel::Ch1, reference)?;
        for &(channel, scale) in scales {
            self.adapter.set_scope_channel_scale(channel, scale)?;
        }
        Ok(())
    }

    /// Read one sample, channel 1 first. Fatal adapter errors end the sweep.
    fn read(&mut self, stimulus: &Stimulus, channels: ChannelSet) -> SweepResult<Read> {
        match self.read_sample(stimulus, channels) {
            Ok(sample) if sample.is_corrupt(self.policy.sanity_ceiling) => {
                debug!(?sample, "corrupt reading discarded");
                Ok(Read::Bad)
            }
            Ok(sample) => Ok(Read::Good(sample)),
            Err(err) if err.is_fatal() => Err(SweepError::Communication(err)),
            Err(err) => {
                debug!(error = %err, "read failed");
                Ok(Read::Bad)
            }
        }
    }

    fn read_sample(
        &mut self,
        stimulus: &Stimulus,
        channels: ChannelSet,
    ) -> Result<Sample, InstrumentError> {
        let mut values = [None; 4];
        for channel in channels.active() {
            let kind = stimulus.measurement_kind(channel);
            values[channel.index()] = Some(self.adapter.query_channel_measurement(channel, kind)?);
        }
        let frequency = match stimulus {
            Stimulus::Sine { .. } => self.adapter.query_computed_frequency()?,
            Stimulus::Dc { .. } => 0.0,
        };
        Ok(Sample {
            frequency,
            ch1: values[0].unwrap_or_default(),
            ch2: values[1].unwrap_or_default(),
            ch3: values[2],
            ch4: values[3],
        })
    }

    fn check_window(
        &self,
        setpoint: &Setpoint,
        started: Duration,
        last_delta: f64,
    ) -> SweepResult<()> {
        let elapsed = self.clock.now().saturating_sub(started);
        if elapsed > self.policy.max_retry_window {
            warn!(?elapsed, last_delta, "retry window exceeded");
            return Err(SweepError::RetryTimeout {
                index: setpoint.index,
                setpoint: setpoint.value,
                elapsed,
                last_delta,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::instrument::mock::{Call, Frame, Reading, ScriptedInstrument};

    fn sine(index: usize, frequency: f64) -> Setpoint {
        Setpoint {
            index,
            value: frequency,
            stimulus: Stimulus::Sine {
                frequency,
                amplitude: 1.0,
            },
        }
    }

    fn controller<'a>(
        bench: &'a mut ScriptedInstrument,
        clock: &'a ManualClock,
    ) -> AcquisitionController<'a, ScriptedInstrument, &'a ManualClock> {
        AcquisitionController::new(
            bench,
            clock,
            AcquisitionSettings::default(),
            ScopeSettings::default(),
            1.5,
        )
    }

    fn steady(frequency: f64, ch2: f64) -> Frame {
        Frame::Reading(Reading::new(frequency, [1.0, ch2, 0.5, 0.25]))
    }

    #[test]
    fn stable_reading_takes_two_samples() {
        let mut bench = ScriptedInstrument::with_frames(vec![steady(1000.0, 0.5)]);
        let clock = ManualClock::new();
        let sample = controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[(Channel::Ch2, 0.2)])
            .unwrap();

        assert_eq!(bench.samples_started(), 2);
        assert_eq!(sample.ch2, 0.5);
        assert_eq!(sample.ch3, None);
        // settle 700 ms + one equilibrium interval
        assert_eq!(clock.now(), Duration::from_millis(1200));
    }

    #[test]
    fn configures_before_sampling() {
        let mut bench = ScriptedInstrument::new();
        let clock = ManualClock::new();
        controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[(Channel::Ch2, 0.05)])
            .unwrap();

        let calls = bench.calls();
        assert_eq!(calls[0], Call::Frequency(1000.0));
        assert_eq!(calls[1], Call::Amplitude(1.0));
        match calls[2] {
            Call::Timebase(t) => assert!((t - 1e-3 * 10.0 / 12.0).abs() < 1e-15),
            ref other => panic!("expected timebase, got {other:?}"),
        }
        // 1 Vpp / 8 div * 1.5 = 0.1875 -> 0.2
        assert_eq!(calls[3], Call::ChannelScale(Channel::Ch1, 0.2));
        assert_eq!(calls[4], Call::ChannelScale(Channel::Ch2, 0.05));
        assert_eq!(calls[5], Call::Measure(Channel::Ch1, MeasurementKind::PeakToPeak));
    }

    #[test]
    fn drifting_reading_times_out() {
        let mut step = 0.0;
        let mut bench = ScriptedInstrument::with_responder(move |_| {
            step += 1.0;
            Frame::Reading(Reading::new(1000.0, [1.0, 0.5 * 1.2f64.powf(step), 0.0, 0.0]))
        });
        let clock = ManualClock::new();
        let err = controller(&mut bench, &clock)
            .acquire(&sine(4, 1000.0), ChannelSet::default(), &[])
            .unwrap_err();

        match err {
            SweepError::RetryTimeout {
                index,
                elapsed,
                last_delta,
                ..
            } => {
                assert_eq!(index, 4);
                assert!(elapsed > Duration::from_secs(15));
                assert!(last_delta > 10.0);
            }
            other => panic!("expected RetryTimeout, got {other:?}"),
        }
    }

    #[test]
    fn frequency_mismatch_retries_then_settles() {
        let mut bench = ScriptedInstrument::with_frames(vec![
            steady(800.0, 0.5),
            steady(850.0, 0.5),
            steady(1010.0, 0.5),
        ]);
        let clock = ManualClock::new();
        let sample = controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[])
            .unwrap();

        assert_eq!(sample.frequency, 1010.0);
        assert_eq!(bench.samples_started(), 4);
    }

    #[test]
    fn frequency_never_matches_times_out() {
        let mut bench = ScriptedInstrument::with_frames(vec![steady(500.0, 0.5)]);
        let clock = ManualClock::new();
        let err = controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[])
            .unwrap_err();
        assert!(matches!(err, SweepError::RetryTimeout { last_delta, .. } if last_delta == 100.0));
    }

    #[test]
    fn persistent_failures_abort() {
        let mut bench = ScriptedInstrument::with_frames(vec![Frame::Timeout]);
        let clock = ManualClock::new();
        let err = controller(&mut bench, &clock)
            .acquire(&sine(2, 1000.0), ChannelSet::default(), &[])
            .unwrap_err();

        assert!(matches!(
            err,
            SweepError::AcquisitionFailed {
                index: 2,
                failures: 16,
                ..
            }
        ));
        assert_eq!(bench.samples_started(), 16);
    }

    #[test]
    fn corrupt_readings_count_as_failures() {
        let mut frames = vec![Frame::Corrupt; 15];
        frames.push(steady(1000.0, 0.5));
        let mut bench = ScriptedInstrument::with_frames(frames);
        let clock = ManualClock::new();
        let sample = controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::all(), &[])
            .unwrap();
        assert_eq!(sample.ch4, Some(0.25));
        assert_eq!(bench.samples_started(), 17);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.extend(vec![Frame::Timeout; 10]);
            frames.push(steady(400.0, 0.5));
        }
        frames.push(steady(1000.0, 0.5));
        let mut bench = ScriptedInstrument::with_frames(frames);
        let clock = ManualClock::new();
        let mut policy = AcquisitionSettings::default();
        policy.max_retry_window = Duration::from_secs(3600);
        let mut controller =
            AcquisitionController::new(&mut bench, &clock, policy, ScopeSettings::default(), 1.5);

        assert!(controller
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[])
            .is_ok());
    }

    #[test]
    fn disconnect_is_fatal() {
        let mut bench = ScriptedInstrument::with_frames(vec![Frame::Disconnect]);
        let clock = ManualClock::new();
        let err = controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[])
            .unwrap_err();
        assert!(matches!(err, SweepError::Communication(_)));
        assert_eq!(bench.samples_started(), 1);
    }

    #[test]
    fn configuration_write_failure_is_communication_error() {
        let mut bench = ScriptedInstrument::new();
        bench.fail_writes();
        let clock = ManualClock::new();
        let err = controller(&mut bench, &clock)
            .acquire(&sine(0, 1000.0), ChannelSet::default(), &[])
            .unwrap_err();
        assert!(matches!(err, SweepError::Communication(_)));
        assert_eq!(bench.samples_started(), 0);
    }

    #[test]
    fn dc_stimulus_reads_averages_without_frequency() {
        let mut bench = ScriptedInstrument::with_frames(vec![Frame::Reading(Reading::new(
            0.0,
            [2.0, 0.2, 0.0, 0.0],
        ))]);
        let clock = ManualClock::new();
        let setpoint = Setpoint {
            index: 0,
            value: 2.0,
            stimulus: Stimulus::Dc { offset: 2.0 },
        };
        let sample = controller(&mut bench, &clock)
            .acquire(&setpoint, ChannelSet::default(), &[(Channel::Ch2, 0.1)])
            .unwrap();

        assert_eq!(sample.frequency, 0.0);
        assert!(bench.calls().contains(&Call::Offset(2.0)));
        assert!(bench
            .calls()
            .contains(&Call::Measure(Channel::Ch2, MeasurementKind::Average)));
        assert!(!bench.calls().contains(&Call::ComputedFrequency));
        // 2 V * 2 / 8 div * 1.5 = 0.75 -> 1.0
        assert!(bench.calls().contains(&Call::ChannelScale(Channel::Ch1, 1.0)));
    }

    #[test]
    fn max_delta_uses_smaller_magnitude() {
        let a = Sample {
            frequency: 1000.0,
            ch1: 1.0,
            ch2: 0.5,
            ch3: None,
            ch4: None,
        };
        let b = Sample { ch2: 0.6, ..a };
        assert!((a.max_delta(&b, true) - 20.0).abs() < 1e-9);
        let c = Sample { frequency: 0.0, ..a };
        assert_eq!(a.max_delta(&c, false), 0.0);
        assert_eq!(a.max_delta(&c, true), 1000.0);
    }
}
