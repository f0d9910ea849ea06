//! Dual-pass sweep orchestration.
//!
//! A sweep runs the acquisition controller once per setpoint in a coarse
//! pass, with every dependent channel ranged from the generator level, then
//! derives per-point vertical scales from the coarse readings and repeats
//! the whole plan in a fine pass. With dual-pass ranging disabled only the
//! coarse pass runs.
//!
//! Any setpoint failure aborts the sweep; no partial result is returned.

use crate::acquisition::{AcquisitionController, ChannelSet, Setpoint, Stimulus};
use crate::clock::Clock;
use crate::config::{RangingSettings, ScopeSettings, Settings};
use crate::error::{SweepError, SweepResult};
use crate::instrument::{Channel, Coupling, InstrumentAdapter, MeasurementKind, TriggerSweep, Waveform};
use crate::range::round_up_to_scale;
use crate::result::ResultSet;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, info_span, warn};

/// Independent variable and recording mode of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Generator amplitude at a fixed frequency.
    Amplitude,
    /// Generator frequency at a fixed amplitude.
    Frequency,
    /// Frequency sweep recorded into the current band/gain slot.
    FrequencyMultiband,
    /// DC offset; channels 1 and 2 read as averages across a shunt.
    IvCurve,
}

impl SweepMode {
    /// Results go to band/gain slots.
    pub fn is_multiband(self) -> bool {
        self == SweepMode::FrequencyMultiband
    }

    /// The plan holds frequencies.
    pub fn sweeps_frequency(self) -> bool {
        matches!(self, SweepMode::Frequency | SweepMode::FrequencyMultiband)
    }

    /// Generator waveform for this mode.
    pub fn waveform(self) -> Waveform {
        match self {
            SweepMode::IvCurve => Waveform::Dc,
            _ => Waveform::Sine,
        }
    }

    /// Measurement on the two main channels.
    pub fn measurement_kind(self) -> MeasurementKind {
        match self {
            SweepMode::IvCurve => MeasurementKind::Average,
            _ => MeasurementKind::PeakToPeak,
        }
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepMode::Amplitude => "amplitude",
            SweepMode::Frequency => "frequency",
            SweepMode::FrequencyMultiband => "frequency-multiband",
            SweepMode::IvCurve => "iv-curve",
        };
        f.write_str(name)
    }
}

/// Everything needed to run one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRequest {
    /// What is swept.
    pub mode: SweepMode,
    /// Values of the independent variable, in sweep order.
    pub plan: Vec<f64>,
    /// Generator Vpp used by frequency sweeps.
    pub default_amplitude: f64,
    /// Generator frequency used by amplitude sweeps.
    pub default_frequency: f64,
    /// Auxiliary channels to read.
    pub channels: ChannelSet,
}

impl SweepRequest {
    /// Request with 1 Vpp / 1 kHz defaults and channels 1-2 only.
    pub fn new(mode: SweepMode, plan: Vec<f64>) -> Self {
        Self {
            mode,
            plan,
            default_amplitude: 1.0,
            default_frequency: 1000.0,
            channels: ChannelSet::default(),
        }
    }

    /// Set the fixed amplitude for frequency sweeps.
    pub fn with_default_amplitude(mut self, vpp: f64) -> Self {
        self.default_amplitude = vpp;
        self
    }

    /// Set the fixed frequency for amplitude sweeps.
    pub fn with_default_frequency(mut self, hz: f64) -> Self {
        self.default_frequency = hz;
        self
    }

    /// Set the channels to read.
    pub fn with_channels(mut self, channels: ChannelSet) -> Self {
        self.channels = channels;
        self
    }

    /// Expand the plan into generator setpoints.
    pub fn setpoints(&self) -> SweepResult<Vec<Setpoint>> {
        if self.plan.is_empty() {
            return Err(SweepError::InvalidRange("sweep plan is empty".into()));
        }
        if self.plan.iter().any(|v| !v.is_finite()) {
            return Err(SweepError::InvalidRange("sweep plan contains a non-finite value".into()));
        }
        if self.mode.sweeps_frequency() && self.plan.iter().any(|f| *f <= 0.0) {
            return Err(SweepError::InvalidRange(
                "frequency setpoints must be positive".into(),
            ));
        }
        if self.mode == SweepMode::Amplitude && self.default_frequency <= 0.0 {
            return Err(SweepError::InvalidRange(format!(
                "default frequency must be positive (got {})",
                self.default_frequency
            )));
        }

        Ok(self
            .plan
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                let stimulus = match self.mode {
                    SweepMode::Frequency | SweepMode::FrequencyMultiband => Stimulus::Sine {
                        frequency: value,
                        amplitude: self.default_amplitude,
                    },
                    SweepMode::Amplitude => Stimulus::Sine {
                        frequency: self.default_frequency,
                        amplitude: value,
                    },
                    SweepMode::IvCurve => Stimulus::Dc { offset: value },
                };
                Setpoint {
                    index,
                    value,
                    stimulus,
                }
            })
            .collect())
    }
}

// =============================================================================
// Vertical ranging
// =============================================================================

/// First-pass volts/div for every dependent channel, from the generator level alone.
pub fn coarse_scales(
    stimulus: &Stimulus,
    channels: ChannelSet,
    ranging: &RangingSettings,
    scope: &ScopeSettings,
) -> Vec<(Channel, f64)> {
    let scale = round_up_to_scale(
        stimulus.level() * stimulus.screen_factor() * ranging.crude_sweep_factor,
        &scope.scale_table,
    );
    channels.dependent().into_iter().map(|c| (c, scale)).collect()
}

/// Per-point volts/div derived from a coarse pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineScaleTable {
    points: Vec<Vec<(Channel, f64)>>,
}

impl FineScaleTable {
    /// One entry per coarse point: `round_up(|reading| / divisions * factor)`
    /// for every dependent channel, doubled for channels read as averages.
    pub fn derive(coarse: &ResultSet, ranging: &RangingSettings, scope: &ScopeSettings) -> Self {
        let dependent = coarse.channels().dependent();
        let points = (0..coarse.len())
            .map(|i| {
                dependent
                    .iter()
                    .filter_map(|&channel| {
                        let reading = coarse.channel(channel)?.get(i)?.abs();
                        let factor = if channel == Channel::Ch2
                            && coarse.measurement_kind() == MeasurementKind::Average
                        {
                            2.0
                        } else {
                            1.0
                        };
                        let wanted = reading * factor / scope.vertical_divisions
                            * ranging.fine_scale_factor;
                        Some((channel, round_up_to_scale(wanted, &scope.scale_table)))
                    })
                    .collect()
            })
            .collect();
        Self { points }
    }

    /// Number of ranged points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// No point was ranged.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Scales for the point at `index`.
    pub fn for_point(&self, index: usize) -> SweepResult<&[(Channel, f64)]> {
        self.points
            .get(index)
            .map(Vec::as_slice)
            .ok_or(SweepError::FineScaleUnavailable {
                table: self.points.len(),
                points: index + 1,
            })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// A completed sweep.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Result of the last pass run (fine when dual-pass ranging is on).
    pub result: ResultSet,
    /// Coarse pass, kept only when a fine pass followed it.
    pub coarse: Option<ResultSet>,
    /// Scales the fine pass used.
    pub fine_scales: Option<FineScaleTable>,
    /// Wall-clock start.
    pub started_at: DateTime<Local>,
    /// Duration by the orchestrator's clock.
    pub elapsed: Duration,
}

/// Runs complete sweeps against one instrument session.
pub struct SweepOrchestrator<'a, A: ?Sized, C> {
    adapter: &'a mut A,
    clock: C,
    settings: Settings,
}

impl<'a, A, C> SweepOrchestrator<'a, A, C>
where
    A: InstrumentAdapter + ?Sized,
    C: Clock,
{
    /// Orchestrator over one borrowed session.
    pub fn new(adapter: &'a mut A, clock: C, settings: &Settings) -> Self {
        Self {
            adapter,
            clock,
            settings: settings.clone(),
        }
    }

    /// Settings used for every sweep.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run `request` to completion, or fail on the first setpoint that does.
    pub fn run(&mut self, request: &SweepRequest) -> SweepResult<SweepOutcome> {
        let setpoints = request.setpoints()?;
        let span = info_span!("sweep", mode = %request.mode, points = setpoints.len());
        let _enter = span.enter();

        let started_at = Local::now();
        let t0 = self.clock.now();
        self.prepare(request.mode, &setpoints[0])?;

        let passes = self.run_passes(request, &setpoints);

        if self.settings.session.turn_off_after_scan {
            if let Err(err) = self.adapter.set_generator_output(false) {
                if passes.is_ok() {
                    return Err(err.into());
                }
                warn!(error = %err, "could not switch generator output off");
            }
        }

        let (result, coarse, fine_scales) = passes?;
        let elapsed = self.clock.now().saturating_sub(t0);
        info!(?elapsed, points = result.len(), "sweep complete");
        Ok(SweepOutcome {
            result,
            coarse,
            fine_scales,
            started_at,
            elapsed,
        })
    }

    /// Put both instruments into the mode's configuration and switch the output on.
    fn prepare(&mut self, mode: SweepMode, first: &Setpoint) -> SweepResult<()> {
        let adapter = &mut *self.adapter;
        match mode.waveform() {
            Waveform::Dc => {
                adapter.set_scope_coupling(Channel::Ch1, Coupling::Dc)?;
                adapter.set_scope_coupling(Channel::Ch2, Coupling::Dc)?;
                adapter.set_scope_trigger_sweep(TriggerSweep::Auto)?;
                adapter.set_generator_waveform(Waveform::Dc)?;
            }
            Waveform::Sine => {
                adapter.set_scope_trigger_sweep(TriggerSweep::Normal)?;
                adapter.set_generator_waveform(Waveform::Sine)?;
            }
        }
        adapter.set_generator_offset(0.0)?;
        match first.stimulus {
            Stimulus::Sine { amplitude, .. } => adapter.set_generator_amplitude(amplitude)?,
            Stimulus::Dc { offset } => adapter.set_generator_offset(offset)?,
        }
        adapter.set_generator_output(true)?;
        Ok(())
    }

    fn run_passes(
        &mut self,
        request: &SweepRequest,
        setpoints: &[Setpoint],
    ) -> SweepResult<(ResultSet, Option<ResultSet>, Option<FineScaleTable>)> {
        let Settings {
            scope,
            acquisition,
            ranging,
            ..
        } = &self.settings;
        let mut controller = AcquisitionController::new(
            &mut *self.adapter,
            &self.clock,
            acquisition.clone(),
            scope.clone(),
            ranging.vertical_expand_factor,
        );

        let coarse = run_pass(&mut controller, "coarse", request, setpoints, |setpoint| {
            Ok(coarse_scales(&setpoint.stimulus, request.channels, ranging, scope))
        })?;
        if !ranging.auto_dual_sweep {
            return Ok((coarse, None, None));
        }

        let fine_scales = FineScaleTable::derive(&coarse, ranging, scope);
        if fine_scales.len() != setpoints.len() {
            return Err(SweepError::FineScaleUnavailable {
                table: fine_scales.len(),
                points: setpoints.len(),
            });
        }
        let fine = run_pass(&mut controller, "fine", request, setpoints, |setpoint| {
            Ok(fine_scales.for_point(setpoint.index)?.to_vec())
        })?;
        Ok((fine, Some(coarse), Some(fine_scales)))
    }
}

fn run_pass<A, C>(
    controller: &mut AcquisitionController<'_, A, C>,
    pass: &str,
    request: &SweepRequest,
    setpoints: &[Setpoint],
    mut scales_for: impl FnMut(&Setpoint) -> SweepResult<Vec<(Channel, f64)>>,
) -> SweepResult<ResultSet>
where
    A: InstrumentAdapter + ?Sized,
    C: Clock,
{
    let span = info_span!("pass", pass);
    let _enter = span.enter();

    let mut result = ResultSet::new(request.mode, request.channels);
    for setpoint in setpoints {
        let scales = scales_for(setpoint)?;
        let sample = controller.acquire(setpoint, request.channels, &scales)?;
        result.push(setpoint.value, &sample);
    }
    info!(points = result.len(), "pass complete");
    Ok(result)
}
