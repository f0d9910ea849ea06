//! End-to-end sweeps against the scripted and simulated benches.

use sweep_daq::acquisition::ChannelSet;
use sweep_daq::bands::{BandAggregator, BandPosition, RecordOutcome};
use sweep_daq::clock::ManualClock;
use sweep_daq::config::Settings;
use sweep_daq::error::SweepError;
use sweep_daq::export;
use sweep_daq::instrument::mock::{Frame, Reading, ScriptedInstrument};
use sweep_daq::instrument::sim::SimulatedBench;
use sweep_daq::instrument::Channel;
use sweep_daq::plan::{generate_plan, PlanSpec};
use sweep_daq::sweep::{SweepMode, SweepOrchestrator, SweepRequest};

/// Output is 0.8 of the input below 500 Hz and 0.05 above.
fn two_level_filter() -> ScriptedInstrument {
    ScriptedInstrument::with_responder(|state| {
        let gain = if state.frequency < 500.0 { 0.8 } else { 0.05 };
        Frame::Reading(Reading::new(
            state.frequency,
            [state.amplitude, state.amplitude * gain, 0.0, 0.0],
        ))
    })
}

#[test]
fn fine_pass_uses_scales_derived_from_coarse_readings() {
    let mut bench = two_level_filter();
    let clock = ManualClock::new();
    let request = SweepRequest::new(SweepMode::Frequency, vec![100.0, 1000.0]);

    let outcome = SweepOrchestrator::new(&mut bench, &clock, &Settings::default())
        .run(&request)
        .unwrap();

    // coarse: 1 Vpp * 0.25 -> 0.5 V/div on both points
    // fine: 0.8 / 8 * 1.5 = 0.15 -> 0.2 and 0.05 / 8 * 1.5 -> 0.01
    assert_eq!(bench.scales_written(Channel::Ch2), vec![0.5, 0.5, 0.2, 0.01]);
    assert_eq!(bench.scales_written(Channel::Ch1), vec![0.2; 4]);

    let fine = outcome.fine_scales.as_ref().unwrap();
    assert_eq!(fine.len(), 2);
    assert_eq!(fine.for_point(1).unwrap(), &[(Channel::Ch2, 0.01)]);

    assert_eq!(outcome.coarse.as_ref().map(|c| c.len()), Some(2));
    assert_eq!(outcome.result.channel(Channel::Ch2), Some(&[0.8, 0.05][..]));
    // two passes of two points, two samples each
    assert_eq!(bench.samples_started(), 8);
}

#[test]
fn simulated_rc_filter_bode_plot() {
    let mut bench = SimulatedBench::new(1000.0);
    let clock = ManualClock::new();
    let plan = generate_plan(&PlanSpec::Logarithmic {
        start: 100.0,
        end: 10_000.0,
        count: 3,
    })
    .unwrap();
    let request = SweepRequest::new(SweepMode::Frequency, plan).with_channels(ChannelSet::all());

    let outcome = SweepOrchestrator::new(&mut bench, &clock, &Settings::default())
        .run(&request)
        .unwrap();

    let gain = outcome.result.gain_db();
    assert_eq!(gain.len(), 3);
    assert!(gain[0].abs() < 0.2, "passband gain {}", gain[0]);
    assert!((gain[1] + 3.01).abs() < 0.2, "corner gain {}", gain[1]);
    assert!((gain[2] + 20.0).abs() < 0.3, "stopband gain {}", gain[2]);

    let ch4 = outcome.result.channel(Channel::Ch4).unwrap();
    let ch2 = outcome.result.channel(Channel::Ch2).unwrap();
    assert!((ch4[0] / ch2[0] - 0.25).abs() < 0.01);
    assert!(outcome.elapsed.as_secs_f64() > 0.0);
}

#[test]
fn simulated_iv_curve_is_linear() {
    let mut bench = SimulatedBench::new(1000.0)
        .with_noise(0.0)
        .with_resistances(900.0, 100.0);
    let clock = ManualClock::new();
    let request = SweepRequest::new(SweepMode::IvCurve, vec![0.5, 1.0, 2.0]);

    let outcome = SweepOrchestrator::new(&mut bench, &clock, &Settings::default())
        .run(&request)
        .unwrap();

    let curve = outcome.result.iv_curve(100.0);
    for (v, i) in curve.voltage.iter().zip(&curve.current) {
        assert!((v / i - 900.0).abs() < 1e-6, "R = {}", v / i);
    }
    assert_eq!(outcome.result.frequencies(), &[0.0, 0.0, 0.0]);
}

#[test]
fn failed_sweep_leaves_aggregated_results_untouched() {
    let settings = Settings::default();
    let clock = ManualClock::new();
    let mut aggregator = BandAggregator::from_settings(&settings.session);

    let mut good = ScriptedInstrument::new();
    let outcome = SweepOrchestrator::new(&mut good, &clock, &settings)
        .run(&SweepRequest::new(SweepMode::Frequency, vec![1000.0]))
        .unwrap();
    aggregator.record(outcome.result);

    let mut dead = ScriptedInstrument::with_frames(vec![
        Frame::Reading(Reading::new(1000.0, [1.0; 4])),
        Frame::Reading(Reading::new(1000.0, [1.0; 4])),
        Frame::Disconnect,
    ]);
    let err = SweepOrchestrator::new(&mut dead, &clock, &settings)
        .run(&SweepRequest::new(SweepMode::Frequency, vec![1000.0, 2000.0]))
        .unwrap_err();

    assert!(matches!(err, SweepError::Communication(_)));
    assert!(!err.is_recoverable());
    assert_eq!(aggregator.history().len(), 1);
    assert_eq!(aggregator.latest().unwrap().len(), 1);
}

#[test]
fn multiband_scan_fills_every_slot_then_stops() {
    let settings = Settings::default();
    let clock = ManualClock::new();
    let mut bench = SimulatedBench::new(2000.0);
    let mut aggregator = BandAggregator::from_settings(&settings.session);
    let request = SweepRequest::new(SweepMode::FrequencyMultiband, vec![200.0, 2000.0]);

    let mut outcomes = Vec::new();
    for _ in 0..7 {
        let outcome = SweepOrchestrator::new(&mut bench, &clock, &settings)
            .run(&request)
            .unwrap();
        outcomes.push(aggregator.record(outcome.result));
    }

    assert_eq!(
        outcomes[0],
        RecordOutcome::Slotted {
            slot: BandPosition::Baseline,
            advanced_to: Some(BandPosition::LowMin),
            terminal: false,
        }
    );
    assert_eq!(
        outcomes[6],
        RecordOutcome::Slotted {
            slot: BandPosition::HighMax,
            advanced_to: None,
            terminal: true,
        }
    );
    for position in BandPosition::ALL {
        assert!(aggregator.is_scanned(position), "{position} not scanned");
    }

    let dir = tempfile::tempdir().unwrap();
    let path = export::save(&mut aggregator, &dir.path().join("bands.txt"), "bands", 100.0).unwrap();
    assert_eq!(path.file_name().unwrap(), "bands.kv1");
    let text = std::fs::read_to_string(path).unwrap();
    for position in BandPosition::ALL {
        assert!(text.contains(&format!("m<d> {}_freqs [", position.slot_name())));
    }
    assert!(!aggregator.has_unsaved());
}
