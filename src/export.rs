//! Saving aggregated results as KV1.
//!
//! Variable names per source:
//!
//! | source                         | names                                                  |
//! |--------------------------------|--------------------------------------------------------|
//! | history, accumulating          | `freqs0`, `in_vpp0`, `out_vpp0`, `ch3_vpp0`, `ch4_vpp0`, ... |
//! | history, latest only           | `freqs`, `in_vpp`, `out_vpp`, `ch3_vpp`, `ch4_vpp`     |
//! | I-V sweep in the history       | `V_vavg<i>`, `I_vavg<i>`, `Rshunt<i>`                  |
//! | band slot                      | `low_min_freqs`, `low_min_in_vpp`, ... (`base_` for the baseline) |

use crate::bands::BandAggregator;
use crate::error::SweepResult;
use crate::instrument::Channel;
use crate::kv1::Kv1Document;
use crate::result::ResultSet;
use crate::sweep::SweepMode;
use std::path::{Path, PathBuf};
use tracing::info;

/// Give `path` a `.kv1` extension unless it already has one (any case).
pub fn normalize_kv1_path(path: &Path) -> PathBuf {
    let has_kv1 = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("kv1"));
    if has_kv1 {
        path.to_path_buf()
    } else {
        path.with_extension("kv1")
    }
}

/// Build the KV1 document for everything `aggregator` holds.
pub fn build_document(aggregator: &BandAggregator, header: &str, shunt_ohms: f64) -> Kv1Document {
    let mut doc = Kv1Document::begin(header);

    let history = aggregator.history();
    if aggregator.accumulates() {
        for (i, result) in history.iter().enumerate() {
            write_result(&mut doc, result, "", &i.to_string(), shunt_ohms);
        }
    } else if let Some(result) = history.last() {
        write_result(&mut doc, result, "", "", shunt_ohms);
    }

    for (position, result) in aggregator.scanned() {
        let prefix = format!("{}_", position.slot_name());
        write_result(&mut doc, result, &prefix, "", shunt_ohms);
    }
    doc
}

fn write_result(doc: &mut Kv1Document, result: &ResultSet, prefix: &str, suffix: &str, shunt_ohms: f64) {
    let name = |base: &str| format!("{prefix}{base}{suffix}");

    if result.mode() == SweepMode::IvCurve {
        let curve = result.iv_curve(shunt_ohms);
        doc.assemble(&name("V_vavg"), curve.voltage)
            .assemble(&name("I_vavg"), curve.current)
            .assemble(&name("Rshunt"), shunt_ohms);
    } else {
        doc.assemble(&name("freqs"), result.frequencies())
            .assemble(&name("in_vpp"), result.channel(Channel::Ch1).unwrap_or_default())
            .assemble(&name("out_vpp"), result.channel(Channel::Ch2).unwrap_or_default());
    }
    for (channel, base) in [(Channel::Ch3, "ch3_vpp"), (Channel::Ch4, "ch4_vpp")] {
        if let Some(values) = result.channel(channel) {
            doc.assemble(&name(base), values);
        }
    }
}

/// Write everything to `path` (extension normalized) and clear the unsaved flag.
pub fn save(
    aggregator: &mut BandAggregator,
    path: &Path,
    header: &str,
    shunt_ohms: f64,
) -> SweepResult<PathBuf> {
    let path = normalize_kv1_path(path);
    build_document(aggregator, header, shunt_ohms).write_to(&path)?;
    aggregator.mark_saved();
    info!(path = %path.display(), "results saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{ChannelSet, Sample};
    use crate::bands::BandPosition;

    fn result(mode: SweepMode, channels: ChannelSet, points: &[(f64, f64)]) -> ResultSet {
        let mut result = ResultSet::new(mode, channels);
        for &(f, out) in points {
            result.push(
                f,
                &Sample {
                    frequency: f,
                    ch1: 1.0,
                    ch2: out,
                    ch3: Some(out / 2.0),
                    ch4: None,
                },
            );
        }
        result
    }

    #[test]
    fn extension_normalized() {
        assert_eq!(normalize_kv1_path(Path::new("run")), PathBuf::from("run.kv1"));
        assert_eq!(normalize_kv1_path(Path::new("run.txt")), PathBuf::from("run.kv1"));
        assert_eq!(normalize_kv1_path(Path::new("run.KV1")), PathBuf::from("run.KV1"));
    }

    #[test]
    fn accumulated_history_is_indexed() {
        let mut aggregator = BandAggregator::new(true, true);
        aggregator.record(result(SweepMode::Frequency, ChannelSet::default(), &[(100.0, 0.5)]));
        aggregator.record(result(SweepMode::Frequency, ChannelSet::new(true, false), &[(200.0, 0.25)]));

        let doc = build_document(&aggregator, "h", 100.0);
        let text = doc.as_str();
        assert!(text.contains("m<d> freqs0 [100.0];\n"));
        assert!(text.contains("m<d> out_vpp1 [0.25];\n"));
        assert!(text.contains("m<d> ch3_vpp1 [0.125];\n"));
        assert!(!text.contains("ch3_vpp0"));
        assert!(!text.contains("ch4_vpp"));
    }

    #[test]
    fn latest_only_is_unindexed() {
        let mut aggregator = BandAggregator::new(false, true);
        aggregator.record(result(SweepMode::Amplitude, ChannelSet::default(), &[(0.1, 0.05)]));
        let doc = build_document(&aggregator, "", 100.0);
        assert!(doc.as_str().contains("m<d> in_vpp [1.0];\n"));
        assert!(!doc.as_str().contains("in_vpp0"));
    }

    #[test]
    fn iv_history_writes_voltage_and_current() {
        let mut aggregator = BandAggregator::new(true, true);
        aggregator.record(result(SweepMode::IvCurve, ChannelSet::default(), &[(1.0, 0.5)]));
        let text = build_document(&aggregator, "", 100.0).into_string();
        assert!(text.contains("m<d> V_vavg0 [0.5];\n"));
        assert!(text.contains("m<d> I_vavg0 [0.005];\n"));
        assert!(text.contains("d Rshunt0 100.0;\n"));
    }

    #[test]
    fn band_slots_are_prefixed() {
        let mut aggregator = BandAggregator::new(true, true);
        aggregator.record(result(SweepMode::FrequencyMultiband, ChannelSet::default(), &[(10.0, 1.0)]));
        aggregator.record(result(SweepMode::FrequencyMultiband, ChannelSet::default(), &[(20.0, 1.0)]));
        assert!(aggregator.is_scanned(BandPosition::LowMin));

        let text = build_document(&aggregator, "", 100.0).into_string();
        assert!(text.contains("m<d> base_freqs [10.0];\n"));
        assert!(text.contains("m<d> low_min_freqs [20.0];\n"));
    }

    #[test]
    fn save_clears_unsaved_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = BandAggregator::new(true, true);
        aggregator.record(result(SweepMode::Frequency, ChannelSet::default(), &[(100.0, 0.5)]));
        assert!(aggregator.has_unsaved());

        let written = save(&mut aggregator, &dir.path().join("bench"), "hdr", 100.0).unwrap();
        assert_eq!(written.extension().unwrap(), "kv1");
        assert!(!aggregator.has_unsaved());
        let text = std::fs::read_to_string(written).unwrap();
        assert!(text.starts_with("#VERSION 1.0\n\n#HEADER\nhdr\n#HEADER\n"));
    }
}
