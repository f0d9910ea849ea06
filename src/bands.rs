//! Band/gain state machine and result aggregation.
//!
//! Multiband sweeps are recorded into one slot per band/gain position.
//! After each one the position can advance automatically:
//!
//! ```text
//! Baseline -> LowMin -> LowMax -> MidMin -> MidMax -> HighMin -> HighMax (terminal)
//! ```
//!
//! Other sweep modes go to a history list, either accumulated until cleared
//! or replaced by each new sweep.

use crate::config::SessionSettings;
use crate::result::ResultSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Frequency band selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    /// Low frequency band.
    Low,
    /// Mid frequency band.
    Mid,
    /// High frequency band.
    High,
}

/// Generator gain selector. `Flat` always maps to the baseline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    /// Minimum gain.
    Min,
    /// Maximum gain.
    Max,
    /// Flat response reference.
    Flat,
}

/// One of the seven result slots of a multiband scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPosition {
    /// Flat reference scan.
    Baseline,
    /// Low band, minimum gain.
    LowMin,
    /// Low band, maximum gain.
    LowMax,
    /// Mid band, minimum gain.
    MidMin,
    /// Mid band, maximum gain.
    MidMax,
    /// High band, minimum gain.
    HighMin,
    /// High band, maximum gain. Terminal.
    HighMax,
}

impl BandPosition {
    /// Every position in auto-advance order.
    pub const ALL: [BandPosition; 7] = [
        BandPosition::Baseline,
        BandPosition::LowMin,
        BandPosition::LowMax,
        BandPosition::MidMin,
        BandPosition::MidMax,
        BandPosition::HighMin,
        BandPosition::HighMax,
    ];

    /// Position for a band/gain selection.
    pub fn from_selection(band: Band, gain: Gain) -> Self {
        match (band, gain) {
            (_, Gain::Flat) => BandPosition::Baseline,
            (Band::Low, Gain::Min) => BandPosition::LowMin,
            (Band::Low, Gain::Max) => BandPosition::LowMax,
            (Band::Mid, Gain::Min) => BandPosition::MidMin,
            (Band::Mid, Gain::Max) => BandPosition::MidMax,
            (Band::High, Gain::Min) => BandPosition::HighMin,
            (Band::High, Gain::Max) => BandPosition::HighMax,
        }
    }

    /// Band and gain, or `None` for the baseline.
    pub fn selection(self) -> Option<(Band, Gain)> {
        match self {
            BandPosition::Baseline => None,
            BandPosition::LowMin => Some((Band::Low, Gain::Min)),
            BandPosition::LowMax => Some((Band::Low, Gain::Max)),
            BandPosition::MidMin => Some((Band::Mid, Gain::Min)),
            BandPosition::MidMax => Some((Band::Mid, Gain::Max)),
            BandPosition::HighMin => Some((Band::High, Gain::Min)),
            BandPosition::HighMax => Some((Band::High, Gain::Max)),
        }
    }

    /// Next position in the auto-advance order. The terminal position maps to itself.
    pub fn auto_next(self) -> Self {
        match self {
            BandPosition::Baseline => BandPosition::LowMin,
            BandPosition::LowMin => BandPosition::LowMax,
            BandPosition::LowMax => BandPosition::MidMin,
            BandPosition::MidMin => BandPosition::MidMax,
            BandPosition::MidMax => BandPosition::HighMin,
            BandPosition::HighMin => BandPosition::HighMax,
            BandPosition::HighMax => BandPosition::HighMax,
        }
    }

    /// Last position of the auto-advance order.
    pub fn is_terminal(self) -> bool {
        self == BandPosition::HighMax
    }

    /// Prefix used for this slot's entries in saved files.
    pub fn slot_name(self) -> &'static str {
        match self {
            BandPosition::Baseline => "base",
            BandPosition::LowMin => "low_min",
            BandPosition::LowMax => "low_max",
            BandPosition::MidMin => "mid_min",
            BandPosition::MidMax => "mid_max",
            BandPosition::HighMin => "high_min",
            BandPosition::HighMax => "high_max",
        }
    }
}

impl fmt::Display for BandPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot_name())
    }
}

/// Where a recorded sweep ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored in a band slot.
    Slotted {
        /// Slot that received the sweep.
        slot: BandPosition,
        /// Position for the next sweep, if auto-advance moved it.
        advanced_to: Option<BandPosition>,
        /// Auto-advance is on and the terminal position has been filled.
        terminal: bool,
    },
    /// Appended to the history at this index.
    Appended {
        /// Zero-based history index.
        index: usize,
    },
    /// Replaced the single retained sweep.
    Replaced,
}

/// Routes completed sweeps into band slots or the history list.
#[derive(Debug, Clone)]
pub struct BandAggregator {
    position: BandPosition,
    slots: BTreeMap<BandPosition, ResultSet>,
    history: Vec<ResultSet>,
    accumulate: bool,
    auto_advance: bool,
    unsaved: bool,
}

impl BandAggregator {
    /// Empty aggregator at the baseline position.
    pub fn new(accumulate: bool, auto_advance: bool) -> Self {
        Self {
            position: BandPosition::Baseline,
            slots: BTreeMap::new(),
            history: Vec::new(),
            accumulate,
            auto_advance,
            unsaved: false,
        }
    }

    /// Policies from the `[session]` settings.
    pub fn from_settings(session: &SessionSettings) -> Self {
        Self::new(session.accumulate_until_clear, session.auto_next)
    }

    /// Slot the next multiband sweep goes to.
    pub fn position(&self) -> BandPosition {
        self.position
    }

    /// Jump to `position`.
    pub fn set_position(&mut self, position: BandPosition) {
        self.position = position;
    }

    /// Jump to the position for a band/gain selection.
    pub fn select(&mut self, band: Band, gain: Gain) {
        self.position = BandPosition::from_selection(band, gain);
    }

    /// Return to the first position after the terminal one was reached.
    pub fn reset_auto_next(&mut self) {
        self.position = BandPosition::Baseline;
    }

    /// Whether single-band sweeps are kept until cleared.
    pub fn accumulates(&self) -> bool {
        self.accumulate
    }

    /// Toggle accumulate-until-clear.
    pub fn set_accumulate(&mut self, accumulate: bool) {
        self.accumulate = accumulate;
    }

    /// Toggle auto-next.
    pub fn set_auto_advance(&mut self, enabled: bool) {
        self.auto_advance = enabled;
    }

    /// Store a completed sweep.
    pub fn record(&mut self, result: ResultSet) -> RecordOutcome {
        self.unsaved = true;

        if result.mode().is_multiband() {
            let slot = self.position;
            self.slots.insert(slot, result);
            info!(%slot, "band slot scanned");

            if !self.auto_advance {
                return RecordOutcome::Slotted {
                    slot,
                    advanced_to: None,
                    terminal: false,
                };
            }
            if slot.is_terminal() {
                warn!("last band position scanned; reset auto-next to continue");
                return RecordOutcome::Slotted {
                    slot,
                    advanced_to: None,
                    terminal: true,
                };
            }
            self.position = slot.auto_next();
            return RecordOutcome::Slotted {
                slot,
                advanced_to: Some(self.position),
                terminal: false,
            };
        }

        if self.accumulate {
            self.history.push(result);
            RecordOutcome::Appended {
                index: self.history.len() - 1,
            }
        } else {
            self.history.clear();
            self.history.push(result);
            RecordOutcome::Replaced
        }
    }

    /// Result stored at `position`.
    pub fn slot(&self, position: BandPosition) -> Option<&ResultSet> {
        self.slots.get(&position)
    }

    /// Whether `position` holds a result.
    pub fn is_scanned(&self, position: BandPosition) -> bool {
        self.slots.contains_key(&position)
    }

    /// Filled slots in auto-advance order.
    pub fn scanned(&self) -> impl Iterator<Item = (BandPosition, &ResultSet)> {
        self.slots.iter().map(|(position, result)| (*position, result))
    }

    /// Single-band sweeps, oldest first.
    pub fn history(&self) -> &[ResultSet] {
        &self.history
    }

    /// Most recent single-band sweep.
    pub fn latest(&self) -> Option<&ResultSet> {
        self.history.last()
    }

    /// No slot or history entry is filled.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.history.is_empty()
    }

    /// Something was recorded since the last save.
    pub fn has_unsaved(&self) -> bool {
        self.unsaved
    }

    /// Clear the unsaved flag after a save.
    pub fn mark_saved(&mut self) {
        self.unsaved = false;
    }

    /// Discard every slot and the history, and return to the baseline position.
    ///
    /// `confirm` is asked first and told whether unsaved data would be lost;
    /// nothing changes if it returns `false`.
    pub fn clear_all(&mut self, confirm: impl FnOnce(bool) -> bool) -> bool {
        if !confirm(self.unsaved) {
            return false;
        }
        self.slots.clear();
        self.history.clear();
        self.position = BandPosition::Baseline;
        self.unsaved = false;
        info!("all results cleared");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::ChannelSet;
    use crate::sweep::SweepMode;

    fn result(mode: SweepMode) -> ResultSet {
        ResultSet::new(mode, ChannelSet::default())
    }

    #[test]
    fn auto_next_visits_each_position_once() {
        let mut position = BandPosition::Baseline;
        let mut visited = Vec::new();
        for _ in 0..6 {
            position = position.auto_next();
            visited.push(position);
        }
        assert_eq!(visited, BandPosition::ALL[1..].to_vec());
        assert!(position.is_terminal());
        assert_eq!(position.auto_next(), BandPosition::HighMax);
    }

    #[test]
    fn flat_gain_is_baseline() {
        assert_eq!(
            BandPosition::from_selection(Band::High, Gain::Flat),
            BandPosition::Baseline
        );
        assert_eq!(
            BandPosition::from_selection(Band::Mid, Gain::Max),
            BandPosition::MidMax
        );
        assert_eq!(BandPosition::MidMax.selection(), Some((Band::Mid, Gain::Max)));
        assert_eq!(BandPosition::Baseline.selection(), None);
    }

    #[test]
    fn multiband_sweeps_fill_slots_and_advance() {
        let mut aggregator = BandAggregator::new(true, true);
        aggregator.select(Band::High, Gain::Min);

        let first = aggregator.record(result(SweepMode::FrequencyMultiband));
        assert_eq!(
            first,
            RecordOutcome::Slotted {
                slot: BandPosition::HighMin,
                advanced_to: Some(BandPosition::HighMax),
                terminal: false,
            }
        );
        let second = aggregator.record(result(SweepMode::FrequencyMultiband));
        assert_eq!(
            second,
            RecordOutcome::Slotted {
                slot: BandPosition::HighMax,
                advanced_to: None,
                terminal: true,
            }
        );
        assert_eq!(aggregator.position(), BandPosition::HighMax);
        assert!(aggregator.is_scanned(BandPosition::HighMin));
        assert!(!aggregator.is_scanned(BandPosition::Baseline));
        assert!(aggregator.history().is_empty());
    }

    #[test]
    fn history_accumulates_or_replaces() {
        let mut accumulating = BandAggregator::new(true, true);
        accumulating.record(result(SweepMode::Frequency));
        let outcome = accumulating.record(result(SweepMode::IvCurve));
        assert_eq!(outcome, RecordOutcome::Appended { index: 1 });
        assert_eq!(accumulating.history().len(), 2);

        let mut latest_only = BandAggregator::new(false, true);
        latest_only.record(result(SweepMode::Frequency));
        assert_eq!(
            latest_only.record(result(SweepMode::Amplitude)),
            RecordOutcome::Replaced
        );
        assert_eq!(latest_only.history().len(), 1);
        assert_eq!(latest_only.latest().map(ResultSet::mode), Some(SweepMode::Amplitude));
    }

    #[test]
    fn clear_all_requires_confirmation() {
        let mut aggregator = BandAggregator::new(true, true);
        aggregator.record(result(SweepMode::FrequencyMultiband));
        assert_eq!(aggregator.position(), BandPosition::LowMin);

        let mut warned = None;
        assert!(!aggregator.clear_all(|unsaved| {
            warned = Some(unsaved);
            false
        }));
        assert_eq!(warned, Some(true));
        assert!(!aggregator.is_empty());

        assert!(aggregator.clear_all(|_| true));
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.position(), BandPosition::Baseline);
        assert!(!aggregator.has_unsaved());
    }

    #[test]
    fn manual_positioning_without_auto_advance() {
        let mut aggregator = BandAggregator::new(true, false);
        aggregator.set_position(BandPosition::MidMin);
        aggregator.record(result(SweepMode::FrequencyMultiband));
        assert_eq!(aggregator.position(), BandPosition::MidMin);
        assert!(aggregator.has_unsaved());
        aggregator.mark_saved();
        assert!(!aggregator.has_unsaved());
    }
}
