//! # Sweep DAQ Core Library
//!
//! This crate drives an oscilloscope and a signal generator through a sweep of
//! setpoints (frequency, amplitude or DC offset) and records a channel reading
//! at each one once the bench has settled. The binary in `main.rs` is a thin
//! command-line front end over the same library.
//!
//! ## Crate Structure
//!
//! - **`range`**: Scale rounding and the percent-difference metric used for equilibrium checks.
//! - **`plan`**: Turns linear, logarithmic, list or file plan specifications into setpoints.
//! - **`instrument`**: The `InstrumentAdapter` contract, the SCPI bench implementation with
//!   its TCP and serial transports, a scripted mock and an RC-filter simulator.
//! - **`clock`**: Wall-clock and virtual time sources for settle delays and retry windows.
//! - **`acquisition`**: Per-setpoint configure/settle/collect/verify state machine.
//! - **`sweep`**: Sweep requests and the coarse-then-fine dual-pass orchestrator.
//! - **`result`**: Result sets plus gain, I-V and table views.
//! - **`bands`**: Band/gain positions, auto-next and the result aggregator.
//! - **`kv1`** / **`export`**: The KV1 text writer and the saved-file layouts.
//! - **`config`**: Layered `figment` settings. See `config::Settings`.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: `SweepError` and `InstrumentError`.

pub mod acquisition;
pub mod bands;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod instrument;
pub mod kv1;
pub mod logging;
pub mod plan;
pub mod range;
pub mod result;
pub mod sweep;

pub use acquisition::{AcquisitionController, ChannelSet, Sample, Setpoint, Stimulus};
pub use bands::{Band, BandAggregator, BandPosition, Gain, RecordOutcome};
pub use config::Settings;
pub use error::{InstrumentError, SweepError, SweepResult};
pub use result::ResultSet;
pub use sweep::{SweepMode, SweepOrchestrator, SweepOutcome, SweepRequest};
