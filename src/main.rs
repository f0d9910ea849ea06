//! CLI entry point for sweep-daq
//!
//! Provides commands for:
//! - Printing the setpoints a plan expands to
//! - Running sweeps against a real bench (scope + generator over SCPI) or
//!   against the simulated RC bench, and saving the results as KV1
//!
//! # Usage
//!
//! ```bash
//! sweep-daq plan --scale log --start 10 --end 100000 --count 21
//! sweep-daq run --mode frequency --scale log --start 10 --end 1e5 --count 21 \
//!     --scope 192.168.1.20 --generator 192.168.1.21 --output bode
//! sweep-daq run --mode multiband --simulate --repeat 7 --scale list --list "100 1000 10000"
//! ```

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use sweep_daq::clock::{Clock, ManualClock, SystemClock};
use sweep_daq::export;
use sweep_daq::instrument::scpi::{ScpiBench, ScpiTransport};
use sweep_daq::instrument::sim::SimulatedBench;
use sweep_daq::instrument::transport::TcpTransport;
use sweep_daq::instrument::InstrumentAdapter;
use sweep_daq::plan::{generate_plan, PlanSpec};
use sweep_daq::{
    logging, Band, BandAggregator, ChannelSet, Gain, RecordOutcome, Settings, SweepMode,
    SweepOrchestrator, SweepRequest,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sweep-daq")]
#[command(about = "Oscilloscope + signal generator sweep controller", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/sweep.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the setpoints of a plan
    Plan {
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Run one or more sweeps and optionally save the results
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScaleArg {
    Linear,
    Log,
    List,
    File,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Amplitude,
    Frequency,
    Multiband,
    Iv,
}

impl From<ModeArg> for SweepMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Amplitude => SweepMode::Amplitude,
            ModeArg::Frequency => SweepMode::Frequency,
            ModeArg::Multiband => SweepMode::FrequencyMultiband,
            ModeArg::Iv => SweepMode::IvCurve,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BandArg {
    Low,
    Mid,
    High,
}

#[derive(Clone, Copy, ValueEnum)]
enum GainArg {
    Min,
    Max,
    Flat,
}

#[derive(Args)]
struct PlanArgs {
    /// How setpoints are spaced
    #[arg(long, value_enum, default_value = "linear")]
    scale: ScaleArg,

    #[arg(long)]
    start: Option<f64>,

    #[arg(long)]
    end: Option<f64>,

    /// Number of points for linear and log plans
    #[arg(long, default_value = "10")]
    count: usize,

    /// Literal list for `--scale list`
    #[arg(long)]
    list: Option<String>,

    /// Plan file for `--scale file`
    #[arg(long)]
    file: Option<PathBuf>,
}

impl PlanArgs {
    fn to_spec(&self) -> Result<PlanSpec> {
        let bounds = || -> Result<(f64, f64)> {
            let start = self.start.context("--start is required for this scale")?;
            let end = self.end.context("--end is required for this scale")?;
            Ok((start, end))
        };
        Ok(match self.scale {
            ScaleArg::Linear => {
                let (start, end) = bounds()?;
                PlanSpec::Linear {
                    start,
                    end,
                    count: self.count,
                }
            }
            ScaleArg::Log => {
                let (start, end) = bounds()?;
                PlanSpec::Logarithmic {
                    start,
                    end,
                    count: self.count,
                }
            }
            ScaleArg::List => PlanSpec::FromList(
                self.list.clone().context("--list is required for --scale list")?,
            ),
            ScaleArg::File => {
                PlanSpec::FromFile(self.file.clone().context("--file is required for --scale file")?)
            }
        })
    }
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, value_enum, default_value = "frequency")]
    mode: ModeArg,

    #[command(flatten)]
    plan: PlanArgs,

    /// Generator Vpp for frequency sweeps
    #[arg(long, default_value = "1.0")]
    amplitude: f64,

    /// Generator frequency (Hz) for amplitude sweeps
    #[arg(long, default_value = "1000")]
    frequency: f64,

    /// Also read channel 3
    #[arg(long)]
    ch3: bool,

    /// Also read channel 4
    #[arg(long)]
    ch4: bool,

    /// Use the simulated RC bench instead of real instruments
    #[arg(long)]
    simulate: bool,

    /// Corner frequency of the simulated filter (Hz)
    #[arg(long, default_value = "1000")]
    cutoff: f64,

    /// Scope address: host[:port], or serial:PATH[@BAUD]
    #[arg(long)]
    scope: Option<String>,

    /// Generator address: host[:port], or serial:PATH[@BAUD]
    #[arg(long)]
    generator: Option<String>,

    /// Number of consecutive sweeps
    #[arg(long, default_value = "1")]
    repeat: usize,

    /// Starting band for multiband sweeps
    #[arg(long, value_enum, requires = "gain")]
    band: Option<BandArg>,

    /// Starting gain for multiband sweeps
    #[arg(long, value_enum, requires = "band")]
    gain: Option<GainArg>,

    /// Print each sweep as a table
    #[arg(long)]
    table: bool,

    /// Save all results to this KV1 file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Free-text header for the saved file
    #[arg(long)]
    header: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Plan { plan } => print_plan(&plan),
        Commands::Run(args) => run(&settings, args),
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn print_plan(args: &PlanArgs) -> Result<()> {
    let plan = generate_plan(&args.to_spec()?)?;
    for (i, value) in plan.iter().enumerate() {
        println!("{i:>4}  {value}");
    }
    Ok(())
}

fn open_transport(address: &str, timeout: Duration) -> Result<Box<dyn ScpiTransport>> {
    if let Some(serial) = address.strip_prefix("serial:") {
        return open_serial(serial, timeout);
    }
    let transport = TcpTransport::connect(address, timeout)
        .with_context(|| format!("connecting to {address}"))?;
    Ok(Box::new(transport))
}

#[cfg(feature = "instrument_serial")]
fn open_serial(spec: &str, timeout: Duration) -> Result<Box<dyn ScpiTransport>> {
    use sweep_daq::instrument::transport::SerialTransport;

    let (path, baud) = match spec.split_once('@') {
        Some((path, baud)) => (path, baud.parse().context("invalid baud rate")?),
        None => (spec, 9600),
    };
    let transport =
        SerialTransport::open(path, baud, timeout).with_context(|| format!("opening {path}"))?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_spec: &str, _timeout: Duration) -> Result<Box<dyn ScpiTransport>> {
    bail!("serial support is disabled; rebuild with the instrument_serial feature")
}

fn open_bench(settings: &Settings, args: &RunArgs) -> Result<Box<dyn InstrumentAdapter>> {
    if args.simulate {
        info!(cutoff_hz = args.cutoff, "using simulated bench");
        let bench = SimulatedBench::new(args.cutoff)
            .with_resistances(1000.0, settings.session.shunt_resistance)
            .with_vertical_divisions(settings.scope.vertical_divisions);
        return Ok(Box::new(bench));
    }

    let instruments = &settings.instruments;
    let scope = args
        .scope
        .clone()
        .or_else(|| instruments.scope_address.clone())
        .context("no scope address (use --scope, [instruments] scope_address or --simulate)")?;
    let generator = args
        .generator
        .clone()
        .or_else(|| instruments.generator_address.clone())
        .context("no generator address (use --generator or [instruments] generator_address)")?;

    let scope = open_transport(&scope, instruments.io_timeout)?;
    let generator = open_transport(&generator, instruments.io_timeout)?;
    Ok(Box::new(ScpiBench::new(
        scope,
        generator,
        instruments.generator_channel.clone(),
    )))
}

fn run(settings: &Settings, args: RunArgs) -> Result<()> {
    if args.repeat == 0 {
        bail!("--repeat must be at least 1");
    }
    let plan = generate_plan(&args.plan.to_spec()?)?;
    let request = SweepRequest::new(args.mode.into(), plan)
        .with_default_amplitude(args.amplitude)
        .with_default_frequency(args.frequency)
        .with_channels(ChannelSet::new(args.ch3, args.ch4));

    let mut adapter = open_bench(settings, &args)?;
    // the simulator has no real settling, so it runs on virtual time
    let clock: Box<dyn Clock> = if args.simulate {
        Box::new(ManualClock::new())
    } else {
        Box::new(SystemClock::new())
    };

    let mut aggregator = BandAggregator::from_settings(&settings.session);
    if let (Some(band), Some(gain)) = (args.band, args.gain) {
        aggregator.select(band.into(), gain.into());
    }

    let mut orchestrator = SweepOrchestrator::new(&mut *adapter, &*clock, settings);
    let mut failure = None;
    for iteration in 0..args.repeat {
        let outcome = match orchestrator.run(&request) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(iteration, error = %err, "sweep aborted");
                failure = Some(err);
                break;
            }
        };
        if args.table {
            print!("{}", outcome.result.summary_table());
        }
        println!(
            "sweep {} complete: {} points in {:.1?}",
            iteration + 1,
            outcome.result.len(),
            outcome.elapsed
        );

        match aggregator.record(outcome.result) {
            RecordOutcome::Slotted {
                slot, terminal: true, ..
            } => {
                println!("  stored in {slot}; all band positions scanned");
                break;
            }
            RecordOutcome::Slotted {
                slot, advanced_to, ..
            } => match advanced_to {
                Some(next) => println!("  stored in {slot}; next position {next}"),
                None => println!("  stored in {slot}"),
            },
            RecordOutcome::Appended { index } => println!("  saved as sweep {index}"),
            RecordOutcome::Replaced => println!("  replaced previous sweep"),
        }
    }

    if let Some(path) = &args.output {
        if aggregator.is_empty() {
            warn!("no completed sweeps, nothing saved");
        } else {
            let header = args.header.clone().unwrap_or_else(|| {
                format!(
                    "sweep-daq {} sweep\nsaved {}",
                    request.mode,
                    Local::now().format("%Y-%m-%d %H:%M:%S")
                )
            });
            let written = export::save(
                &mut aggregator,
                path,
                &header,
                settings.session.shunt_resistance,
            )?;
            println!("saved {}", written.display());
        }
    }

    match failure {
        Some(err) => Err(err).context("sweep failed; earlier results were kept"),
        None => Ok(()),
    }
}

impl From<BandArg> for Band {
    fn from(band: BandArg) -> Self {
        match band {
            BandArg::Low => Band::Low,
            BandArg::Mid => Band::Mid,
            BandArg::High => Band::High,
        }
    }
}

impl From<GainArg> for Gain {
    fn from(gain: GainArg) -> Self {
        match gain {
            GainArg::Min => Gain::Min,
            GainArg::Max => Gain::Max,
            GainArg::Flat => Gain::Flat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sweep-daq").chain(args.iter().copied()))
    }

    #[test]
    fn band_and_gain_must_be_given_together() {
        let base = ["run", "--simulate", "--mode", "multiband", "--scale", "list", "--list", "100"];

        let band_only = [&base[..], &["--band", "low"][..]].concat();
        assert!(parse(&band_only).is_err());
        let gain_only = [&base[..], &["--gain", "max"][..]].concat();
        assert!(parse(&gain_only).is_err());

        let both = [&base[..], &["--band", "low", "--gain", "max"][..]].concat();
        let Commands::Run(args) = parse(&both).unwrap().command else {
            panic!("expected run");
        };
        assert!(matches!(args.band, Some(BandArg::Low)));
        assert!(matches!(args.gain, Some(GainArg::Max)));
    }

    #[test]
    fn usage_list_example_parses() {
        let cli = parse(&["plan", "--scale", "list", "--list", "100 1000 10000"]).unwrap();
        let Commands::Plan { plan } = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(
            generate_plan(&plan.to_spec().unwrap()).unwrap(),
            vec![100.0, 1000.0, 10000.0]
        );
    }
}
