use clap::{Parser, Subcommand};
use sepconv::arch::reference;
use sepconv::simulator::config::{load_and_merge_configs, CliOverrides};
use sepconv::simulator::data::patterns;
use sepconv::simulator::data::{write_mem, MemFormat};
use sepconv::simulator::utils::log::init_log;
use sepconv::simulator::utils::report::AccuracyReport;
use sepconv::simulator::simulator::MemImages;
use sepconv::simulator::Simulator;
use std::path::PathBuf;

/// sepconv - cycle-level simulator of a Q8.8 depthwise-separable convolution block
#[derive(Parser, Debug)]
#[command(name = "sepconv")]
#[command(version = "0.1.0")]
#[command(about = "Depthwise 3x3 -> pointwise 1x1 -> hard-swish, simulated tick by tick", long_about = None)]
struct Args {
  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Run the chain on the configured memory images and check it against the golden model
  Run {
    /// TOML config merged over the built-in defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Quiet mode (warnings only, no records)
    #[arg(short, long)]
    quiet: bool,

    /// Enable step mode (interactive stepping)
    #[arg(short, long)]
    step: bool,

    /// Output trace file path
    #[arg(long, value_name = "FILE")]
    trace_file: Option<String>,

    /// Tick budget before the run is declared stalled
    #[arg(long, value_name = "N")]
    max_ticks: Option<u64>,
  },

  /// Write test input and weight memory images
  Gen {
    #[arg(long, value_name = "DIR", default_value = "data")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 8)]
    width: usize,

    #[arg(long, default_value_t = 8)]
    height: usize,

    #[arg(long, default_value_t = 4)]
    channels: usize,

    #[arg(long, default_value_t = 4)]
    out_channels: usize,

    /// Seed for the noise channels
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write the single-bit-string variant instead of hex
    #[arg(long)]
    binary: bool,
  },
}

fn run(
  config: Option<PathBuf>,
  quiet: bool,
  step: bool,
  trace_file: Option<String>,
  max_ticks: Option<u64>,
) -> sepconv::Result<bool> {
  let cli = CliOverrides {
    quiet,
    step,
    trace_file,
    max_ticks,
  };
  let work_dir = std::env::current_dir()?;
  let app = load_and_merge_configs(config.as_deref(), &work_dir, &cli)?;
  init_log(app.simulation.quiet);

  let images = MemImages::load(&app)?;
  let mut simulator = Simulator::from_app_config(&app, &images)?;
  simulator.run()?;

  let network = *simulator.network();
  let expected = reference::chain(
    &network.depthwise,
    &network.pointwise,
    &images.image,
    &images.depthwise,
    &images.pointwise,
  )?;

  let actual = simulator.output_values();
  if !app.simulation.quiet {
    for (i, chunk) in actual.chunks(network.pointwise.out_channels()).enumerate() {
      println!("pixel {:>4}: {:?}", i, chunk);
    }
  }
  let report = AccuracyReport::compare(&actual, &expected, network.pointwise.out_channels());
  println!("{}", report);
  Ok(report.passed())
}

fn generate(
  out_dir: PathBuf,
  width: usize,
  height: usize,
  channels: usize,
  out_channels: usize,
  seed: u64,
  binary: bool,
) -> sepconv::Result<()> {
  init_log(false);
  let format = if binary { MemFormat::Binary } else { MemFormat::Hex };
  log::info!("Generating {}x{}x{} input, {} output channels", width, height, channels, out_channels);

  let image = patterns::generate_input(width, height, channels, seed);
  let dw = patterns::generate_depthwise_weights(channels);
  let pw = patterns::generate_pointwise_weights(channels, out_channels);
  write_mem(&out_dir.join("input.mem"), &image, format, "Input Feature Map Data")?;
  write_mem(&out_dir.join("dw_weights.mem"), &dw, format, "Depthwise Convolution Weights")?;
  write_mem(&out_dir.join("pw_weights.mem"), &pw, format, "Pointwise Convolution Weights")?;

  let simple = patterns::simple_input(width, height, channels);
  let identity = patterns::identity_weights(channels);
  write_mem(&out_dir.join("simple_input.mem"), &simple, format, "Simple Test Input Data")?;
  write_mem(&out_dir.join("simple_weights.mem"), &identity, format, "Simple Test Weights")?;
  Ok(())
}

fn main() {
  let args = Args::parse();

  let result = match args.command {
    Cmd::Run {
      config,
      quiet,
      step,
      trace_file,
      max_ticks,
    } => run(config, quiet, step, trace_file, max_ticks).map(|passed| {
      if !passed {
        std::process::exit(2);
      }
    }),
    Cmd::Gen {
      out_dir,
      width,
      height,
      channels,
      out_channels,
      seed,
      binary,
    } => generate(out_dir, width, height, channels, out_channels, seed, binary),
  };

  if let Err(e) = result {
    eprintln!("Error: {}", e);
    std::process::exit(1);
  }
}
