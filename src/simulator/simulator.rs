use sim::models::Reportable;
use sim::simulator::Simulation;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use super::config::AppConfig;
use super::data::read_mem;
use super::sim::mode::{SimConfig, StepMode};
use super::sim::model::clock_step;
use super::sim::shell::{Command, Shell};
use super::utils::report::print_simulation_records;
use crate::arch::activation;
use crate::arch::fixed::Sample;
use crate::arch::stream::{Beat, WeightMemory};
use crate::arch::top::{create_simulation, Network, ACTIVATION, OUTPUT_PORT, POINTWISE};
use crate::error::{Error, Result};

/// Ticks for a sample leaving the pointwise unit to reach the collected outputs
const DRAIN_TICKS: u64 = activation::LATENCY as u64 + 2;

/// Memory images a run is built from
#[derive(Debug, Clone)]
pub struct MemImages {
  pub image: Vec<Sample>,
  pub depthwise: Vec<Sample>,
  pub pointwise: Vec<Sample>,
}

impl MemImages {
  pub fn load(app: &AppConfig) -> Result<Self> {
    let format = app.data.format;
    let images = Self {
      image: read_mem(Path::new(&app.data.input), format)?,
      depthwise: read_mem(Path::new(&app.data.depthwise_weights), format)?,
      pointwise: read_mem(Path::new(&app.data.pointwise_weights), format)?,
    };
    log::info!(
      "Loaded {} input samples, {} depthwise and {} pointwise weights",
      images.image.len(),
      images.depthwise.len(),
      images.pointwise.len()
    );
    Ok(images)
  }
}

pub struct Simulator {
  config: SimConfig,
  network: Network,
  simulation: Simulation,
  trace_writer: Option<BufWriter<File>>,
  outputs: Vec<Beat>,
  ticks: u64,
  pointwise_done_at: Option<u64>,
}

impl Simulator {
  pub fn new(
    config: SimConfig,
    network: Network,
    image: &[Sample],
    dw_weights: WeightMemory,
    pw_weights: WeightMemory,
  ) -> Result<Self> {
    let simulation = create_simulation(&network, image, dw_weights, pw_weights)?;
    let trace_writer = match &config.trace_file {
      Some(path) => {
        log::info!("Writing message trace to {}", path);
        Some(BufWriter::new(File::create(path)?))
      },
      None => None,
    };
    Ok(Self {
      config,
      network,
      simulation,
      trace_writer,
      outputs: Vec::new(),
      ticks: 0,
      pointwise_done_at: None,
    })
  }

  /// Build the chain the config describes from already-loaded images.
  pub fn from_app_config(app: &AppConfig, images: &MemImages) -> Result<Self> {
    Self::new(
      app.sim_config(),
      app.network()?,
      &images.image,
      images.depthwise.clone().into(),
      images.pointwise.clone().into(),
    )
  }

  pub fn network(&self) -> &Network {
    &self.network
  }

  pub fn ticks(&self) -> u64 {
    self.ticks
  }

  /// Activation outputs collected so far, in arrival order
  pub fn outputs(&self) -> &[Beat] {
    &self.outputs
  }

  pub fn output_values(&self) -> Vec<Sample> {
    self.outputs.iter().map(|b| b.value).collect()
  }

  /// Every expected output arrived, or the pointwise stream ended and the tail has drained.
  pub fn finished(&self) -> bool {
    if self.outputs.len() >= self.network.output_len() {
      return true;
    }
    matches!(self.pointwise_done_at, Some(t) if self.ticks >= t + DRAIN_TICKS)
  }

  pub fn run(&mut self) -> Result<()> {
    match self.config.step_mode {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    }?;
    if !self.config.quiet {
      print_simulation_records(&mut self.simulation);
    }
    Ok(())
  }

  fn run_continuous(&mut self) -> Result<()> {
    log::info!(
      "Continuous mode: {} inputs, expecting {} outputs",
      self.network.input_len(),
      self.network.output_len()
    );
    while !self.finished() {
      self.step()?;
    }
    self.report_completion();
    Ok(())
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode - Enter: one tick, 'si N': N ticks, 's': status, 'c': continue, 'q': quit");
    let mut shell = Shell::new()?;
    while !self.finished() {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if self.finished() {
              break;
            }
            self.step()?;
          }
          println!("t={} outputs={}/{}", self.ticks, self.outputs.len(), self.network.output_len());
        },
        Command::Status => self.print_status(),
        Command::Continue => return self.run_continuous(),
        Command::Quit => return Ok(()),
      }
    }
    self.report_completion();
    Ok(())
  }

  fn print_status(&mut self) {
    for model in self.simulation.models().iter() {
      println!("  [{}] {}", model.id(), model.status());
    }
  }

  fn report_completion(&self) {
    if self.outputs.len() < self.network.output_len() {
      log::warn!(
        "Pointwise stream ended early: {}/{} outputs after {} ticks",
        self.outputs.len(),
        self.network.output_len(),
        self.ticks
      );
    } else {
      log::info!("Completed {} outputs in {} ticks", self.outputs.len(), self.ticks);
    }
  }

  /// One clock tick. Returns how many activation outputs arrived on it.
  pub fn step(&mut self) -> Result<usize> {
    if self.ticks >= self.config.max_ticks {
      return Err(Error::Stalled {
        ticks: self.ticks,
        produced: self.outputs.len(),
        expected: self.network.output_len(),
      });
    }

    let messages = clock_step(&mut self.simulation, &mut self.trace_writer)?;
    self.ticks += 1;

    let mut arrived = 0;
    for msg in messages.iter() {
      if msg.source_id() == ACTIVATION && msg.source_port() == OUTPUT_PORT {
        let beat: Beat = serde_json::from_str(msg.content())?;
        self.outputs.push(beat);
        arrived += 1;
      }
    }

    if self.pointwise_done_at.is_none() && self.pointwise_reported_done() {
      log::debug!("pointwise stream finished at tick {}", self.ticks);
      self.pointwise_done_at = Some(self.ticks);
    }
    Ok(arrived)
  }

  fn pointwise_reported_done(&mut self) -> bool {
    self
      .simulation
      .models()
      .iter()
      .any(|m| m.id() == POINTWISE && m.records().iter().any(|r| r.action == "done"))
  }
}
