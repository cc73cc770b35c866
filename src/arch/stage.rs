use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::collections::VecDeque;

use super::activation::Activation;
use super::depthwise::DepthwiseConv;
use super::frame_buffer::FrameBuffer;
use super::pointwise::PointwiseConv;
use super::stream::{Beat, WeightMemory};
use crate::model_record;

/// Clock period of every stage model
pub const CLOCK: f64 = 1.0;

/// A clocked unit that can sit behind a [`StageModel`].
///
/// `clock` is one rising edge with the unit enabled; `accepting` is the ready signal sampled
/// before the edge.
pub trait StreamUnit: std::fmt::Debug + Clone + 'static {
  const KIND: &'static str;

  fn accepting(&self) -> bool {
    true
  }

  fn clock(&mut self, input: Beat, weights: &WeightMemory) -> Beat;

  fn done(&self) -> bool {
    false
  }

  fn reset(&mut self);

  fn status(&self) -> String;
}

impl StreamUnit for DepthwiseConv {
  const KIND: &'static str = "DepthwiseConv";

  fn accepting(&self) -> bool {
    DepthwiseConv::accepting(self)
  }

  fn clock(&mut self, input: Beat, weights: &WeightMemory) -> Beat {
    self.tick(true, input, weights)
  }

  fn done(&self) -> bool {
    DepthwiseConv::done(self)
  }

  fn reset(&mut self) {
    DepthwiseConv::reset(self)
  }

  fn status(&self) -> String {
    format!("state={:?}, fill_channel={}", self.state(), self.fill_channel())
  }
}

impl StreamUnit for PointwiseConv {
  const KIND: &'static str = "PointwiseConv";

  fn accepting(&self) -> bool {
    PointwiseConv::accepting(self)
  }

  fn clock(&mut self, input: Beat, weights: &WeightMemory) -> Beat {
    self.tick(true, input, weights)
  }

  fn done(&self) -> bool {
    PointwiseConv::done(self)
  }

  fn reset(&mut self) {
    PointwiseConv::reset(self)
  }

  fn status(&self) -> String {
    format!("state={:?}", self.state())
  }
}

impl StreamUnit for Activation {
  const KIND: &'static str = "Activation";

  fn clock(&mut self, input: Beat, _weights: &WeightMemory) -> Beat {
    self.tick(input)
  }

  fn reset(&mut self) {
    Activation::reset(self)
  }

  fn status(&self) -> String {
    format!("busy={}", self.busy())
  }
}

impl StreamUnit for FrameBuffer {
  const KIND: &'static str = "FrameBuffer";

  fn clock(&mut self, input: Beat, _weights: &WeightMemory) -> Beat {
    self.tick(input)
  }

  fn done(&self) -> bool {
    self.drained()
  }

  fn reset(&mut self) {
    FrameBuffer::reset(self)
  }

  fn status(&self) -> String {
    format!("full={}, drained={}", self.full(), self.drained())
  }
}

/// DEVS wrapper that clocks one unit per simulated cycle.
///
/// Beats arriving on the input port queue in an inbox; each internal event pops one beat when the
/// unit is ready and forwards any valid output on the output port.
#[derive(Debug, Clone)]
pub struct StageModel<U: StreamUnit> {
  input_port: String,
  output_port: String,

  until_next_event: f64,
  records: Vec<ModelRecord>,

  unit: U,
  weights: WeightMemory,
  inbox: VecDeque<Beat>,
  ticks: u64,
  emitted: usize,
  done_reported: bool,
}

impl<U: StreamUnit> StageModel<U> {
  pub fn new(unit: U, weights: WeightMemory, input_port: String, output_port: String) -> Self {
    Self {
      input_port,
      output_port,
      until_next_event: CLOCK,
      records: Vec::new(),
      unit,
      weights,
      inbox: VecDeque::new(),
      ticks: 0,
      emitted: 0,
      done_reported: false,
    }
  }

  pub fn unit(&self) -> &U {
    &self.unit
  }

  pub fn emitted(&self) -> usize {
    self.emitted
  }

  /// Return the unit to power-on state and drop anything queued.
  pub fn reset(&mut self) {
    self.unit.reset();
    self.inbox.clear();
    self.ticks = 0;
    self.emitted = 0;
    self.done_reported = false;
    self.until_next_event = CLOCK;
  }
}

impl<U: StreamUnit> DevsModel for StageModel<U> {
  fn events_ext(&mut self, incoming_message: &ModelMessage, _services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == self.input_port {
      let beat: Beat =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      self.inbox.push_back(beat);
    }
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();

    let input = if self.unit.accepting() {
      self.inbox.pop_front().unwrap_or_default()
    } else {
      Beat::idle()
    };
    let output = self.unit.clock(input, &self.weights);
    self.ticks += 1;

    if output.valid {
      if self.emitted == 0 {
        model_record!(self, services, "first_output", format!("after {} ticks", self.ticks));
      }
      self.emitted += 1;
      messages.push(ModelMessage {
        port_name: self.output_port.clone(),
        content: serde_json::to_string(&output).map_err(|_| SimulationError::InvalidModelState)?,
      });
    }

    if self.unit.done() && !self.done_reported {
      self.done_reported = true;
      model_record!(self, services, "done", format!("{} outputs in {} ticks", self.emitted, self.ticks));
    }

    // free-running clock
    self.until_next_event = CLOCK;
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl<U: StreamUnit> Reportable for StageModel<U> {
  fn status(&self) -> String {
    format!("{}, inbox={}, emitted={}", self.unit.status(), self.inbox.len(), self.emitted)
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl<U: StreamUnit> ReportableModel for StageModel<U> {}

impl<U: StreamUnit> SerializableModel for StageModel<U> {
  fn get_type(&self) -> &'static str {
    U::KIND
  }
}

/// Streams a prepared sample sequence into the chain, one beat per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceModel {
  output_port: String,
  until_next_event: f64,
  records: Vec<ModelRecord>,
  pending: VecDeque<Beat>,
  sent: usize,
}

impl SourceModel {
  pub fn new(beats: Vec<Beat>, output_port: String) -> Self {
    Self {
      output_port,
      until_next_event: CLOCK,
      records: Vec::new(),
      pending: beats.into(),
      sent: 0,
    }
  }
}

impl DevsModel for SourceModel {
  fn events_ext(&mut self, _incoming_message: &ModelMessage, _services: &mut Services) -> Result<(), SimulationError> {
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let mut messages = Vec::new();
    if let Some(beat) = self.pending.pop_front() {
      self.sent += 1;
      messages.push(ModelMessage {
        port_name: self.output_port.clone(),
        content: serde_json::to_string(&beat).map_err(|_| SimulationError::InvalidModelState)?,
      });
      if self.pending.is_empty() {
        model_record!(self, services, "stream_end", format!("{} beats sent", self.sent));
      }
    }
    self.until_next_event = CLOCK;
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for SourceModel {
  fn status(&self) -> String {
    format!("sent={}, remaining={}", self.sent, self.pending.len())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for SourceModel {}

impl SerializableModel for SourceModel {
  fn get_type(&self) -> &'static str {
    "Source"
  }
}

/// Terminal model: records every beat that reaches the end of the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkModel {
  input_port: String,
  records: Vec<ModelRecord>,
  received: Vec<Beat>,
}

impl SinkModel {
  pub fn new(input_port: String) -> Self {
    Self {
      input_port,
      records: Vec::new(),
      received: Vec::new(),
    }
  }

  pub fn received(&self) -> &[Beat] {
    &self.received
  }
}

impl DevsModel for SinkModel {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    if incoming_message.port_name == self.input_port {
      let beat: Beat =
        serde_json::from_str(&incoming_message.content).map_err(|_| SimulationError::InvalidModelState)?;
      model_record!(self, services, "receive", format!("ch{} value={}", beat.channel, beat.value));
      self.received.push(beat);
    }
    Ok(())
  }

  fn events_int(&mut self, _services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    Ok(Vec::new())
  }

  fn time_advance(&mut self, _time_delta: f64) {}

  fn until_next_event(&self) -> f64 {
    f64::INFINITY
  }
}

impl Reportable for SinkModel {
  fn status(&self) -> String {
    format!("received={}", self.received.len())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for SinkModel {}

impl SerializableModel for SinkModel {
  fn get_type(&self) -> &'static str {
    "Sink"
  }
}
