//! Pointwise (1x1) convolution unit
//! Each input sample is multiplied against PARALLELISM output channels per tick; the unit cycles
//! through every output-channel group before it takes the next sample.

use serde::{Deserialize, Serialize};

use super::fixed::{self, Sample};
use super::stream::{Beat, WeightStore};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointwiseConfig {
  in_channels: usize,
  out_channels: usize,
  /// Output channels computed per tick
  parallelism: usize,
  /// Pixels in one run; the run expects `in_channels * pixels` inputs
  pixels: usize,
  /// Consecutive idle ticks in PROCESSING that end a started stream early
  idle_timeout: Option<u32>,
}

impl PointwiseConfig {
  pub fn new(in_channels: usize, out_channels: usize, parallelism: usize) -> Result<Self> {
    let config = Self {
      in_channels,
      out_channels,
      parallelism,
      pixels: 1,
      idle_timeout: None,
    };
    config.validate()?;
    Ok(config)
  }

  pub fn with_pixels(mut self, pixels: usize) -> Result<Self> {
    self.pixels = pixels;
    self.validate()?;
    Ok(self)
  }

  pub fn with_idle_timeout(mut self, ticks: u32) -> Self {
    self.idle_timeout = Some(ticks);
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.in_channels == 0 || self.out_channels == 0 {
      return Err(Error::config(format!(
        "pointwise channel counts must be non-zero, got {} -> {}",
        self.in_channels, self.out_channels
      )));
    }
    if self.parallelism == 0 || self.parallelism > self.out_channels {
      return Err(Error::config(format!(
        "parallelism {} must be in 1..={}",
        self.parallelism, self.out_channels
      )));
    }
    if self.pixels == 0 {
      return Err(Error::config("pointwise run must cover at least one pixel"));
    }
    Ok(())
  }

  pub fn in_channels(&self) -> usize {
    self.in_channels
  }

  pub fn out_channels(&self) -> usize {
    self.out_channels
  }

  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  pub fn pixels(&self) -> usize {
    self.pixels
  }

  pub fn idle_timeout(&self) -> Option<u32> {
    self.idle_timeout
  }

  /// Output-channel groups visited per input sample
  pub fn groups(&self) -> usize {
    self.out_channels.div_ceil(self.parallelism)
  }

  pub fn weight_count(&self) -> usize {
    self.in_channels * self.out_channels
  }

  /// Bus address of the weight joining `in_ch` to `out_ch`
  pub fn weight_addr(&self, in_ch: usize, out_ch: usize) -> usize {
    out_ch * self.in_channels + in_ch
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointwiseState {
  Idle,
  Processing,
  Accumulating,
  Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointwiseConv {
  config: PointwiseConfig,
  state: PointwiseState,
  done: bool,

  weights: Vec<Sample>,
  acc: Vec<i64>,
  acc_valid: Vec<bool>,

  // Sample being spread across the output groups
  latched: Option<(Sample, usize)>,
  group: usize,

  inputs_in_pixel: usize,
  pixels_done: usize,
  // Silence is only counted once the first sample of the run has arrived
  armed: bool,
  idle_ticks: u32,
  stream_ended: bool,

  // ACCUMULATING walk
  out_channel: usize,
}

impl PointwiseConv {
  pub fn new(config: PointwiseConfig) -> Self {
    Self {
      config,
      state: PointwiseState::Idle,
      done: false,
      weights: vec![0; config.weight_count()],
      acc: vec![0; config.out_channels],
      acc_valid: vec![false; config.out_channels],
      latched: None,
      group: 0,
      inputs_in_pixel: 0,
      pixels_done: 0,
      armed: false,
      idle_ticks: 0,
      stream_ended: false,
      out_channel: 0,
    }
  }

  pub fn config(&self) -> &PointwiseConfig {
    &self.config
  }

  pub fn state(&self) -> PointwiseState {
    self.state
  }

  pub fn done(&self) -> bool {
    self.done
  }

  pub fn accepting(&self) -> bool {
    self.state == PointwiseState::Processing && self.latched.is_none()
  }

  pub fn accumulator(&self, out_ch: usize) -> Option<i64> {
    match self.acc_valid.get(out_ch) {
      Some(true) => Some(self.acc[out_ch]),
      _ => None,
    }
  }

  /// Clear accumulators, validity and counters; back to IDLE.
  pub fn reset(&mut self) {
    *self = Self::new(self.config);
  }

  pub fn tick<W: WeightStore>(&mut self, enable: bool, input: Beat, weights: &W) -> Beat {
    match self.state {
      PointwiseState::Idle => {
        if enable {
          for (addr, w) in self.weights.iter_mut().enumerate() {
            *w = weights.read(addr);
          }
          log::debug!("[pointwise] {} weights latched", self.weights.len());
          self.goto(PointwiseState::Processing);
        }
        Beat::idle()
      },
      PointwiseState::Processing => {
        if self.latched.is_none() {
          if input.valid {
            self.latched = Some(self.clamp_input(input));
            self.idle_ticks = 0;
            self.armed = true;
          } else {
            self.on_idle_tick();
            return Beat::idle();
          }
        } else if input.valid {
          log::trace!(
            "[pointwise] dropped sample for ch{} while ch{} is latched (group {})",
            input.channel,
            self.latched.map_or(0, |(_, ch)| ch),
            self.group
          );
        }
        self.mac_group();
        Beat::idle()
      },
      PointwiseState::Accumulating => {
        let oc = self.out_channel;
        let out = if self.acc_valid[oc] {
          let beat = Beat::new(fixed::saturate_sign_ext(self.acc[oc]), oc);
          self.acc[oc] = 0;
          self.acc_valid[oc] = false;
          beat
        } else {
          Beat::idle()
        };
        self.out_channel += 1;
        if self.out_channel == self.config.out_channels {
          self.out_channel = 0;
          self.pixels_done += 1;
          if self.stream_ended || self.pixels_done == self.config.pixels {
            self.done = true;
            self.goto(PointwiseState::Done);
          } else {
            self.goto(PointwiseState::Processing);
          }
        }
        out
      },
      PointwiseState::Done => Beat::idle(),
    }
  }

  fn goto(&mut self, next: PointwiseState) {
    log::trace!("[pointwise] {:?} -> {:?}", self.state, next);
    self.state = next;
  }

  /// Out-of-range channel tags become a zero sample on channel 0.
  fn clamp_input(&self, input: Beat) -> (Sample, usize) {
    if input.channel >= self.config.in_channels {
      log::debug!(
        "[pointwise] channel {} out of range (< {}), forced to ch0 with zero data",
        input.channel,
        self.config.in_channels
      );
      (0, 0)
    } else {
      (input.value, input.channel)
    }
  }

  /// Multiply the latched sample against one output-channel group, each lane saturating alone.
  fn mac_group(&mut self) {
    let Some((sample, in_ch)) = self.latched else {
      return;
    };
    let p = self.config.parallelism;
    let first = self.group * p;
    let last = (first + p).min(self.config.out_channels);
    for oc in first..last {
      let w = self.weights[self.config.weight_addr(in_ch, oc)];
      self.acc[oc] += fixed::mul_q(sample, w) as i64;
      self.acc_valid[oc] = true;
    }

    self.group += 1;
    if self.group < self.config.groups() {
      return;
    }
    self.group = 0;
    self.latched = None;
    self.inputs_in_pixel += 1;
    if self.inputs_in_pixel == self.config.in_channels {
      self.inputs_in_pixel = 0;
      self.out_channel = 0;
      self.goto(PointwiseState::Accumulating);
    }
  }

  fn on_idle_tick(&mut self) {
    let Some(limit) = self.config.idle_timeout else {
      return;
    };
    if !self.armed {
      return;
    }
    self.idle_ticks = self.idle_ticks.saturating_add(1);
    if self.idle_ticks < limit {
      return;
    }
    log::debug!("[pointwise] input silent for {} ticks, ending stream", self.idle_ticks);
    self.stream_ended = true;
    self.inputs_in_pixel = 0;
    if self.acc_valid.iter().any(|&v| v) {
      self.out_channel = 0;
      self.goto(PointwiseState::Accumulating);
    } else {
      self.done = true;
      self.goto(PointwiseState::Done);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::reference;
  use crate::arch::stream::WeightMemory;

  fn run(unit: &mut PointwiseConv, inputs: &[Beat], weights: &WeightMemory) -> Vec<Beat> {
    let mut pending = inputs.iter().copied();
    let mut outputs = Vec::new();
    for _ in 0..10_000 {
      let offer = if unit.accepting() {
        pending.next().unwrap_or_else(Beat::idle)
      } else {
        Beat::idle()
      };
      let out = unit.tick(true, offer, weights);
      if out.valid {
        outputs.push(out);
      }
      if unit.done() {
        break;
      }
    }
    outputs
  }

  /// out0 = in0 + in1, out1 = in0 - in1
  fn sum_diff_weights() -> WeightMemory {
    WeightMemory::new(vec![256, 256, 256, -256])
  }

  #[test]
  fn test_config_is_only_built_validated() {
    assert!(PointwiseConfig::new(2, 4, 0).is_err());
    assert!(PointwiseConfig::new(2, 4, 5).is_err());
    assert!(PointwiseConfig::new(0, 4, 1).is_err());
    assert!(PointwiseConfig::new(2, 4, 2).unwrap().with_pixels(0).is_err());

    let config = PointwiseConfig::new(3, 5, 2).unwrap().with_pixels(7).unwrap().with_idle_timeout(9);
    assert_eq!((config.in_channels(), config.out_channels(), config.parallelism()), (3, 5, 2));
    assert_eq!(config.pixels(), 7);
    assert_eq!(config.idle_timeout(), Some(9));
    assert_eq!(config.groups(), 3);
  }

  #[test]
  fn test_sum_and_difference() {
    let config = PointwiseConfig::new(2, 2, 1).unwrap();
    let mut unit = PointwiseConv::new(config);
    let outputs = run(&mut unit, &[Beat::new(300, 0), Beat::new(100, 1)], &sum_diff_weights());
    assert_eq!(outputs, vec![Beat::new(400, 0), Beat::new(200, 1)]);
    assert!(unit.done());
    assert_eq!(unit.state(), PointwiseState::Done);
  }

  #[test]
  fn test_out_of_range_channel_acts_as_zero_on_channel_zero() {
    let config = PointwiseConfig::new(2, 2, 1).unwrap();
    let weights = sum_diff_weights();

    let mut clamped = PointwiseConv::new(config);
    let got = run(&mut clamped, &[Beat::new(1234, 2), Beat::new(100, 1)], &weights);

    let mut zeroed = PointwiseConv::new(config);
    let want = run(&mut zeroed, &[Beat::new(0, 0), Beat::new(100, 1)], &weights);

    assert_eq!(got, want);
    assert_eq!(got, vec![Beat::new(100, 0), Beat::new(-100, 1)]);
  }

  #[test]
  fn test_group_cycling_matches_reference() {
    let config = PointwiseConfig::new(3, 5, 2).unwrap().with_pixels(2).unwrap();
    assert_eq!(config.groups(), 3);
    let weights: Vec<Sample> = (0..15).map(|i| (i as Sample - 7) * 40).collect();
    let pixels: Vec<Sample> = vec![256, -512, 128, 64, 32, -16];
    let inputs: Vec<Beat> = pixels.iter().enumerate().map(|(i, &v)| Beat::new(v, i % 3)).collect();

    let mut unit = PointwiseConv::new(config);
    let outputs = run(&mut unit, &inputs, &WeightMemory::new(weights.clone()));
    let expected = reference::pointwise(&config, &pixels, &weights).unwrap();
    assert_eq!(outputs.iter().map(|b| b.value).collect::<Vec<_>>(), expected);
    let channels: Vec<usize> = outputs.iter().map(|b| b.channel).collect();
    assert_eq!(channels, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4]);
  }

  #[test]
  fn test_one_sample_takes_one_tick_per_group() {
    let config = PointwiseConfig::new(1, 4, 1).unwrap();
    let mut unit = PointwiseConv::new(config);
    let weights = WeightMemory::new(vec![256; 4]);
    unit.tick(true, Beat::idle(), &weights);
    assert!(unit.accepting());
    unit.tick(true, Beat::new(10, 0), &weights);
    for _ in 0..3 {
      assert!(!unit.accepting());
      assert_eq!(unit.state(), PointwiseState::Processing);
      unit.tick(true, Beat::idle(), &weights);
    }
    assert_eq!(unit.state(), PointwiseState::Accumulating);
    assert_eq!(unit.accumulator(3), Some(10));
  }

  #[test]
  fn test_lanes_saturate_independently() {
    let config = PointwiseConfig::new(1, 2, 2).unwrap();
    let mut unit = PointwiseConv::new(config);
    // 127.0 * 127.0 overflows lane 0, lane 1 stays exact
    let weights = WeightMemory::new(vec![32512, 256]);
    let outputs = run(&mut unit, &[Beat::new(32512, 0)], &weights);
    assert_eq!(outputs, vec![Beat::new(fixed::Q_MAX, 0), Beat::new(32512, 1)]);
  }

  #[test]
  fn test_accumulator_saturates_on_drain() {
    let config = PointwiseConfig::new(2, 1, 1).unwrap();
    let mut unit = PointwiseConv::new(config);
    let weights = WeightMemory::new(vec![256, 256]);
    let outputs = run(&mut unit, &[Beat::new(-30000, 0), Beat::new(-30000, 1)], &weights);
    assert_eq!(outputs, vec![Beat::new(fixed::Q_MIN, 0)]);
  }

  #[test]
  fn test_idle_timeout_ends_partial_stream() {
    let config = PointwiseConfig::new(3, 2, 1).unwrap().with_idle_timeout(4);
    let mut unit = PointwiseConv::new(config);
    let outputs = run(&mut unit, &[Beat::new(256, 0)], &WeightMemory::new(vec![256, 0, 0, 512, 0, 0]));
    assert!(unit.done());
    assert_eq!(outputs, vec![Beat::new(256, 0), Beat::new(512, 1)]);
  }

  #[test]
  fn test_idle_timeout_waits_for_first_sample() {
    let config = PointwiseConfig::new(2, 2, 1).unwrap().with_idle_timeout(3);
    let weights = sum_diff_weights();
    let mut unit = PointwiseConv::new(config);
    // a long upstream fill must not end the stream
    for _ in 0..50 {
      unit.tick(true, Beat::idle(), &weights);
    }
    assert!(!unit.done());
    assert_eq!(unit.state(), PointwiseState::Processing);

    let outputs = run(&mut unit, &[Beat::new(300, 0), Beat::new(100, 1)], &weights);
    assert_eq!(outputs, vec![Beat::new(400, 0), Beat::new(200, 1)]);
  }

  #[test]
  fn test_sample_offered_while_latched_is_dropped() {
    let config = PointwiseConfig::new(1, 2, 1).unwrap();
    let weights = WeightMemory::new(vec![256, 256]);
    let mut unit = PointwiseConv::new(config);
    unit.tick(true, Beat::idle(), &weights);
    unit.tick(true, Beat::new(10, 0), &weights);
    assert!(!unit.accepting());
    // second group still pending; this beat is ignored
    unit.tick(true, Beat::new(99, 0), &weights);
    assert_eq!(unit.state(), PointwiseState::Accumulating);
    assert_eq!(unit.accumulator(0), Some(10));
    assert_eq!(unit.accumulator(1), Some(10));
  }

  #[test]
  fn test_reset_clears_accumulators() {
    let config = PointwiseConfig::new(2, 2, 1).unwrap();
    let weights = sum_diff_weights();
    let mut unit = PointwiseConv::new(config);
    unit.tick(true, Beat::idle(), &weights);
    unit.tick(true, Beat::new(999, 0), &weights);
    unit.tick(true, Beat::idle(), &weights);
    assert!(unit.accumulator(0).is_some());

    unit.reset();
    assert_eq!(unit.state(), PointwiseState::Idle);
    assert!((0..2).all(|oc| unit.accumulator(oc).is_none()));

    let outputs = run(&mut unit, &[Beat::new(300, 0), Beat::new(100, 1)], &weights);
    assert_eq!(outputs, vec![Beat::new(400, 0), Beat::new(200, 1)]);
  }
}
