//! Depthwise 3x3 convolution unit
//! One channel at a time: a line buffer fills in raster order and a single shared MAC walks the
//! nine kernel taps serially for every output position.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::fixed::{self, Sample};
use super::stream::{Beat, WeightStore};
use crate::error::{Error, Result};

pub const KERNEL_SIZE: usize = 3;
pub const TAPS: usize = KERNEL_SIZE * KERNEL_SIZE;

/// Image geometry and convolution parameters, checked once before the unit exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthwiseConfig {
  in_width: usize,
  in_height: usize,
  channels: usize,
  stride: usize,
  padding: usize,
}

impl DepthwiseConfig {
  /// Validate a geometry. Rejects anything whose output size would not be an integer.
  pub fn new(in_width: usize, in_height: usize, channels: usize, stride: usize, padding: usize) -> Result<Self> {
    let config = Self {
      in_width,
      in_height,
      channels,
      stride,
      padding,
    };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.in_width == 0 || self.in_height == 0 || self.channels == 0 {
      return Err(Error::config(format!(
        "depthwise dimensions must be non-zero, got {}x{}x{}",
        self.in_width, self.in_height, self.channels
      )));
    }
    if self.stride == 0 {
      return Err(Error::config("depthwise stride must be non-zero"));
    }
    if self.padding >= KERNEL_SIZE {
      return Err(Error::config(format!(
        "padding {} must be smaller than the {}x{} kernel",
        self.padding, KERNEL_SIZE, KERNEL_SIZE
      )));
    }
    for (name, extent) in [("width", self.in_width), ("height", self.in_height)] {
      let padded = extent + 2 * self.padding;
      if padded < KERNEL_SIZE {
        return Err(Error::config(format!(
          "padded {} {} is smaller than the kernel",
          name, padded
        )));
      }
      if (padded - KERNEL_SIZE) % self.stride != 0 {
        return Err(Error::config(format!(
          "{} {} with padding {} and stride {} gives a non-integer output size",
          name, extent, self.padding, self.stride
        )));
      }
    }
    Ok(())
  }

  pub fn in_width(&self) -> usize {
    self.in_width
  }

  pub fn in_height(&self) -> usize {
    self.in_height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn padding(&self) -> usize {
    self.padding
  }

  pub fn out_width(&self) -> usize {
    (self.in_width + 2 * self.padding - KERNEL_SIZE) / self.stride + 1
  }

  pub fn out_height(&self) -> usize {
    (self.in_height + 2 * self.padding - KERNEL_SIZE) / self.stride + 1
  }

  pub fn in_pixels(&self) -> usize {
    self.in_width * self.in_height
  }

  pub fn out_pixels(&self) -> usize {
    self.out_width() * self.out_height()
  }

  /// Coefficients the weight bus must provide
  pub fn weight_count(&self) -> usize {
    self.channels * TAPS
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthwiseState {
  Idle,
  LoadWeights,
  Processing,
  MacCompute,
  OutputReady,
  Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthwiseConv {
  config: DepthwiseConfig,
  state: DepthwiseState,
  done: bool,

  // Weights latched for the current channel
  kernel: [Sample; TAPS],

  // Line buffer: newest sample at the front, at most KERNEL_SIZE rows deep
  window: VecDeque<Sample>,
  received: usize,
  in_row: usize,
  in_col: usize,

  // Output iteration
  channel: usize,
  out_row: usize,
  out_col: usize,

  // Serial MAC
  tap: usize,
  acc: i64,
}

impl DepthwiseConv {
  pub fn new(config: DepthwiseConfig) -> Self {
    Self {
      config,
      state: DepthwiseState::Idle,
      done: false,
      kernel: [0; TAPS],
      window: VecDeque::with_capacity(KERNEL_SIZE * config.in_width),
      received: 0,
      in_row: 0,
      in_col: 0,
      channel: 0,
      out_row: 0,
      out_col: 0,
      tap: 0,
      acc: 0,
    }
  }

  pub fn config(&self) -> &DepthwiseConfig {
    &self.config
  }

  pub fn state(&self) -> DepthwiseState {
    self.state
  }

  pub fn done(&self) -> bool {
    self.done
  }

  /// Channel whose samples the line buffer is currently taking
  pub fn fill_channel(&self) -> usize {
    self.channel
  }

  /// True when a valid sample offered this tick would be shifted into the line buffer.
  pub fn accepting(&self) -> bool {
    self.state == DepthwiseState::Processing && !self.window_ready() && self.received < self.config.in_pixels()
  }

  /// Synchronously return to IDLE, dropping weights, buffered rows and the accumulator.
  pub fn reset(&mut self) {
    *self = Self::new(self.config);
  }

  /// Advance one clock.
  ///
  /// `enable` is the run flag: it starts a run from IDLE and releases COMPLETED back to IDLE.
  /// Samples are taken only while `accepting()`; anything offered on other ticks is dropped.
  pub fn tick<W: WeightStore>(&mut self, enable: bool, input: Beat, weights: &W) -> Beat {
    match self.state {
      DepthwiseState::Idle => {
        if enable {
          self.channel = 0;
          self.out_row = 0;
          self.out_col = 0;
          self.done = false;
          self.clear_window();
          self.goto(DepthwiseState::LoadWeights);
        }
        Beat::idle()
      },
      DepthwiseState::LoadWeights => {
        let base = self.channel * TAPS;
        for (t, w) in self.kernel.iter_mut().enumerate() {
          *w = weights.read(base + t);
        }
        log::debug!("[depthwise] ch{} kernel latched: {:?}", self.channel, self.kernel);
        self.goto(DepthwiseState::Processing);
        Beat::idle()
      },
      DepthwiseState::Processing => {
        if self.window_ready() {
          self.tap = 0;
          self.goto(DepthwiseState::MacCompute);
        } else if input.valid {
          if self.accepting() && input.channel == self.channel {
            self.shift_in(input.value);
          } else {
            log::trace!(
              "[depthwise] dropped sample for ch{} while filling ch{} ({} received)",
              input.channel,
              self.channel,
              self.received
            );
          }
        }
        Beat::idle()
      },
      DepthwiseState::MacCompute => {
        let product = self.tap_value(self.tap) as i64 * self.kernel[self.tap] as i64;
        self.acc = if self.tap == 0 { product } else { self.acc + product };
        self.tap += 1;
        if self.tap == TAPS {
          self.goto(DepthwiseState::OutputReady);
        }
        Beat::idle()
      },
      DepthwiseState::OutputReady => {
        let result = fixed::saturate(fixed::round_shift(self.acc));
        let out = Beat::new(result, self.channel);
        self.advance_output();
        out
      },
      DepthwiseState::Completed => {
        if !enable {
          self.done = false;
          self.goto(DepthwiseState::Idle);
        }
        Beat::idle()
      },
    }
  }

  fn goto(&mut self, next: DepthwiseState) {
    log::trace!("[depthwise] {:?} -> {:?}", self.state, next);
    self.state = next;
  }

  fn clear_window(&mut self) {
    self.window.clear();
    self.received = 0;
    self.in_row = 0;
    self.in_col = 0;
  }

  fn shift_in(&mut self, value: Sample) {
    self.window.push_front(value);
    self.window.truncate(KERNEL_SIZE * self.config.in_width);
    self.received += 1;
    self.in_col += 1;
    if self.in_col == self.config.in_width {
      self.in_col = 0;
      self.in_row += 1;
    }
  }

  /// Raster index of the last image sample the current output position reads.
  fn needed_index(&self) -> usize {
    let c = &self.config;
    let last = KERNEL_SIZE - 1;
    // padding < KERNEL_SIZE, so the bottom-right tap never lies above or left of the image
    let row = (self.out_row * c.stride + last - c.padding).min(c.in_height - 1);
    let col = (self.out_col * c.stride + last - c.padding).min(c.in_width - 1);
    row * c.in_width + col
  }

  fn window_ready(&self) -> bool {
    self.received > self.needed_index()
  }

  /// Window sample under kernel tap `t`, or zero when the tap sits in the padding.
  fn tap_value(&self, t: usize) -> Sample {
    let c = &self.config;
    let (ky, kx) = (t / KERNEL_SIZE, t % KERNEL_SIZE);
    let row = (self.out_row * c.stride + ky) as isize - c.padding as isize;
    let col = (self.out_col * c.stride + kx) as isize - c.padding as isize;
    if row < 0 || col < 0 || row as usize >= c.in_height || col as usize >= c.in_width {
      return 0;
    }
    let linear = row as usize * c.in_width + col as usize;
    let age = self.received - 1 - linear;
    debug_assert!(
      age < self.window.len(),
      "window read at age {} past buffered {} samples",
      age,
      self.window.len()
    );
    self.window[age]
  }

  fn advance_output(&mut self) {
    self.out_col += 1;
    if self.out_col < self.config.out_width() {
      self.goto(DepthwiseState::Processing);
      return;
    }
    self.out_col = 0;
    self.out_row += 1;
    if self.out_row < self.config.out_height() {
      self.goto(DepthwiseState::Processing);
      return;
    }
    self.out_row = 0;
    log::debug!("[depthwise] ch{} complete", self.channel);
    self.channel += 1;
    if self.channel < self.config.channels {
      self.clear_window();
      self.goto(DepthwiseState::LoadWeights);
    } else {
      self.done = true;
      self.goto(DepthwiseState::Completed);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::reference;
  use crate::arch::stream::WeightMemory;

  /// Drive a unit against a channel-major raster stream, offering samples only when accepting.
  fn drive(unit: &mut DepthwiseConv, image: &[Sample], weights: &WeightMemory) -> (Vec<Beat>, Vec<DepthwiseState>) {
    let pixels = unit.config().in_pixels();
    let mut next = 0;
    let mut outputs = Vec::new();
    let mut trace = Vec::new();
    for _ in 0..100_000 {
      let offer = if next < image.len() && unit.accepting() {
        let beat = Beat::new(image[next], next / pixels);
        next += 1;
        beat
      } else {
        Beat::idle()
      };
      trace.push(unit.state());
      let out = unit.tick(true, offer, weights);
      if out.valid {
        outputs.push(out);
      }
      if unit.done() {
        break;
      }
    }
    (outputs, trace)
  }

  fn image_5x5() -> Vec<Sample> {
    (0..25).map(|i| ((i as i32 * 37 % 23) - 11) as Sample * 16).collect()
  }

  #[test]
  fn test_rejects_non_integer_output_size() {
    assert!(DepthwiseConfig::new(6, 6, 1, 2, 0).is_err());
    assert!(DepthwiseConfig::new(5, 5, 1, 2, 3).is_err());
    assert!(DepthwiseConfig::new(5, 5, 1, 0, 1).is_err());
    assert!(DepthwiseConfig::new(1, 1, 1, 1, 0).is_err());
    let ok = DepthwiseConfig::new(5, 5, 1, 2, 1).unwrap();
    assert_eq!((ok.out_width(), ok.out_height()), (3, 3));
    assert_eq!((ok.in_width(), ok.in_height(), ok.channels()), (5, 5, 1));
    assert_eq!((ok.stride(), ok.padding()), (2, 1));
  }

  #[test]
  fn test_5x5_stride2_pad1_matches_reference() {
    let config = DepthwiseConfig::new(5, 5, 1, 2, 1).unwrap();
    let image = image_5x5();
    let kernel: Vec<Sample> = vec![64, -128, 32, 256, 512, -256, 16, 128, -64];
    let weights = WeightMemory::new(kernel.clone());

    let mut unit = DepthwiseConv::new(config);
    let (outputs, _) = drive(&mut unit, &image, &weights);
    assert!(unit.done());
    assert_eq!(unit.state(), DepthwiseState::Completed);
    assert_eq!(outputs.len(), config.out_pixels());

    let expected = reference::depthwise(&config, &image, &kernel).unwrap();
    let actual: Vec<Sample> = outputs.iter().map(|b| b.value).collect();
    assert_eq!(actual, expected);
    assert!(outputs.iter().all(|b| b.channel == 0));
  }

  #[test]
  fn test_identity_kernel_passes_image_through() {
    let config = DepthwiseConfig::new(4, 4, 1, 1, 1).unwrap();
    let image: Vec<Sample> = (0..16).map(|v| v * 10 - 70).collect();
    let mut kernel = vec![0; TAPS];
    kernel[4] = 256;
    let weights = WeightMemory::new(kernel);
    let mut unit = DepthwiseConv::new(config);
    let (outputs, _) = drive(&mut unit, &image, &weights);
    let actual: Vec<Sample> = outputs.iter().map(|b| b.value).collect();
    assert_eq!(actual, image);
  }

  #[test]
  fn test_mac_takes_nine_ticks_per_output() {
    let config = DepthwiseConfig::new(5, 5, 2, 1, 0).unwrap();
    let image: Vec<Sample> = (0..50).map(|v| v as Sample).collect();
    let weights = WeightMemory::new(vec![256; 2 * TAPS]);
    let mut unit = DepthwiseConv::new(config);
    let (outputs, trace) = drive(&mut unit, &image, &weights);
    assert_eq!(outputs.len(), 2 * config.out_pixels());

    // every MAC_COMPUTE run lasts exactly nine ticks and is followed by OUTPUT_READY
    let mut runs = Vec::new();
    let mut i = 0;
    while i < trace.len() {
      if trace[i] == DepthwiseState::MacCompute {
        let start = i;
        while i < trace.len() && trace[i] == DepthwiseState::MacCompute {
          i += 1;
        }
        runs.push(i - start);
        assert_eq!(trace[i], DepthwiseState::OutputReady);
      } else {
        i += 1;
      }
    }
    assert_eq!(runs.len(), outputs.len());
    assert!(runs.iter().all(|&n| n == TAPS));
  }

  #[test]
  fn test_multi_channel_uses_per_channel_kernels() {
    let config = DepthwiseConfig::new(5, 5, 2, 2, 1).unwrap();
    let mut image = image_5x5();
    image.extend(image_5x5().iter().map(|v| -v));
    let mut kernel: Vec<Sample> = vec![16, 32, 16, 32, 64, 32, 16, 32, 16];
    kernel.extend([-256, 0, 256, -512, 0, 512, -256, 0, 256]);
    let weights = WeightMemory::new(kernel.clone());

    let mut unit = DepthwiseConv::new(config);
    let (outputs, _) = drive(&mut unit, &image, &weights);
    let expected = reference::depthwise(&config, &image, &kernel).unwrap();
    assert_eq!(outputs.iter().map(|b| b.value).collect::<Vec<_>>(), expected);
    assert_eq!(outputs[0].channel, 0);
    assert_eq!(outputs[config.out_pixels()].channel, 1);
  }

  #[test]
  fn test_accumulator_saturates() {
    let config = DepthwiseConfig::new(3, 3, 1, 1, 0).unwrap();
    let image = vec![fixed::Q_MAX; 9];
    let weights = WeightMemory::new(vec![fixed::Q_MAX; TAPS]);
    let mut unit = DepthwiseConv::new(config);
    let (outputs, _) = drive(&mut unit, &image, &weights);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].value, fixed::Q_MAX);
  }

  #[test]
  fn test_completed_holds_until_enable_drops() {
    let config = DepthwiseConfig::new(3, 3, 1, 1, 0).unwrap();
    let weights = WeightMemory::new(vec![256; TAPS]);
    let mut unit = DepthwiseConv::new(config);
    drive(&mut unit, &[1; 9], &weights);
    assert_eq!(unit.state(), DepthwiseState::Completed);
    unit.tick(true, Beat::idle(), &weights);
    assert_eq!(unit.state(), DepthwiseState::Completed);
    unit.tick(false, Beat::idle(), &weights);
    assert_eq!(unit.state(), DepthwiseState::Idle);
    assert!(!unit.done());
  }

  #[test]
  fn test_reset_mid_run_reproduces_output() {
    let config = DepthwiseConfig::new(5, 5, 1, 2, 1).unwrap();
    let image = image_5x5();
    let weights = WeightMemory::new(vec![100, -50, 25, 200, 300, -75, 12, 60, -30]);

    let mut clean = DepthwiseConv::new(config);
    let (expected, _) = drive(&mut clean, &image, &weights);

    let mut unit = DepthwiseConv::new(config);
    let mut next = 0;
    for _ in 0..40 {
      let beat = if unit.accepting() {
        next += 1;
        Beat::new(image[next - 1], 0)
      } else {
        Beat::idle()
      };
      unit.tick(true, beat, &weights);
    }
    // stopped mid-channel with a partial window and at least one output emitted
    assert!(next < image.len());
    unit.reset();
    assert_eq!(unit.state(), DepthwiseState::Idle);
    let (again, _) = drive(&mut unit, &image, &weights);
    assert_eq!(again, expected);
  }

  #[test]
  fn test_ignores_samples_for_other_channels() {
    let config = DepthwiseConfig::new(3, 3, 1, 1, 0).unwrap();
    let weights = WeightMemory::new(vec![256; TAPS]);
    let mut unit = DepthwiseConv::new(config);
    unit.tick(true, Beat::idle(), &weights);
    unit.tick(true, Beat::idle(), &weights);
    assert!(unit.accepting());
    unit.tick(true, Beat::new(50, 1), &weights);
    assert_eq!(unit.received, 0);
    unit.tick(true, Beat::new(50, 0), &weights);
    assert_eq!(unit.received, 1);
  }
}
