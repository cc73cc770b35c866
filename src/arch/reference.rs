//! Functional golden model of the three units.
//!
//! No timing, no state machines: just the arithmetic each unit must reproduce bit-exactly, used to
//! check the cycle models and the end-to-end chain.

use super::activation;
use super::depthwise::{DepthwiseConfig, KERNEL_SIZE, TAPS};
use super::fixed::{self, Sample};
use super::pointwise::PointwiseConfig;
use crate::error::{Error, Result};

fn check_len(expected: usize, actual: usize) -> Result<()> {
  if expected != actual {
    return Err(Error::InputLength { expected, actual });
  }
  Ok(())
}

fn check_weights(unit: &'static str, required: usize, available: usize) -> Result<()> {
  if available < required {
    return Err(Error::Weights {
      unit,
      required,
      available,
    });
  }
  Ok(())
}

/// Channel-major image in, channel-major outputs out.
pub fn depthwise(config: &DepthwiseConfig, image: &[Sample], weights: &[Sample]) -> Result<Vec<Sample>> {
  config.validate()?;
  check_len(config.channels() * config.in_pixels(), image.len())?;
  check_weights("depthwise", config.weight_count(), weights.len())?;

  let (w, h) = (config.in_width() as isize, config.in_height() as isize);
  let mut out = Vec::with_capacity(config.channels() * config.out_pixels());
  for ch in 0..config.channels() {
    let plane = &image[ch * config.in_pixels()..(ch + 1) * config.in_pixels()];
    let kernel = &weights[ch * TAPS..(ch + 1) * TAPS];
    for oy in 0..config.out_height() {
      for ox in 0..config.out_width() {
        let mut acc: i64 = 0;
        for ky in 0..KERNEL_SIZE {
          for kx in 0..KERNEL_SIZE {
            let y = (oy * config.stride() + ky) as isize - config.padding() as isize;
            let x = (ox * config.stride() + kx) as isize - config.padding() as isize;
            if y < 0 || x < 0 || y >= h || x >= w {
              continue;
            }
            let pixel = plane[(y * w + x) as usize] as i64;
            acc += pixel * kernel[ky * KERNEL_SIZE + kx] as i64;
          }
        }
        out.push(fixed::saturate(fixed::round_shift(acc)));
      }
    }
  }
  Ok(out)
}

/// Pixel-major inputs (all input channels of pixel 0, then pixel 1, ...), pixel-major outputs.
pub fn pointwise(config: &PointwiseConfig, inputs: &[Sample], weights: &[Sample]) -> Result<Vec<Sample>> {
  config.validate()?;
  check_len(config.in_channels() * config.pixels(), inputs.len())?;
  check_weights("pointwise", config.weight_count(), weights.len())?;

  let mut out = Vec::with_capacity(config.out_channels() * config.pixels());
  for pixel in inputs.chunks(config.in_channels()) {
    for oc in 0..config.out_channels() {
      let acc: i64 = pixel
        .iter()
        .enumerate()
        .map(|(ic, &x)| fixed::mul_q(x, weights[config.weight_addr(ic, oc)]) as i64)
        .sum();
      out.push(fixed::saturate_sign_ext(acc));
    }
  }
  Ok(out)
}

/// Reorder a channel-major frame into pixel-major order.
pub fn interleave(frame: &[Sample], channels: usize) -> Vec<Sample> {
  if channels == 0 {
    return Vec::new();
  }
  let pixels = frame.len() / channels;
  let mut out = Vec::with_capacity(frame.len());
  for p in 0..pixels {
    for ch in 0..channels {
      out.push(frame[ch * pixels + p]);
    }
  }
  out
}

pub fn activation(inputs: &[Sample]) -> Vec<Sample> {
  inputs.iter().map(|&x| activation::hard_swish(x)).collect()
}

/// Depthwise, reorder, pointwise, activation: the expected output of the whole chain,
/// pixel-major with output channels innermost.
pub fn chain(
  dw: &DepthwiseConfig,
  pw: &PointwiseConfig,
  image: &[Sample],
  dw_weights: &[Sample],
  pw_weights: &[Sample],
) -> Result<Vec<Sample>> {
  let frame = depthwise(dw, image, dw_weights)?;
  let mixed = pointwise(pw, &interleave(&frame, dw.channels()), pw_weights)?;
  Ok(activation(&mixed))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_depthwise_hand_computed() {
    // 3x3 image of ones (1.0), box kernel of 1.0, no padding: single output 9.0
    let config = DepthwiseConfig::new(3, 3, 1, 1, 0).unwrap();
    let out = depthwise(&config, &[256; 9], &[256; 9]).unwrap();
    assert_eq!(out, vec![9 * 256]);
  }

  #[test]
  fn test_depthwise_padding_reads_zero() {
    // corner output with padding only sees a 2x2 patch
    let config = DepthwiseConfig::new(3, 3, 1, 1, 1).unwrap();
    let out = depthwise(&config, &[256; 9], &[256; 9]).unwrap();
    assert_eq!(out[0], 4 * 256);
    assert_eq!(out[4], 9 * 256);
    assert_eq!(out.len(), 9);
  }

  #[test]
  fn test_rejects_wrong_lengths() {
    let config = DepthwiseConfig::new(3, 3, 1, 1, 0).unwrap();
    assert!(matches!(
      depthwise(&config, &[0; 8], &[0; 9]),
      Err(Error::InputLength { expected: 9, actual: 8 })
    ));
    assert!(matches!(depthwise(&config, &[0; 9], &[0; 4]), Err(Error::Weights { .. })));
  }

  #[test]
  fn test_interleave() {
    // two channels, three pixels
    let frame = [1, 2, 3, 10, 20, 30];
    assert_eq!(interleave(&frame, 2), vec![1, 10, 2, 20, 3, 30]);
  }

  #[test]
  fn test_pointwise_sum_difference() {
    let config = PointwiseConfig::new(2, 2, 1).unwrap();
    let out = pointwise(&config, &[300, 100], &[256, 256, 256, -256]).unwrap();
    assert_eq!(out, vec![400, 200]);
  }
}
