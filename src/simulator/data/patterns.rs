use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

use crate::arch::depthwise::TAPS;
use crate::arch::fixed::{self, Sample};

/// Image pattern, picked per channel as `ch % 4`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
  Checkerboard,
  Gradient,
  Wave,
  Noise,
}

impl Pattern {
  pub fn for_channel(ch: usize) -> Self {
    match ch % 4 {
      0 => Pattern::Checkerboard,
      1 => Pattern::Gradient,
      2 => Pattern::Wave,
      _ => Pattern::Noise,
    }
  }
}

/// 3x3 filter family, picked per channel as `ch % 4`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
  Identity,
  Blur,
  Edge,
  SobelX,
}

impl Kernel {
  pub fn for_channel(ch: usize) -> Self {
    match ch % 4 {
      0 => Kernel::Identity,
      1 => Kernel::Blur,
      2 => Kernel::Edge,
      _ => Kernel::SobelX,
    }
  }

  /// Real-valued taps, row-major
  pub fn taps(self) -> [f64; TAPS] {
    let (raw, scale): ([i32; TAPS], f64) = match self {
      Kernel::Identity => ([0, 0, 0, 0, 1, 0, 0, 0, 0], 1.0),
      Kernel::Blur => ([1; TAPS], 1.0 / 9.0),
      Kernel::Edge => ([-1, -1, -1, -1, 8, -1, -1, -1, -1], 1.0 / 9.0),
      Kernel::SobelX => ([-1, 0, 1, -2, 0, 2, -1, 0, 1], 1.0 / 8.0),
    };
    raw.map(|t| t as f64 * scale)
  }
}

/// Standard deviation of the noise channels
pub const NOISE_SIGMA: f64 = 0.3;

/// Channel-major Q8.8 test image. Every channel also carries a small offset `0.1 * ch / C`.
pub fn generate_input(width: usize, height: usize, channels: usize, seed: u64) -> Vec<Sample> {
  let mut rng = StdRng::seed_from_u64(seed);
  let noise = Normal::new(0.0, NOISE_SIGMA).ok();
  let mut image = Vec::with_capacity(width * height * channels);
  for ch in 0..channels {
    let pattern = Pattern::for_channel(ch);
    for y in 0..height {
      for x in 0..width {
        let value = match pattern {
          Pattern::Checkerboard => {
            if (x + y) % 2 == 0 {
              0.5
            } else {
              -0.5
            }
          },
          Pattern::Gradient => (x + y) as f64 / (width + height) as f64 - 0.5,
          Pattern::Wave => 0.5 * (2.0 * PI * x as f64 / 32.0).sin() * (2.0 * PI * y as f64 / 32.0).cos(),
          Pattern::Noise => noise.map_or(0.0, |dist| dist.sample(&mut rng)),
        };
        let offset = 0.1 * ch as f64 / channels as f64;
        image.push(fixed::from_f64(value + offset));
      }
    }
  }
  image
}

/// Depthwise coefficients, `ch * 9 + ky * 3 + kx`
pub fn generate_depthwise_weights(channels: usize) -> Vec<Sample> {
  (0..channels)
    .flat_map(|ch| Kernel::for_channel(ch).taps())
    .map(fixed::from_f64)
    .collect()
}

/// Pointwise coefficients, `out_ch * in_channels + in_ch`: magnitude `1 / in_channels`, sign
/// alternating over the (in, out) grid so every output channel mixes differently.
pub fn generate_pointwise_weights(in_channels: usize, out_channels: usize) -> Vec<Sample> {
  let magnitude = 1.0 / in_channels.max(1) as f64;
  let mut weights = Vec::with_capacity(in_channels * out_channels);
  for oc in 0..out_channels {
    for ic in 0..in_channels {
      let sign = if (ic + oc) % 2 == 0 { 1.0 } else { -1.0 };
      weights.push(fixed::from_f64(sign * magnitude));
    }
  }
  weights
}

/// Small known case: a ramp `(x + y + 1) * 0.1` in each channel's top-left 3x3, zero elsewhere.
pub fn simple_input(width: usize, height: usize, channels: usize) -> Vec<Sample> {
  let mut image = Vec::with_capacity(width * height * channels);
  for _ in 0..channels {
    for y in 0..height {
      for x in 0..width {
        let value = if x < 3 && y < 3 { (x + y + 1) as f64 * 0.1 } else { 0.0 };
        image.push(fixed::from_f64(value));
      }
    }
  }
  image
}

pub fn identity_weights(channels: usize) -> Vec<Sample> {
  (0..channels)
    .flat_map(|_| Kernel::Identity.taps())
    .map(fixed::from_f64)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_patterns_per_channel() {
    let image = generate_input(4, 4, 4, 7);
    assert_eq!(image.len(), 64);
    // checkerboard on ch0, no offset
    assert_eq!(image[0], 128);
    assert_eq!(image[1], -128);
    // gradient on ch1 starts at -0.5 + 0.025
    assert_eq!(image[16], fixed::from_f64(-0.5 + 0.025));
    // wave on ch2 at the origin is just the offset
    assert_eq!(image[32], fixed::from_f64(0.05));
  }

  #[test]
  fn test_noise_is_seeded() {
    assert_eq!(generate_input(8, 8, 4, 42), generate_input(8, 8, 4, 42));
    assert_ne!(generate_input(8, 8, 4, 42)[192..], generate_input(8, 8, 4, 43)[192..]);
    // only ch3 is noise
    assert_eq!(generate_input(8, 8, 4, 42)[..192], generate_input(8, 8, 4, 43)[..192]);
  }

  #[test]
  fn test_noise_spread() {
    let image = generate_input(32, 32, 4, 11);
    let noise: Vec<f64> = image[3 * 1024..].iter().map(|&s| fixed::to_f64(s) - 0.075).collect();
    let mean = noise.iter().sum::<f64>() / noise.len() as f64;
    let var = noise.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / noise.len() as f64;
    assert!(mean.abs() < 0.05, "mean {}", mean);
    assert!((var.sqrt() - NOISE_SIGMA).abs() < 0.05, "sigma {}", var.sqrt());
  }

  #[test]
  fn test_kernels() {
    let w = generate_depthwise_weights(4);
    assert_eq!(w.len(), 36);
    assert_eq!(&w[0..9], &[0, 0, 0, 0, 256, 0, 0, 0, 0]);
    // 1/9 truncates to 28
    assert_eq!(w[9], 28);
    assert_eq!(w[22], fixed::from_f64(8.0 / 9.0));
    assert_eq!(&w[27..30], &[-32, 0, 32]);
  }

  #[test]
  fn test_pointwise_weights() {
    let w = generate_pointwise_weights(4, 2);
    assert_eq!(w, vec![64, -64, 64, -64, -64, 64, -64, 64]);
  }

  #[test]
  fn test_simple_case() {
    let image = simple_input(4, 4, 1);
    assert_eq!(image[0], fixed::from_f64(0.1));
    assert_eq!(image[3], 0);
    assert_eq!(identity_weights(2)[13], 256);
  }
}
