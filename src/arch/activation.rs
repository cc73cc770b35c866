//! Hard-swish activation: x * clip(x + 3, 0, 6) / 6 in Q8.8
//! Five register stages, one clock each; division by 6 is a reciprocal multiply.

use serde::{Deserialize, Serialize};

use super::fixed::{self, Sample, FRAC_BITS, ONE};
use super::stream::Beat;

/// Pipeline depth, the observable input-to-output latency in ticks
pub const LATENCY: usize = 5;

/// round(2^18 / 6); keeps the division within one part in 2^17 of exact
pub const RECIP_SIX: i64 = 43691;
pub const RECIP_SHIFT: u32 = 18;

const THREE: i64 = 3 * ONE;
const SIX: i64 = 6 * ONE;

/// One stage register: the input x rides along next to the stage's working value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StageReg {
  valid: bool,
  channel: usize,
  x: Sample,
  value: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activation {
  stages: [StageReg; LATENCY],
}

impl Activation {
  pub fn new() -> Self {
    Self::default()
  }

  /// Advance every stage by one tick.
  ///
  /// The returned beat is the registered output visible during this tick: a sample offered with
  /// `valid` set on tick `t` is returned on tick `t + 5`.
  pub fn tick(&mut self, input: Beat) -> Beat {
    let out = self.stages[4];
    let output = Beat {
      value: out.value as Sample,
      channel: out.channel,
      valid: out.valid,
    };

    let [s1, s2, s3, s4, _] = self.stages;

    // 5: x * clip / 6 via reciprocal multiply, saturate to 16 bits
    let divided = (s4.value * RECIP_SIX) >> RECIP_SHIFT;
    let s5 = StageReg {
      value: fixed::saturate(divided) as i64,
      ..s4
    };
    // 4: back to Q8.8 with rounding
    let s4 = StageReg {
      value: fixed::round_shift(s3.value),
      ..s3
    };
    // 3: double-width product with the carried x
    let s3 = StageReg {
      value: s2.x as i64 * s2.value,
      ..s2
    };
    // 2: bounded ramp
    let s2 = StageReg {
      value: s1.value.clamp(0, SIX),
      ..s1
    };
    // 1: register input, x + 3
    let s1 = StageReg {
      valid: input.valid,
      channel: input.channel,
      x: input.value,
      value: input.value as i64 + THREE,
    };

    self.stages = [s1, s2, s3, s4, s5];
    output
  }

  /// Clear every stage's validity and data.
  pub fn reset(&mut self) {
    self.stages = [StageReg::default(); LATENCY];
  }

  /// True while any stage still carries a valid sample.
  pub fn busy(&self) -> bool {
    self.stages.iter().any(|s| s.valid)
  }
}

/// Combinational form of the five stages, bit-identical to the pipeline.
pub fn hard_swish(x: Sample) -> Sample {
  let ramp = (x as i64 + THREE).clamp(0, SIX);
  let scaled = fixed::round_shift(x as i64 * ramp);
  fixed::saturate((scaled * RECIP_SIX) >> RECIP_SHIFT)
}

/// Exact real-valued result expressed in Q8.8 LSBs, for accuracy checks.
pub fn hard_swish_exact(x: Sample) -> f64 {
  let xr = fixed::to_f64(x);
  let ramp = (xr + 3.0).clamp(0.0, 6.0);
  xr * ramp / 6.0 * (1u32 << FRAC_BITS) as f64
}
