//! Q8.8 fixed-point arithmetic shared by every compute unit.
//!
//! A sample is a 16-bit two's-complement integer whose real value is `raw / 256`. Intermediates
//! are widened to `i64` before they are combined and are saturated back to 16 bits before they
//! leave a unit.

/// Signed Q8.8 sample
pub type Sample = i16;

/// Total sample width in bits
pub const DATA_WIDTH: u32 = 16;
/// Fractional bits
pub const FRAC_BITS: u32 = 8;
/// 1.0 in Q8.8
pub const ONE: i64 = 1 << FRAC_BITS;
/// Largest representable sample
pub const Q_MAX: Sample = i16::MAX;
/// Smallest representable sample
pub const Q_MIN: Sample = i16::MIN;

const HALF_LSB: i64 = 1 << (FRAC_BITS - 1);

/// Add half an LSB, then arithmetic-shift right by the fractional width.
pub fn round_shift(v: i64) -> i64 {
  (v + HALF_LSB) >> FRAC_BITS
}

/// True when `v` is a sign extension of its low `bits` bits.
pub fn fits(v: i64, bits: u32) -> bool {
  let shift = 64 - bits;
  (v << shift) >> shift == v
}

/// Clamp a widened value to the sample range.
pub fn saturate(v: i64) -> Sample {
  if v > Q_MAX as i64 {
    Q_MAX
  } else if v < Q_MIN as i64 {
    Q_MIN
  } else {
    v as Sample
  }
}

/// Saturate using the sign-extension test on the upper bits, as the pointwise lanes do.
pub fn saturate_sign_ext(v: i64) -> Sample {
  if fits(v, DATA_WIDTH) {
    v as Sample
  } else if v < 0 {
    Q_MIN
  } else {
    Q_MAX
  }
}

/// Quantized multiply: double-width product, rounded back to Q8.8, saturated per lane.
pub fn mul_q(x: Sample, w: Sample) -> Sample {
  let product = x as i64 * w as i64;
  saturate_sign_ext(round_shift(product))
}

/// Saturating conversion from a real value (truncates toward zero like the data generators).
pub fn from_f64(value: f64) -> Sample {
  let scaled = value * ONE as f64;
  if scaled >= Q_MAX as f64 {
    Q_MAX
  } else if scaled <= Q_MIN as f64 {
    Q_MIN
  } else {
    scaled as Sample
  }
}

pub fn to_f64(sample: Sample) -> f64 {
  sample as f64 / ONE as f64
}
