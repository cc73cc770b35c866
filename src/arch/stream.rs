use serde::{Deserialize, Serialize};

use super::fixed::Sample;

/// One tick's worth of signals on a stream port: data, channel tag and validity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
  pub value: Sample,
  pub channel: usize,
  pub valid: bool,
}

impl Beat {
  pub fn new(value: Sample, channel: usize) -> Self {
    Self {
      value,
      channel,
      valid: true,
    }
  }

  /// Nothing offered this tick
  pub fn idle() -> Self {
    Self::default()
  }
}

/// Addressable coefficient store behind a unit's weight bus.
///
/// A unit strobes `read` only while it is latching coefficients; the store is never written by
/// the compute units.
pub trait WeightStore {
  fn len(&self) -> usize;

  fn read(&self, addr: usize) -> Sample;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Flat weight memory, the usual backing for the weight bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightMemory {
  data: Vec<Sample>,
}

impl WeightMemory {
  pub fn new(data: Vec<Sample>) -> Self {
    Self { data }
  }
}

impl From<Vec<Sample>> for WeightMemory {
  fn from(data: Vec<Sample>) -> Self {
    Self::new(data)
  }
}

impl WeightStore for WeightMemory {
  fn len(&self) -> usize {
    self.data.len()
  }

  fn read(&self, addr: usize) -> Sample {
    match self.data.get(addr) {
      Some(&w) => w,
      None => {
        log::warn!("weight read at {} past end of store ({} entries)", addr, self.data.len());
        0
      },
    }
  }
}
