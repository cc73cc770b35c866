use serde::{Deserialize, Serialize};

use super::fixed::Sample;
use super::stream::Beat;

/// Bank that turns the depthwise unit's channel-major output into the pixel-major stream the
/// pointwise unit consumes.
///
/// Writes fill one plane per channel; once every plane is full the bank replays the frame one
/// beat per tick, channels innermost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameBuffer {
  channels: usize,
  pixels: usize,
  planes: Vec<Vec<Sample>>,
  stored: usize,
  replayed: usize,
}

impl FrameBuffer {
  pub fn new(channels: usize, pixels: usize) -> Self {
    Self {
      channels,
      pixels,
      planes: vec![Vec::with_capacity(pixels); channels],
      stored: 0,
      replayed: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.channels * self.pixels
  }

  pub fn full(&self) -> bool {
    self.stored == self.capacity()
  }

  /// Every stored beat has been replayed
  pub fn drained(&self) -> bool {
    self.full() && self.replayed == self.capacity()
  }

  /// Store a beat in its channel's plane. Writes to unknown channels or full planes are dropped.
  pub fn write(&mut self, beat: Beat) -> bool {
    if !beat.valid {
      return false;
    }
    match self.planes.get_mut(beat.channel) {
      Some(plane) if plane.len() < self.pixels => {
        plane.push(beat.value);
        self.stored += 1;
        true
      },
      _ => {
        log::warn!("[frame_buffer] dropped write for ch{} (plane full or unknown)", beat.channel);
        false
      },
    }
  }

  /// Next replayed beat once the frame is complete.
  pub fn read(&mut self) -> Beat {
    if !self.full() || self.replayed == self.capacity() {
      return Beat::idle();
    }
    let pixel = self.replayed / self.channels;
    let channel = self.replayed % self.channels;
    self.replayed += 1;
    Beat::new(self.planes[channel][pixel], channel)
  }

  /// One clock: absorb the incoming beat, emit the next replayed one.
  pub fn tick(&mut self, input: Beat) -> Beat {
    let out = self.read();
    self.write(input);
    out
  }

  pub fn reset(&mut self) {
    *self = Self::new(self.channels, self.pixels);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_replays_pixel_major_after_full_frame() {
    let mut bank = FrameBuffer::new(2, 3);
    for (ch, values) in [(0, [1, 2, 3]), (1, [10, 20, 30])] {
      for v in values {
        assert!(!bank.tick(Beat::new(v, ch)).valid);
      }
    }
    assert!(bank.full());
    let replay: Vec<(Sample, usize)> = (0..6).map(|_| bank.tick(Beat::idle())).map(|b| (b.value, b.channel)).collect();
    assert_eq!(replay, vec![(1, 0), (10, 1), (2, 0), (20, 1), (3, 0), (30, 1)]);
    assert!(bank.drained());
    assert!(!bank.tick(Beat::idle()).valid);
  }

  #[test]
  fn test_drops_overflow_and_unknown_channels() {
    let mut bank = FrameBuffer::new(1, 1);
    assert!(bank.write(Beat::new(5, 0)));
    assert!(!bank.write(Beat::new(6, 0)));
    assert!(!bank.write(Beat::new(7, 3)));
    assert!(!bank.write(Beat::idle()));
    assert_eq!(bank.read(), Beat::new(5, 0));
  }
}
