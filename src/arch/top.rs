//! Top level: source -> depthwise -> frame buffer -> pointwise -> activation -> sink

use sim::models::Model;
use sim::simulator::{Connector, Simulation};

use super::activation::Activation;
use super::depthwise::{DepthwiseConfig, DepthwiseConv};
use super::fixed::Sample;
use super::frame_buffer::FrameBuffer;
use super::pointwise::{PointwiseConfig, PointwiseConv};
use super::stage::{SinkModel, SourceModel, StageModel};
use super::stream::{Beat, WeightMemory, WeightStore};
use crate::error::{Error, Result};

pub const SOURCE: &str = "source";
pub const DEPTHWISE: &str = "depthwise";
pub const FRAME_BUFFER: &str = "frame_buffer";
pub const POINTWISE: &str = "pointwise";
pub const ACTIVATION: &str = "activation";
pub const SINK: &str = "sink";

pub const INPUT_PORT: &str = "input";
pub const OUTPUT_PORT: &str = "output";

/// Geometry of the whole separable block.
///
/// The pointwise side is derived from the depthwise side: its input channels are the depthwise
/// channels and it runs for exactly one frame of depthwise output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
  pub depthwise: DepthwiseConfig,
  pub pointwise: PointwiseConfig,
}

impl Network {
  pub fn new(
    depthwise: DepthwiseConfig,
    out_channels: usize,
    parallelism: usize,
    idle_timeout: Option<u32>,
  ) -> Result<Self> {
    depthwise.validate()?;
    let mut pointwise =
      PointwiseConfig::new(depthwise.channels(), out_channels, parallelism)?.with_pixels(depthwise.out_pixels())?;
    if let Some(ticks) = idle_timeout {
      pointwise = pointwise.with_idle_timeout(ticks);
    }
    Ok(Self { depthwise, pointwise })
  }

  /// Samples the source must stream in, channel-major
  pub fn input_len(&self) -> usize {
    self.depthwise.channels() * self.depthwise.in_pixels()
  }

  /// Activation outputs a full run produces
  pub fn output_len(&self) -> usize {
    self.pointwise.out_channels() * self.pointwise.pixels()
  }
}

/// Tag a channel-major image with its channel indices.
pub fn input_beats(network: &Network, image: &[Sample]) -> Vec<Beat> {
  let plane = network.depthwise.in_pixels();
  image
    .iter()
    .enumerate()
    .map(|(i, &v)| Beat::new(v, i / plane))
    .collect()
}

fn check_weights(unit: &'static str, required: usize, weights: &WeightMemory) -> Result<()> {
  if weights.len() < required {
    return Err(Error::Weights {
      unit,
      required,
      available: weights.len(),
    });
  }
  Ok(())
}

pub fn create_simulation(
  network: &Network,
  image: &[Sample],
  dw_weights: WeightMemory,
  pw_weights: WeightMemory,
) -> Result<Simulation> {
  if image.len() != network.input_len() {
    return Err(Error::InputLength {
      expected: network.input_len(),
      actual: image.len(),
    });
  }
  check_weights("depthwise", network.depthwise.weight_count(), &dw_weights)?;
  check_weights("pointwise", network.pointwise.weight_count(), &pw_weights)?;

  let port = |name: &str| name.to_string();

  let models = vec![
    Model::new(
      String::from(SOURCE),
      Box::new(SourceModel::new(input_beats(network, image), port(OUTPUT_PORT))),
    ),
    Model::new(
      String::from(DEPTHWISE),
      Box::new(StageModel::new(
        DepthwiseConv::new(network.depthwise),
        dw_weights,
        port(INPUT_PORT),
        port(OUTPUT_PORT),
      )),
    ),
    Model::new(
      String::from(FRAME_BUFFER),
      Box::new(StageModel::new(
        FrameBuffer::new(network.depthwise.channels(), network.depthwise.out_pixels()),
        WeightMemory::default(),
        port(INPUT_PORT),
        port(OUTPUT_PORT),
      )),
    ),
    Model::new(
      String::from(POINTWISE),
      Box::new(StageModel::new(
        PointwiseConv::new(network.pointwise),
        pw_weights,
        port(INPUT_PORT),
        port(OUTPUT_PORT),
      )),
    ),
    Model::new(
      String::from(ACTIVATION),
      Box::new(StageModel::new(
        Activation::new(),
        WeightMemory::default(),
        port(INPUT_PORT),
        port(OUTPUT_PORT),
      )),
    ),
    Model::new(String::from(SINK), Box::new(SinkModel::new(port(INPUT_PORT)))),
  ];

  // Connector::new(id, source_id, target_id, source_port, target_port)
  let link = |source: &str, target: &str| {
    Connector::new(
      format!("{}_{}", source, target),
      source.to_string(),
      target.to_string(),
      port(OUTPUT_PORT),
      port(INPUT_PORT),
    )
  };

  let connectors = vec![
    link(SOURCE, DEPTHWISE),
    link(DEPTHWISE, FRAME_BUFFER),
    link(FRAME_BUFFER, POINTWISE),
    link(POINTWISE, ACTIVATION),
    link(ACTIVATION, SINK),
  ];

  Ok(Simulation::post(models, connectors))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_network_derives_pointwise_geometry() {
    let dw = DepthwiseConfig::new(5, 5, 3, 2, 1).unwrap();
    let network = Network::new(dw, 4, 2, Some(16)).unwrap();
    assert_eq!(network.pointwise.in_channels(), 3);
    assert_eq!(network.pointwise.pixels(), 9);
    assert_eq!(network.pointwise.idle_timeout(), Some(16));
    assert_eq!(network.input_len(), 75);
    assert_eq!(network.output_len(), 36);
  }

  #[test]
  fn test_input_beats_are_channel_tagged() {
    let dw = DepthwiseConfig::new(3, 3, 2, 1, 0).unwrap();
    let network = Network::new(dw, 1, 1, None).unwrap();
    let image: Vec<Sample> = (0..18).collect();
    let beats = input_beats(&network, &image);
    assert_eq!(beats[8], Beat::new(8, 0));
    assert_eq!(beats[9], Beat::new(9, 1));
  }

  #[test]
  fn test_rejects_short_inputs() {
    let dw = DepthwiseConfig::new(3, 3, 1, 1, 0).unwrap();
    let network = Network::new(dw, 1, 1, None).unwrap();
    assert!(matches!(
      create_simulation(&network, &[0; 4], vec![0; 9].into(), vec![0; 1].into()),
      Err(Error::InputLength { .. })
    ));
    assert!(matches!(
      create_simulation(&network, &[0; 9], vec![0; 3].into(), vec![0; 1].into()),
      Err(Error::Weights { unit: "depthwise", .. })
    ));
  }
}
