pub mod activation;
pub mod depthwise;
pub mod fixed;
pub mod frame_buffer;
pub mod pointwise;
pub mod reference;
pub mod stage;
pub mod stream;
pub mod top;

pub use activation::Activation;
pub use depthwise::{DepthwiseConfig, DepthwiseConv, DepthwiseState};
pub use fixed::Sample;
pub use frame_buffer::FrameBuffer;
pub use pointwise::{PointwiseConfig, PointwiseConv, PointwiseState};
pub use stream::{Beat, WeightMemory, WeightStore};
pub use top::{create_simulation, Network};
