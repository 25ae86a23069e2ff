pub mod error;
pub mod layers;
pub mod optimizers;
pub mod tensor;
pub mod test_utils;

pub use error::LayerError;
pub use layers::{Activation, ConvLayer, GradientInput};
pub use optimizers::{adam_step, DEFAULT_BETA1, DEFAULT_BETA2, DEFAULT_EPSILON};
pub use tensor::{Tensor4, WindowView};
