mod conv;

pub use conv::{Activation, ConvLayer, GradientInput};
