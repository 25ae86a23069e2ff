use thiserror::Error;

/// Errors surfaced by the convolutional layer to the surrounding trainer
#[derive(Debug, Error)]
pub enum LayerError {
    /// Input or gradient dimensions incompatible with the layer configuration
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Filter size, stride and padding do not produce a valid output size
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Backward was called before any forward pass cached its activations
    #[error("backward called before forward, no cached activations")]
    MissingForwardPass,
}
