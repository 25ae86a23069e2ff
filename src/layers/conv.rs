use crate::error::LayerError;
use crate::optimizers::adam_step;
use crate::tensor::{Tensor4, WindowView};
use rand::distributions::Distribution;
use rand::thread_rng;
use rand_distr::Normal;

/// Activation applied to the pre-activation output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Identity,
}

/// Gradient of the loss with respect to this layer's activated output,
/// as delivered by the next layer
#[derive(Debug)]
pub enum GradientInput {
    /// Already shaped (batch, out_height, out_width, out_channels)
    Spatial(Tensor4),
    /// Flattened (features, batch) matrix from a fully-connected next layer,
    /// reinterpreted using the layer's stored output dimensions
    Flattened {
        data: Vec<f64>,
        shape: (usize, usize),
    },
}

/// Implements a 2D convolutional layer with square filters, uniform stride
/// and zero padding over (batch, height, width, channel) tensors.
///
/// The layer is stateful between calls: `forward` caches its input and
/// pre-activation output, `backward` and `conv_backward` consume those
/// caches, and `update_parameters` applies an Adam step to the weights and
/// bias using the gradients of the most recent backward call. Calls must be
/// serialized per instance; every mutating entry point takes `&mut self`.
#[derive(Debug)]
pub struct ConvLayer {
    /// Construction-time input shape (batch, height, width, channels)
    dim_in: (usize, usize, usize, usize),
    /// Output shape (batch, height, width, channels) for the
    /// construction-time batch size
    pub dim_out: (usize, usize, usize, usize),
    /// Square filter size
    filter: usize,
    /// Stride in both spatial dimensions
    stride: usize,
    /// Zero padding in both spatial dimensions
    pad: usize,
    activation: Activation,
    /// L2 regularization coefficient
    lambda: f64,
    /// Filter weights, shape (filter, filter, in_channels, out_channels)
    pub weights: Tensor4,
    /// Bias terms, shape (1, 1, 1, out_channels)
    pub bias: Tensor4,
    /// Input cached by the last forward call
    input: Option<Tensor4>,
    /// Pre-activation output cached by the last forward call
    pre_activation: Option<Tensor4>,
    /// Input gradient from the most recent backward call
    pub grad_input: Tensor4,
    /// Weight gradients from the most recent backward call
    pub grad_weights: Tensor4,
    /// Bias gradients from the most recent backward call
    pub grad_bias: Tensor4,
    /// Adam first moment estimates for the weights
    velocity_weights: Tensor4,
    /// Adam first moment estimates for the bias
    velocity_bias: Tensor4,
    /// Adam second moment estimates for the weights
    second_moment_weights: Tensor4,
    /// Adam second moment estimates for the bias
    second_moment_bias: Tensor4,
    /// Scratch buffer holding the zero-padded, strided gradient map used by
    /// the transposed convolution; reallocated when the batch size changes
    grad_scratch: Tensor4,
}

impl ConvLayer {
    /// Creates a new convolutional layer.
    ///
    /// Weights are drawn from a scaled normal distribution with scale
    /// sqrt(2 / (height * width)). The scale intentionally uses the spatial
    /// input dimensions rather than the filter fan-in; downstream numerics
    /// depend on this exact formula.
    pub fn new(
        dim_in: (usize, usize, usize, usize),
        filter: usize,
        out_channels: usize,
        stride: usize,
        pad: usize,
        activation: Activation,
        lambda: f64,
    ) -> Result<Self, LayerError> {
        let (batch, height, width, in_channels) = dim_in;

        if filter == 0 || stride == 0 || out_channels == 0 {
            return Err(LayerError::InvalidGeometry(format!(
                "filter size {}, stride {} and output channels {} must all be nonzero",
                filter, stride, out_channels
            )));
        }
        // The transposed convolution insets the gradient map by
        // filter - (pad + 1) on each side, which requires pad < filter
        if pad >= filter {
            return Err(LayerError::InvalidGeometry(format!(
                "padding {} must be smaller than filter size {}",
                pad, filter
            )));
        }

        let out_height = Self::output_size(height, filter, stride, pad)?;
        let out_width = Self::output_size(width, filter, stride, pad)?;
        let dim_out = (batch, out_height, out_width, out_channels);

        // He-style initialization scaled by the spatial input dimensions
        let weight_scale = (2.0 / (height * width) as f64).sqrt();
        let normal = Normal::new(0.0, weight_scale).unwrap();
        let mut rng = thread_rng();

        let weights_data = (0..filter * filter * in_channels * out_channels)
            .map(|_| normal.sample(&mut rng))
            .collect();
        let weights =
            Tensor4::new_with_shape(weights_data, (filter, filter, in_channels, out_channels));

        let bias = Tensor4::zeros((1, 1, 1, out_channels));
        let grad_weights = weights.zeros_like();
        let grad_bias = bias.zeros_like();

        let grad_scratch = Tensor4::zeros((
            batch,
            height + filter - 1,
            width + filter - 1,
            out_channels,
        ));

        Ok(ConvLayer {
            dim_in,
            dim_out,
            filter,
            stride,
            pad,
            activation,
            lambda,
            velocity_weights: weights.zeros_like(),
            velocity_bias: bias.zeros_like(),
            second_moment_weights: weights.zeros_like(),
            second_moment_bias: bias.zeros_like(),
            weights,
            bias,
            input: None,
            pre_activation: None,
            grad_input: Tensor4::zeros(dim_in),
            grad_weights,
            grad_bias,
            grad_scratch,
        })
    }

    /// Closed-form output size along one spatial dimension,
    /// (input - filter + 2 * pad) / stride + 1 with exact division required
    fn output_size(
        input: usize,
        filter: usize,
        stride: usize,
        pad: usize,
    ) -> Result<usize, LayerError> {
        let span = (input + 2 * pad).checked_sub(filter).ok_or_else(|| {
            LayerError::InvalidGeometry(format!(
                "filter size {} exceeds padded input size {}",
                filter,
                input + 2 * pad
            ))
        })?;

        if span % stride != 0 {
            return Err(LayerError::InvalidGeometry(format!(
                "input {}, filter {}, stride {}, padding {} do not produce an integral output size",
                input, filter, stride, pad
            )));
        }

        Ok(span / stride + 1)
    }

    /// Element-wise max with zero
    fn relu(z: &Tensor4) -> Tensor4 {
        Tensor4::new_with_shape(z.data.iter().map(|&v| v.max(0.0)).collect(), z.shape)
    }

    /// Masks a gradient with the activation derivative at the cached
    /// pre-activation, 1 where z > 0 for ReLU
    fn masked_gradient(&self, grad: Tensor4, z: &Tensor4) -> Tensor4 {
        match self.activation {
            Activation::Relu => Tensor4::new_with_shape(
                grad.data
                    .iter()
                    .zip(z.data.iter())
                    .map(|(&g, &v)| if v > 0.0 { g } else { 0.0 })
                    .collect(),
                grad.shape,
            ),
            Activation::Identity => grad,
        }
    }

    /// Forward propagation.
    ///
    /// The batch dimension may differ from the construction-time batch size;
    /// the spatial and channel dimensions must match. Caches the input and
    /// the pre-activation output for the backward pass.
    pub fn forward(&mut self, x: &Tensor4) -> Result<Tensor4, LayerError> {
        let (batch, height, width, channels) = x.shape;
        let (_, in_height, in_width, in_channels) = self.dim_in;

        if (height, width, channels) != (in_height, in_width, in_channels) {
            return Err(LayerError::ShapeMismatch {
                expected: vec![in_height, in_width, in_channels],
                got: vec![height, width, channels],
            });
        }

        let (_, out_height, out_width, out_channels) = self.dim_out;

        let x_pad = if self.pad != 0 {
            x.pad_spatial(self.pad)
        } else {
            x.clone()
        };

        // Contract each filter window against the weights over
        // (filter, filter, in_channels)
        let windows = WindowView::new(&x_pad, self.filter, self.stride);
        let mut z = Tensor4::zeros((batch, out_height, out_width, out_channels));

        for b in 0..batch {
            for oh in 0..out_height {
                for ow in 0..out_width {
                    for oc in 0..out_channels {
                        let mut sum = 0.0;
                        for kh in 0..self.filter {
                            for kw in 0..self.filter {
                                for ic in 0..channels {
                                    sum += self.weights.get(kh, kw, ic, oc)
                                        * windows.at(b, oh, ow, kh, kw, ic);
                                }
                            }
                        }
                        z.set(b, oh, ow, oc, sum + self.bias.get(0, 0, 0, oc));
                    }
                }
            }
        }

        let output = match self.activation {
            Activation::Relu => Self::relu(&z),
            Activation::Identity => z.clone(),
        };

        self.input = Some(x.clone());
        self.pre_activation = Some(z);

        Ok(output)
    }

    /// Optimized backward propagation.
    ///
    /// Computes the input gradient via a transposed convolution: the masked
    /// gradient is embedded at stride-spaced positions into a padded scratch
    /// buffer and contracted against the 180-degree-rotated weights. Weight
    /// and bias gradients are stored in `grad_weights` / `grad_bias`;
    /// returns the input gradient.
    pub fn backward(&mut self, grad: GradientInput) -> Result<Tensor4, LayerError> {
        let z = self
            .pre_activation
            .as_ref()
            .ok_or(LayerError::MissingForwardPass)?
            .clone();
        let x = self
            .input
            .as_ref()
            .ok_or(LayerError::MissingForwardPass)?
            .clone();

        let (batch, out_height, out_width, out_channels) = z.shape;

        let grad = match grad {
            GradientInput::Spatial(tensor) => {
                if tensor.shape != z.shape {
                    return Err(LayerError::ShapeMismatch {
                        expected: vec![batch, out_height, out_width, out_channels],
                        got: vec![
                            tensor.shape.0,
                            tensor.shape.1,
                            tensor.shape.2,
                            tensor.shape.3,
                        ],
                    });
                }
                tensor
            }
            GradientInput::Flattened { data, shape } => {
                let (features, m) = shape;
                if features != out_height * out_width * out_channels
                    || m != batch
                    || data.len() != features * m
                {
                    return Err(LayerError::ShapeMismatch {
                        expected: vec![out_height * out_width * out_channels, batch],
                        got: vec![features, m],
                    });
                }
                // Raw row-major reinterpretation of the flattened buffer,
                // the layout matches the cached output order
                Tensor4::new_with_shape(data, (batch, out_height, out_width, out_channels))
            }
        };

        let dz = self.masked_gradient(grad, &z);

        let (_, in_height, in_width, in_channels) = self.dim_in;

        // The scratch buffer's interior shape depends on the batch size
        if self.grad_scratch.shape.0 != batch {
            self.grad_scratch = Tensor4::zeros((
                batch,
                in_height + self.filter - 1,
                in_width + self.filter - 1,
                out_channels,
            ));
        }

        self.grad_weights.fill(0.0);
        self.grad_bias.fill(0.0);

        // Embed dZ at stride-spaced positions, inset by filter - (pad + 1)
        // on each side so that convolving with the rotated kernel below
        // reproduces the input gradient (full correlation padding)
        let inset = self.filter - (self.pad + 1);
        for b in 0..batch {
            for oh in 0..out_height {
                for ow in 0..out_width {
                    for oc in 0..out_channels {
                        self.grad_scratch.set(
                            b,
                            inset + oh * self.stride,
                            inset + ow * self.stride,
                            oc,
                            dz.get(b, oh, ow, oc),
                        );
                    }
                }
            }
        }

        // dX: contract stride-1 windows of the gradient map against the
        // rotated weights over (filter, filter, out_channels)
        let rotated = self.weights.rotate180();
        let windows = WindowView::new(&self.grad_scratch, self.filter, 1);
        let mut grad_input = Tensor4::zeros((batch, in_height, in_width, in_channels));

        for b in 0..batch {
            for i in 0..in_height {
                for j in 0..in_width {
                    for ic in 0..in_channels {
                        let mut sum = 0.0;
                        for kh in 0..self.filter {
                            for kw in 0..self.filter {
                                for oc in 0..out_channels {
                                    sum += rotated.get(kh, kw, ic, oc)
                                        * windows.at(b, i, j, kh, kw, oc);
                                }
                            }
                        }
                        grad_input.set(b, i, j, ic, sum);
                    }
                }
            }
        }

        // dW: contract forward-style windows of the padded input against dZ
        // over (batch, out_height, out_width)
        let x_pad = if self.pad != 0 {
            x.pad_spatial(self.pad)
        } else {
            x
        };
        let windows = WindowView::new(&x_pad, self.filter, self.stride);

        for kh in 0..self.filter {
            for kw in 0..self.filter {
                for ic in 0..in_channels {
                    for oc in 0..out_channels {
                        let mut sum = 0.0;
                        for b in 0..batch {
                            for oh in 0..out_height {
                                for ow in 0..out_width {
                                    sum += windows.at(b, oh, ow, kh, kw, ic)
                                        * dz.get(b, oh, ow, oc);
                                }
                            }
                        }
                        self.grad_weights.set(kh, kw, ic, oc, sum);
                    }
                }
            }
        }

        self.add_regularization();

        // db: sum of dZ over batch and spatial axes
        for oc in 0..out_channels {
            let mut sum = 0.0;
            for b in 0..batch {
                for oh in 0..out_height {
                    for ow in 0..out_width {
                        sum += dz.get(b, oh, ow, oc);
                    }
                }
            }
            self.grad_bias.set(0, 0, 0, oc, sum);
        }

        self.grad_input = grad_input.clone();

        Ok(grad_input)
    }

    /// Naive backward propagation.
    ///
    /// Mathematically identical to `backward` but computed by explicit
    /// iteration over every output position and channel; serves as the
    /// correctness oracle for the transposed-convolution path.
    pub fn conv_backward(&mut self, grad: &Tensor4) -> Result<Tensor4, LayerError> {
        let z = self
            .pre_activation
            .as_ref()
            .ok_or(LayerError::MissingForwardPass)?
            .clone();
        let x = self
            .input
            .as_ref()
            .ok_or(LayerError::MissingForwardPass)?
            .clone();

        if grad.shape != z.shape {
            return Err(LayerError::ShapeMismatch {
                expected: vec![z.shape.0, z.shape.1, z.shape.2, z.shape.3],
                got: vec![grad.shape.0, grad.shape.1, grad.shape.2, grad.shape.3],
            });
        }

        let dz = self.masked_gradient(grad.clone(), &z);
        let (batch, out_height, out_width, out_channels) = dz.shape;
        let (_, in_height, in_width, in_channels) = x.shape;

        self.grad_weights.fill(0.0);
        self.grad_bias.fill(0.0);

        let x_pad = if self.pad != 0 {
            x.pad_spatial(self.pad)
        } else {
            x
        };
        let mut dx_pad = Tensor4::zeros((
            batch,
            in_height + 2 * self.pad,
            in_width + 2 * self.pad,
            in_channels,
        ));

        for oh in 0..out_height {
            let v_start = oh * self.stride;
            for ow in 0..out_width {
                let h_start = ow * self.stride;
                for oc in 0..out_channels {
                    for b in 0..batch {
                        let g = dz.get(b, oh, ow, oc);
                        for kh in 0..self.filter {
                            for kw in 0..self.filter {
                                for ic in 0..in_channels {
                                    let dx = dx_pad.get(b, v_start + kh, h_start + kw, ic)
                                        + self.weights.get(kh, kw, ic, oc) * g;
                                    dx_pad.set(b, v_start + kh, h_start + kw, ic, dx);

                                    let dw = self.grad_weights.get(kh, kw, ic, oc)
                                        + x_pad.get(b, v_start + kh, h_start + kw, ic) * g;
                                    self.grad_weights.set(kh, kw, ic, oc, dw);
                                }
                            }
                        }
                        let db = self.grad_bias.get(0, 0, 0, oc) + g;
                        self.grad_bias.set(0, 0, 0, oc, db);
                    }
                }
            }
        }

        let grad_input = if self.pad != 0 {
            dx_pad.unpad_spatial(self.pad)
        } else {
            dx_pad
        };

        self.add_regularization();

        self.grad_input = grad_input.clone();

        Ok(grad_input)
    }

    /// Adds the L2 term lambda / m * W to the weight gradients, where m is
    /// the construction-time batch dimension, not the current call's
    fn add_regularization(&mut self) {
        let scale = self.lambda / self.dim_in.0 as f64;
        for (dw, &w) in self
            .grad_weights
            .data
            .iter_mut()
            .zip(self.weights.data.iter())
        {
            *dw += scale * w;
        }
    }

    /// Updates weights and bias in place with an Adam step using the
    /// gradients of the most recent backward call.
    ///
    /// `t` is the 1-based step index supplied by the trainer and must
    /// increase monotonically. Defaults for the hyperparameters are
    /// `DEFAULT_BETA1` (0.9), `DEFAULT_BETA2` (0.999) and
    /// `DEFAULT_EPSILON` (1e-8).
    pub fn update_parameters(&mut self, rate: f64, t: usize, beta1: f64, beta2: f64, epsilon: f64) {
        adam_step(
            &mut self.weights,
            &self.grad_weights,
            &mut self.velocity_weights,
            &mut self.second_moment_weights,
            rate,
            t,
            beta1,
            beta2,
            epsilon,
        );
        adam_step(
            &mut self.bias,
            &self.grad_bias,
            &mut self.velocity_bias,
            &mut self.second_moment_bias,
            rate,
            t,
            beta1,
            beta2,
            epsilon,
        );
    }
}
