/// Four-dimensional tensor used for layer inputs, filters, gradients
/// and optimizer moments, indexed as (batch, height, width, channel)
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor4 {
    /// Flattened row-major storage of tensor elements
    pub data: Vec<f64>,
    /// Shape as (batch, height, width, channels)
    pub shape: (usize, usize, usize, usize),
}

impl Tensor4 {
    /// Creates a new tensor with specified shape
    pub fn new_with_shape(data: Vec<f64>, shape: (usize, usize, usize, usize)) -> Self {
        debug_assert_eq!(data.len(), shape.0 * shape.1 * shape.2 * shape.3);
        Tensor4 { data, shape }
    }

    /// Creates a tensor filled with zeros
    pub fn zeros(shape: (usize, usize, usize, usize)) -> Self {
        Tensor4 {
            data: vec![0.0; shape.0 * shape.1 * shape.2 * shape.3],
            shape,
        }
    }

    /// Creates a zero-filled tensor with same shape as self
    pub fn zeros_like(&self) -> Self {
        Tensor4 {
            data: vec![0.0; self.data.len()],
            shape: self.shape,
        }
    }

    /// Creates a tensor filled with ones
    pub fn ones(shape: (usize, usize, usize, usize)) -> Self {
        Tensor4 {
            data: vec![1.0; shape.0 * shape.1 * shape.2 * shape.3],
            shape,
        }
    }

    #[inline]
    fn offset(&self, b: usize, h: usize, w: usize, c: usize) -> usize {
        let (_, height, width, channels) = self.shape;
        ((b * height + h) * width + w) * channels + c
    }

    /// Reads the element at (batch, height, width, channel)
    #[inline]
    pub fn get(&self, b: usize, h: usize, w: usize, c: usize) -> f64 {
        self.data[self.offset(b, h, w, c)]
    }

    /// Writes the element at (batch, height, width, channel)
    #[inline]
    pub fn set(&mut self, b: usize, h: usize, w: usize, c: usize, value: f64) {
        let idx = self.offset(b, h, w, c);
        self.data[idx] = value;
    }

    /// Sets every element to the given value
    pub fn fill(&mut self, value: f64) {
        for val in self.data.iter_mut() {
            *val = value;
        }
    }

    /// Adds zero padding to both spatial dimensions
    pub fn pad_spatial(&self, pad: usize) -> Tensor4 {
        let (batch, height, width, channels) = self.shape;
        let padded_height = height + 2 * pad;
        let padded_width = width + 2 * pad;

        let mut padded = Tensor4::zeros((batch, padded_height, padded_width, channels));

        // Copy data into the interior
        for b in 0..batch {
            for h in 0..height {
                for w in 0..width {
                    for c in 0..channels {
                        padded.set(b, h + pad, w + pad, c, self.get(b, h, w, c));
                    }
                }
            }
        }

        padded
    }

    /// Removes a zero-padding border from both spatial dimensions
    pub fn unpad_spatial(&self, pad: usize) -> Tensor4 {
        let (batch, height, width, channels) = self.shape;
        let inner_height = height - 2 * pad;
        let inner_width = width - 2 * pad;

        let mut inner = Tensor4::zeros((batch, inner_height, inner_width, channels));

        for b in 0..batch {
            for h in 0..inner_height {
                for w in 0..inner_width {
                    for c in 0..channels {
                        inner.set(b, h, w, c, self.get(b, h + pad, w + pad, c));
                    }
                }
            }
        }

        inner
    }

    /// Rotates the tensor by 180 degrees in its two leading axes,
    /// used on (f, f, in_channels, out_channels) filter tensors
    pub fn rotate180(&self) -> Tensor4 {
        let (dim0, dim1, dim2, dim3) = self.shape;
        let mut rotated = self.zeros_like();

        for i in 0..dim0 {
            for j in 0..dim1 {
                for k in 0..dim2 {
                    for l in 0..dim3 {
                        rotated.set(dim0 - 1 - i, dim1 - 1 - j, k, l, self.get(i, j, k, l));
                    }
                }
            }
        }

        rotated
    }
}

/// Read-only sliding-window view over a (padded) tensor.
///
/// Nothing is copied: the window anchored at position (i, j) maps to the
/// underlying buffer starting at spatial offset (i * step, j * step), and
/// element coordinates are computed on every access.
pub struct WindowView<'a> {
    tensor: &'a Tensor4,
    window: usize,
    step: usize,
}

impl<'a> WindowView<'a> {
    pub fn new(tensor: &'a Tensor4, window: usize, step: usize) -> Self {
        WindowView {
            tensor,
            window,
            step,
        }
    }

    /// Number of window positions along the height axis
    pub fn positions_h(&self) -> usize {
        (self.tensor.shape.1 - self.window) / self.step + 1
    }

    /// Number of window positions along the width axis
    pub fn positions_w(&self) -> usize {
        (self.tensor.shape.2 - self.window) / self.step + 1
    }

    /// Reads the element at offset (offset_h, offset_w, channel) inside the
    /// window anchored at position (win_h, win_w)
    #[inline]
    pub fn at(
        &self,
        batch: usize,
        win_h: usize,
        win_w: usize,
        offset_h: usize,
        offset_w: usize,
        channel: usize,
    ) -> f64 {
        self.tensor.get(
            batch,
            win_h * self.step + offset_h,
            win_w * self.step + offset_w,
            channel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_tensors_eq;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor4::new_with_shape(vec![1.0, 2.0, 3.0, 4.0], (1, 2, 2, 1));
        assert_eq!(t.data.len(), 4);
        assert_eq!(t.shape, (1, 2, 2, 1));

        let z = Tensor4::zeros((2, 3, 3, 2));
        assert_eq!(z.data.len(), 36);
        assert!(z.data.iter().all(|&x| x == 0.0));

        let o = Tensor4::ones((1, 2, 2, 2));
        assert_eq!(o.data, vec![1.0; 8]);
    }

    #[test]
    fn test_get_set() {
        let mut t = Tensor4::zeros((2, 3, 4, 2));
        t.set(1, 2, 3, 1, 5.0);
        assert_eq!(t.get(1, 2, 3, 1), 5.0);
        // Last element of the flat buffer
        assert_eq!(t.data[47], 5.0);
    }

    #[test]
    fn test_pad_spatial_1() {
        // One image, one channel, 2x2 input
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 2.0, //
                3.0, 4.0, //
            ],
            (1, 2, 2, 1),
        );

        let padded = input.pad_spatial(1);

        let expected = Tensor4::new_with_shape(
            vec![
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 2.0, 0.0, //
                0.0, 3.0, 4.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
            ],
            (1, 4, 4, 1),
        );

        assert_tensors_eq(&padded, &expected);
    }

    #[test]
    fn test_pad_spatial_2() {
        // Two images, one channel, 2x2 input
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 2.0, //
                3.0, 4.0, //
                ////////////
                5.0, 6.0, //
                7.0, 8.0, //
            ],
            (2, 2, 2, 1),
        );

        let padded = input.pad_spatial(1);

        let expected = Tensor4::new_with_shape(
            vec![
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 2.0, 0.0, //
                0.0, 3.0, 4.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                //////////////////////
                0.0, 0.0, 0.0, 0.0, //
                0.0, 5.0, 6.0, 0.0, //
                0.0, 7.0, 8.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
            ],
            (2, 4, 4, 1),
        );

        assert_tensors_eq(&padded, &expected);
    }

    #[test]
    fn test_pad_spatial_3() {
        // One image, two channels, 2x2 input, channel-last storage
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 10.0, 2.0, 20.0, //
                3.0, 30.0, 4.0, 40.0, //
            ],
            (1, 2, 2, 2),
        );

        let padded = input.pad_spatial(1);

        assert_eq!(padded.shape, (1, 4, 4, 2));
        assert_eq!(padded.get(0, 1, 1, 0), 1.0);
        assert_eq!(padded.get(0, 1, 1, 1), 10.0);
        assert_eq!(padded.get(0, 2, 2, 0), 4.0);
        assert_eq!(padded.get(0, 2, 2, 1), 40.0);
        assert_eq!(padded.get(0, 0, 0, 0), 0.0);
        assert_eq!(padded.get(0, 3, 3, 1), 0.0);
    }

    #[test]
    fn test_unpad_round_trip() {
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 2.0, 3.0, //
                4.0, 5.0, 6.0, //
                7.0, 8.0, 9.0, //
            ],
            (1, 3, 3, 1),
        );

        let restored = input.pad_spatial(2).unpad_spatial(2);
        assert_tensors_eq(&restored, &input);
    }

    #[test]
    fn test_rotate180_1() {
        // 2x2 single-channel filter
        let filter = Tensor4::new_with_shape(
            vec![
                1.0, 2.0, //
                3.0, 4.0, //
            ],
            (2, 2, 1, 1),
        );

        let rotated = filter.rotate180();

        let expected = Tensor4::new_with_shape(
            vec![
                4.0, 3.0, //
                2.0, 1.0, //
            ],
            (2, 2, 1, 1),
        );

        assert_tensors_eq(&rotated, &expected);
    }

    #[test]
    fn test_rotate180_2() {
        // Channel axes must not be touched, only the two spatial axes flip
        let filter = Tensor4::new_with_shape(
            vec![
                1.0, 10.0, 2.0, 20.0, //
                3.0, 30.0, 4.0, 40.0, //
            ],
            (2, 2, 2, 1),
        );

        let rotated = filter.rotate180();

        assert_eq!(rotated.get(0, 0, 0, 0), 4.0);
        assert_eq!(rotated.get(0, 0, 1, 0), 40.0);
        assert_eq!(rotated.get(0, 1, 0, 0), 3.0);
        assert_eq!(rotated.get(1, 0, 0, 0), 2.0);
        assert_eq!(rotated.get(1, 1, 0, 0), 1.0);
        assert_eq!(rotated.get(1, 1, 1, 0), 10.0);
    }

    #[test]
    fn test_window_view_1() {
        // One image, one channel, 4x4 input, 2x2 windows, step 1
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 2.0, 3.0, 4.0, //
                5.0, 6.0, 7.0, 8.0, //
                9.0, 10.0, 11.0, 12.0, //
                13.0, 14.0, 15.0, 16.0, //
            ],
            (1, 4, 4, 1),
        );

        let view = WindowView::new(&input, 2, 1);

        assert_eq!(view.positions_h(), 3);
        assert_eq!(view.positions_w(), 3);

        // Window anchored at (0, 0)
        assert_eq!(view.at(0, 0, 0, 0, 0, 0), 1.0);
        assert_eq!(view.at(0, 0, 0, 0, 1, 0), 2.0);
        assert_eq!(view.at(0, 0, 0, 1, 0, 0), 5.0);
        assert_eq!(view.at(0, 0, 0, 1, 1, 0), 6.0);

        // Window anchored at (1, 2)
        assert_eq!(view.at(0, 1, 2, 0, 0, 0), 7.0);
        assert_eq!(view.at(0, 1, 2, 0, 1, 0), 8.0);
        assert_eq!(view.at(0, 1, 2, 1, 0, 0), 11.0);
        assert_eq!(view.at(0, 1, 2, 1, 1, 0), 12.0);
    }

    #[test]
    fn test_window_view_2() {
        // Step 2 halves the number of window positions
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 2.0, 3.0, 4.0, //
                5.0, 6.0, 7.0, 8.0, //
                9.0, 10.0, 11.0, 12.0, //
                13.0, 14.0, 15.0, 16.0, //
            ],
            (1, 4, 4, 1),
        );

        let view = WindowView::new(&input, 2, 2);

        assert_eq!(view.positions_h(), 2);
        assert_eq!(view.positions_w(), 2);

        // Window anchored at (1, 1) starts at input offset (2, 2)
        assert_eq!(view.at(0, 1, 1, 0, 0, 0), 11.0);
        assert_eq!(view.at(0, 1, 1, 0, 1, 0), 12.0);
        assert_eq!(view.at(0, 1, 1, 1, 0, 0), 15.0);
        assert_eq!(view.at(0, 1, 1, 1, 1, 0), 16.0);
    }

    #[test]
    fn test_window_view_channels() {
        // Two channels, windows keep channel-last addressing
        let input = Tensor4::new_with_shape(
            vec![
                1.0, 10.0, 2.0, 20.0, 3.0, 30.0, //
                4.0, 40.0, 5.0, 50.0, 6.0, 60.0, //
                7.0, 70.0, 8.0, 80.0, 9.0, 90.0, //
            ],
            (1, 3, 3, 2),
        );

        let view = WindowView::new(&input, 2, 1);

        assert_eq!(view.at(0, 1, 1, 0, 0, 0), 5.0);
        assert_eq!(view.at(0, 1, 1, 0, 0, 1), 50.0);
        assert_eq!(view.at(0, 1, 1, 1, 1, 0), 9.0);
        assert_eq!(view.at(0, 1, 1, 1, 1, 1), 90.0);
    }
}
