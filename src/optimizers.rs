use crate::Tensor4;

/// Default exponential decay rate for first moment estimates
pub const DEFAULT_BETA1: f64 = 0.9;
/// Default exponential decay rate for second moment estimates
pub const DEFAULT_BETA2: f64 = 0.999;
/// Default small constant for numerical stability
pub const DEFAULT_EPSILON: f64 = 1e-8;

/// Applies a single Adam update step to one parameter tensor in place.
///
/// `velocity` and `second_moment` are the caller-owned moment buffers for
/// this parameter; they persist across calls and must never be reset.
/// `timestep` is 1-based and must increase monotonically between calls.
pub fn adam_step(
    param: &mut Tensor4,
    grad: &Tensor4,
    velocity: &mut Tensor4,
    second_moment: &mut Tensor4,
    learning_rate: f64,
    timestep: usize,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
) {
    // Calculate bias correction terms
    let beta1_correction = 1.0 - beta1.powi(timestep as i32);
    let beta2_correction = 1.0 - beta2.powi(timestep as i32);
    let beta1_complement = 1.0 - beta1;
    let beta2_complement = 1.0 - beta2;

    param
        .data
        .iter_mut()
        .zip(grad.data.iter())
        .zip(velocity.data.iter_mut())
        .zip(second_moment.data.iter_mut())
        .for_each(
            |(((param_val, &grad_val), velocity_val), second_moment_val)| {
                // Update biased first moment estimate
                *velocity_val = beta1 * *velocity_val + beta1_complement * grad_val;
                // Update biased second moment estimate
                *second_moment_val =
                    beta2 * *second_moment_val + beta2_complement * grad_val * grad_val;

                // Compute bias-corrected estimates
                let m_hat = *velocity_val / beta1_correction;
                let v_hat = *second_moment_val / beta2_correction;

                // Update parameters
                *param_val -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            },
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_close, assert_tensors_eq};

    #[test]
    fn test_adam_zero_gradient_is_noop() {
        let mut param = Tensor4::ones((1, 2, 2, 1));
        let grad = Tensor4::zeros((1, 2, 2, 1));
        let mut velocity = Tensor4::zeros((1, 2, 2, 1));
        let mut second_moment = Tensor4::zeros((1, 2, 2, 1));

        let initial = param.clone();

        // With zero gradients both moments stay zero and the update
        // term is exactly 0 / epsilon = 0
        for t in 1..=5 {
            adam_step(
                &mut param,
                &grad,
                &mut velocity,
                &mut second_moment,
                0.1,
                t,
                DEFAULT_BETA1,
                DEFAULT_BETA2,
                DEFAULT_EPSILON,
            );
        }

        assert_tensors_eq(&param, &initial);
    }

    #[test]
    fn test_adam_single_step() {
        let mut param = Tensor4::ones((1, 1, 2, 1));
        let grad = Tensor4::new_with_shape(vec![2.0, -2.0], (1, 1, 2, 1));
        let mut velocity = Tensor4::zeros((1, 1, 2, 1));
        let mut second_moment = Tensor4::zeros((1, 1, 2, 1));

        adam_step(
            &mut param,
            &grad,
            &mut velocity,
            &mut second_moment,
            0.1,
            1,
            DEFAULT_BETA1,
            DEFAULT_BETA2,
            DEFAULT_EPSILON,
        );

        // At t = 1 the bias corrections cancel exactly, so the update is
        // rate * g / (|g| + epsilon)
        let expected_delta = 0.1 * 2.0 / (2.0 + DEFAULT_EPSILON);
        assert_close(param.data[0], 1.0 - expected_delta, 1e-12);
        assert_close(param.data[1], 1.0 + expected_delta, 1e-12);
    }

    #[test]
    fn test_adam_constant_gradient_steps() {
        let mut param = Tensor4::ones((1, 1, 1, 1));
        let grad = Tensor4::new_with_shape(vec![1.0], (1, 1, 1, 1));
        let mut velocity = Tensor4::zeros((1, 1, 1, 1));
        let mut second_moment = Tensor4::zeros((1, 1, 1, 1));

        // With a constant gradient the bias-corrected moments equal g and
        // g^2 at every step, so each step moves by rate * g / (|g| + epsilon)
        for t in 1..=3 {
            adam_step(
                &mut param,
                &grad,
                &mut velocity,
                &mut second_moment,
                0.1,
                t,
                DEFAULT_BETA1,
                DEFAULT_BETA2,
                DEFAULT_EPSILON,
            );
        }

        let expected = 1.0 - 3.0 * 0.1 * 1.0 / (1.0 + DEFAULT_EPSILON);
        assert_close(param.data[0], expected, 1e-12);
    }
}
