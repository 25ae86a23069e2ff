#[cfg(test)]
use crate::Tensor4;

/// Asserts that two floating point values are approximately equal
///
/// # Arguments
/// * `a` - First value
/// * `b` - Second value
/// * `epsilon` - Maximum allowed difference
#[cfg(test)]
pub fn assert_close(a: f64, b: f64, epsilon: f64) {
    assert!((a - b).abs() <= epsilon, "{} is not close to {}", a, b);
}

/// Asserts that two tensors are exactly equal in both shape and values
///
/// # Arguments
/// * `a` - First tensor
/// * `b` - Second tensor
#[cfg(test)]
pub fn assert_tensors_eq(a: &Tensor4, b: &Tensor4) {
    assert_eq!(a.shape, b.shape);
    for (x, y) in a.data.iter().zip(b.data.iter()) {
        assert_eq!(x, y)
    }
}

/// Asserts that two tensors have the same shape and element-wise values
/// within the given tolerance
#[cfg(test)]
pub fn assert_tensors_close(a: &Tensor4, b: &Tensor4, epsilon: f64) {
    assert_eq!(a.shape, b.shape);
    for (x, y) in a.data.iter().zip(b.data.iter()) {
        assert_close(*x, *y, epsilon);
    }
}
