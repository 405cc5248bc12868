use num_traits::{Float, FromPrimitive};

////////////////////////
// Numeric primitives //
////////////////////////

/// Clamp a raw gradient component into `[-4.0, 4.0]`
///
/// Every gradient component passes through this before it is applied, which
/// bounds the per-step displacement and keeps near-coincident points from
/// blowing up the layout.
///
/// ### Params
///
/// * `val` - The value to be clamped.
///
/// ### Returns
///
/// The clamped value, now fixed to be in the range -4.0 to 4.0.
#[inline(always)]
pub fn clip<T>(val: T) -> T
where
    T: Float + FromPrimitive,
{
    let clip_val = T::from_f64(4.0).unwrap();
    val.max(-clip_val).min(clip_val)
}

/// Squared Euclidean distance between two rows of a flat embedding
///
/// ### Params
///
/// * `embd` - Flat row-major embedding buffer.
/// * `i` - First point index.
/// * `j` - Second point index.
/// * `n_dim` - Embedding dimensionality.
///
/// ### Returns
///
/// The squared Euclidean distance between points `i` and `j`.
#[inline(always)]
pub fn squared_dist_flat<T>(embd: &[T], i: usize, j: usize, n_dim: usize) -> T
where
    T: Float,
{
    let mut sum = T::zero();
    let base_i = i * n_dim;
    let base_j = j * n_dim;
    for d in 0..n_dim {
        let diff = embd[base_i + d] - embd[base_j + d];
        sum = sum + diff * diff;
    }
    sum
}

/// Squared Euclidean distance between rows of two different flat buffers
///
/// Used when head and tail embeddings are distinct storage (embedding new
/// points against a fixed reference set).
#[inline(always)]
pub fn squared_dist_pair<T>(a: &[T], i: usize, b: &[T], j: usize, n_dim: usize) -> T
where
    T: Float,
{
    let mut sum = T::zero();
    let base_i = i * n_dim;
    let base_j = j * n_dim;
    for d in 0..n_dim {
        let diff = a[base_i + d] - b[base_j + d];
        sum = sum + diff * diff;
    }
    sum
}

/// `x^b` with fast paths for the common exponents `b = 1` and `b = 0.5`
#[inline(always)]
pub fn fast_pow<T: Float>(x: T, b: T, b_is_one: bool, b_is_half: bool) -> T {
    if b_is_one {
        x
    } else if b_is_half {
        x.sqrt()
    } else {
        x.powf(b)
    }
}

/// Mean of a slice
pub fn mean<T>(v: &[T]) -> T
where
    T: Float + FromPrimitive,
{
    if v.is_empty() {
        return T::zero();
    }
    let sum = v.iter().fold(T::zero(), |acc, &x| acc + x);
    sum / T::from_usize(v.len()).unwrap()
}

/// Population variance of a slice
pub fn variance<T>(v: &[T]) -> T
where
    T: Float + FromPrimitive,
{
    if v.is_empty() {
        return T::zero();
    }
    let m = mean(v);
    let sum = v.iter().fold(T::zero(), |acc, &x| {
        let diff = x - m;
        acc + diff * diff
    });
    sum / T::from_usize(v.len()).unwrap()
}

/// Dot product of two slices of equal length
pub fn dot<T>(a: &[T], b: &[T]) -> T
where
    T: Float,
{
    assert_eq!(a.len(), b.len(), "dot product over unequal lengths");
    a.iter().zip(b).fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_math {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clip_bounds() {
        assert_eq!(clip(10.0_f64), 4.0);
        assert_eq!(clip(-10.0_f64), -4.0);
        assert_eq!(clip(4.0_f64), 4.0);
        assert_eq!(clip(-4.0_f64), -4.0);
    }

    #[test]
    fn test_clip_identity_inside_interval() {
        for &v in &[-3.9, -1.0, 0.0, 0.5, 3.9] {
            assert_eq!(clip(v), v);
        }
    }

    #[test]
    fn test_squared_dist_basic() {
        let embd = vec![0.0, 0.0, 3.0, 4.0];
        assert_relative_eq!(squared_dist_flat(&embd, 0, 1, 2), 25.0, epsilon = 1e-12);
    }

    #[test]
    fn test_squared_dist_identical_points() {
        let embd = vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        assert_relative_eq!(squared_dist_flat(&embd, 0, 1, 3), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_squared_dist_symmetric() {
        let embd = vec![0.3, -1.2, 2.5, 0.9, 4.0, -0.7];
        let d_ij = squared_dist_flat(&embd, 0, 1, 3);
        let d_ji = squared_dist_flat(&embd, 1, 0, 3);
        assert_relative_eq!(d_ij, d_ji, epsilon = 1e-12);
    }

    #[test]
    fn test_squared_dist_pair_matches_flat() {
        let a = vec![0.0, 0.0, 1.0, 1.0];
        let b = vec![3.0, 4.0];
        let d = squared_dist_pair(&a, 0, &b, 0, 2);
        assert_relative_eq!(d, 25.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fast_pow_paths() {
        assert_relative_eq!(fast_pow(3.0_f64, 1.0, true, false), 3.0);
        assert_relative_eq!(fast_pow(9.0_f64, 0.5, false, true), 3.0);
        assert_relative_eq!(
            fast_pow(2.0_f64, 0.9, false, false),
            2.0_f64.powf(0.9),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_mean_variance_dot() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(mean(&v), 2.5, epsilon = 1e-12);
        assert_relative_eq!(variance(&v), 1.25, epsilon = 1e-12);
        assert_relative_eq!(dot(&v, &v), 30.0, epsilon = 1e-12);
    }
}
