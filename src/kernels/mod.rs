use num_traits::{Float, FromPrimitive};

pub mod aligned;
pub mod euclidean;
pub mod metric;

/////////////////////
// Kernel strategy //
/////////////////////

/// One epoch of stochastic gradient descent over the edge set
///
/// Kernels are constructed once per run by the drivers in the crate root and
/// advanced epoch by epoch; `alpha` is the annealed learning rate for this
/// epoch. All per-run state (embeddings, schedule, PRNG) lives inside the
/// kernel.
pub trait EpochKernel<T> {
    fn advance(&mut self, epoch: usize, alpha: T);
}

/// Precomputed constants to avoid repeated calculations
///
/// ### Fields
///
/// * `a` - The a parameter of the embedding curve.
/// * `b` - The b parameter of the embedding curve.
/// * `two_a_b` - The product of `2 * a * b`.
/// * `two_gamma_b` - The product of `2 * gamma * b`.
/// * `b_is_one` / `b_is_half` - Fast-path flags for the power calls.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OptimConstants<T> {
    pub a: T,
    pub b: T,
    pub two_a_b: T,
    pub two_gamma_b: T,
    pub b_is_one: bool,
    pub b_is_half: bool,
}

impl<T> OptimConstants<T>
where
    T: Float + FromPrimitive,
{
    pub fn new(a: T, b: T, gamma: T) -> Self {
        let two = T::from_f64(2.0).unwrap();
        let tol = T::from_f64(1e-10).unwrap();
        Self {
            a,
            b,
            two_a_b: two * a * b,
            two_gamma_b: two * gamma * b,
            b_is_one: (b - T::one()).abs() < tol,
            b_is_half: (b - T::from_f64(0.5).unwrap()).abs() < tol,
        }
    }
}

/// Flatten a per-point embedding into a row-major buffer
pub(crate) fn flatten<T: Float>(embedding: &[Vec<T>]) -> Vec<T> {
    let n_dim = embedding.first().map_or(0, |p| p.len());
    let mut flat = Vec::with_capacity(embedding.len() * n_dim);
    for point in embedding {
        flat.extend_from_slice(point);
    }
    flat
}

/// Copy a row-major buffer back into the caller's per-point storage
pub(crate) fn copy_back<T: Float>(flat: &[T], embedding: &mut [Vec<T>]) {
    let n_dim = embedding.first().map_or(0, |p| p.len());
    for (i, point) in embedding.iter_mut().enumerate() {
        point.copy_from_slice(&flat[i * n_dim..(i + 1) * n_dim]);
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_kernels {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constants_precompute() {
        let c = OptimConstants::new(1.5_f64, 0.5, 2.0);
        assert_relative_eq!(c.two_a_b, 1.5, epsilon = 1e-12);
        assert_relative_eq!(c.two_gamma_b, 2.0, epsilon = 1e-12);
        assert!(c.b_is_half);
        assert!(!c.b_is_one);
    }

    #[test]
    fn test_flatten_round_trip() {
        let mut embd = vec![vec![1.0_f64, 2.0], vec![3.0, 4.0]];
        let flat = flatten(&embd);
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0]);
        embd[0][0] = 0.0;
        copy_back(&flat, &mut embd);
        assert_eq!(embd[0], vec![1.0, 2.0]);
    }
}
