use num_traits::{Float, FromPrimitive};

use super::EpochKernel;
use crate::math::clip;
use crate::rng::TauRng;
use crate::schedule::EdgeSchedule;

///////////////////////////
// Output-space metrics  //
///////////////////////////

/// A differentiable output-space metric
///
/// `distance_gradient` returns the distance between `x` and `y` and writes
/// the gradient with respect to `x` into `grad`. Implementations must be
/// pure: no internal state, same inputs give same outputs.
pub trait OutputMetric<T>: Send + Sync {
    fn distance_gradient(&self, x: &[T], y: &[T], grad: &mut [T]) -> T;
}

/// Plain Euclidean distance, the stock output metric
pub struct EuclideanOutput;

impl<T> OutputMetric<T> for EuclideanOutput
where
    T: Float + FromPrimitive,
{
    fn distance_gradient(&self, x: &[T], y: &[T], grad: &mut [T]) -> T {
        let mut sum = T::zero();
        for d in 0..x.len() {
            let diff = x[d] - y[d];
            sum = sum + diff * diff;
        }
        let dist = sum.sqrt();

        let denom = T::from_f64(1e-6).unwrap() + dist;
        for d in 0..x.len() {
            grad[d] = (x[d] - y[d]) / denom;
        }
        dist
    }
}

////////////////////
// Generic kernel //
////////////////////

/// SGD kernel for an arbitrary differentiable output metric
///
/// Same sampling schedule as the Euclidean kernel, but distances and their
/// gradients come from an [`OutputMetric`], and the partner's update uses
/// the reverse-direction metric gradient (metrics need not have symmetric
/// gradients). Sequential only; no constraint or density support.
pub struct GenericKernel<'a, T> {
    a: T,
    b: T,
    gamma: T,
    head: Vec<T>,
    tail: Option<Vec<T>>,
    n_dim: usize,
    n_tail_vertices: usize,
    edge_head: Vec<usize>,
    edge_tail: Vec<usize>,
    schedule: EdgeSchedule<T>,
    rng: TauRng,
    move_other: bool,
    metric: &'a dyn OutputMetric<T>,
    grad: Vec<T>,
    rev_grad: Vec<T>,
}

impl<'a, T> GenericKernel<'a, T>
where
    T: Float + FromPrimitive,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        a: T,
        b: T,
        gamma: T,
        head: Vec<T>,
        tail: Option<Vec<T>>,
        n_dim: usize,
        edge_head: Vec<usize>,
        edge_tail: Vec<usize>,
        schedule: EdgeSchedule<T>,
        rng: TauRng,
        move_other: bool,
        metric: &'a dyn OutputMetric<T>,
    ) -> Self {
        let n_tail_vertices = if n_dim == 0 {
            0
        } else {
            tail.as_ref().map_or(head.len(), |t| t.len()) / n_dim
        };
        Self {
            a,
            b,
            gamma,
            head,
            tail,
            n_dim,
            n_tail_vertices,
            edge_head,
            edge_tail,
            schedule,
            rng,
            move_other,
            metric,
            grad: vec![T::zero(); n_dim],
            rev_grad: vec![T::zero(); n_dim],
        }
    }

    pub(crate) fn head_flat(&self) -> &[T] {
        &self.head
    }

    pub(crate) fn tail_flat(&self) -> Option<&[T]> {
        self.tail.as_deref()
    }

    #[inline]
    fn tail_add(&mut self, idx: usize, delta: T) {
        match self.tail.as_mut() {
            Some(t) => t[idx] = t[idx] + delta,
            None => self.head[idx] = self.head[idx] + delta,
        }
    }
}

impl<T> EpochKernel<T> for GenericKernel<'_, T>
where
    T: Float + FromPrimitive,
{
    fn advance(&mut self, epoch: usize, alpha: T) {
        let nd = self.n_dim;
        let one = T::one();
        let two = T::from_f64(2.0).unwrap();
        let eps6 = T::from_f64(1e-6).unwrap();
        // 1-based epoch count: a period-1 edge fires from the first epoch
        let n = T::from_usize(epoch + 1).unwrap();

        for i in 0..self.schedule.len() {
            if !self.schedule.due(i, n) {
                continue;
            }

            let j = self.edge_head[i];
            let k = self.edge_tail[i];
            let jb = j * nd;
            let kb = k * nd;

            let dist = {
                let tail = self.tail.as_deref().unwrap_or(&self.head);
                self.metric
                    .distance_gradient(&self.head[jb..jb + nd], &tail[kb..kb + nd], &mut self.grad)
            };
            if self.move_other {
                let tail = self.tail.as_deref().unwrap_or(&self.head);
                self.metric.distance_gradient(
                    &tail[kb..kb + nd],
                    &self.head[jb..jb + nd],
                    &mut self.rev_grad,
                );
            }

            let w_l = if dist > T::zero() {
                (one + self.a * dist.powf(two * self.b)).recip()
            } else {
                one
            };
            let grad_coeff = two * self.b * (w_l - one) / (dist + eps6);

            for d in 0..nd {
                let gd = clip(grad_coeff * self.grad[d]);
                self.head[jb + d] = self.head[jb + d] + gd * alpha;
            }
            if self.move_other {
                for d in 0..nd {
                    let gd = clip(grad_coeff * self.rev_grad[d]);
                    self.tail_add(kb + d, gd * alpha);
                }
            }

            self.schedule.fire(i);

            let n_neg = self.schedule.negative_samples(i, n);
            for _ in 0..n_neg {
                let t = self.rng.next_below(self.n_tail_vertices);
                let tb = t * nd;

                let dist = {
                    let tail = self.tail.as_deref().unwrap_or(&self.head);
                    self.metric.distance_gradient(
                        &self.head[jb..jb + nd],
                        &tail[tb..tb + nd],
                        &mut self.grad,
                    )
                };

                let w_l = if dist > T::zero() {
                    (one + self.a * dist.powf(two * self.b)).recip()
                } else if j == t {
                    continue;
                } else {
                    one
                };
                let grad_coeff = self.gamma * two * self.b * w_l / (dist + eps6);

                for d in 0..nd {
                    let gd = clip(grad_coeff * self.grad[d]);
                    self.head[jb + d] = self.head[jb + d] + gd * alpha;
                }
            }
            self.schedule.fire_negatives(i, n_neg);
        }
    }
}

////////////////////
// Inverse kernel //
////////////////////

/// SGD kernel for inverse transforms
///
/// Optimises points back towards a reference set: attraction is weighted by
/// the precomputed per-edge membership `weight` and the partner vertex's
/// `sigma`; repulsion derives a hypothetical membership from the partner's
/// `sigma`/`rho` local geometry. Sequential only.
pub struct InverseKernel<'a, T> {
    gamma: T,
    head: Vec<T>,
    tail: Option<Vec<T>>,
    n_dim: usize,
    n_tail_vertices: usize,
    edge_head: Vec<usize>,
    edge_tail: Vec<usize>,
    schedule: EdgeSchedule<T>,
    rng: TauRng,
    move_other: bool,
    metric: &'a dyn OutputMetric<T>,
    weight: Vec<T>,
    sigmas: Vec<T>,
    rhos: Vec<T>,
    grad: Vec<T>,
}

impl<'a, T> InverseKernel<'a, T>
where
    T: Float + FromPrimitive,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        gamma: T,
        head: Vec<T>,
        tail: Option<Vec<T>>,
        n_dim: usize,
        edge_head: Vec<usize>,
        edge_tail: Vec<usize>,
        schedule: EdgeSchedule<T>,
        rng: TauRng,
        move_other: bool,
        metric: &'a dyn OutputMetric<T>,
        weight: Vec<T>,
        sigmas: Vec<T>,
        rhos: Vec<T>,
    ) -> Self {
        let n_tail_vertices = if n_dim == 0 {
            0
        } else {
            tail.as_ref().map_or(head.len(), |t| t.len()) / n_dim
        };
        Self {
            gamma,
            head,
            tail,
            n_dim,
            n_tail_vertices,
            edge_head,
            edge_tail,
            schedule,
            rng,
            move_other,
            metric,
            weight,
            sigmas,
            rhos,
            grad: vec![T::zero(); n_dim],
        }
    }

    pub(crate) fn head_flat(&self) -> &[T] {
        &self.head
    }

    pub(crate) fn tail_flat(&self) -> Option<&[T]> {
        self.tail.as_deref()
    }

    #[inline]
    fn tail_add(&mut self, idx: usize, delta: T) {
        match self.tail.as_mut() {
            Some(t) => t[idx] = t[idx] + delta,
            None => self.head[idx] = self.head[idx] + delta,
        }
    }
}

impl<T> EpochKernel<T> for InverseKernel<'_, T>
where
    T: Float + FromPrimitive,
{
    fn advance(&mut self, epoch: usize, alpha: T) {
        let nd = self.n_dim;
        let one = T::one();
        let eps6 = T::from_f64(1e-6).unwrap();
        // 1-based epoch count: a period-1 edge fires from the first epoch
        let n = T::from_usize(epoch + 1).unwrap();

        for i in 0..self.schedule.len() {
            if !self.schedule.due(i, n) {
                continue;
            }

            let j = self.edge_head[i];
            let k = self.edge_tail[i];
            let jb = j * nd;
            let kb = k * nd;

            {
                let tail = self.tail.as_deref().unwrap_or(&self.head);
                self.metric.distance_gradient(
                    &self.head[jb..jb + nd],
                    &tail[kb..kb + nd],
                    &mut self.grad,
                );
            }

            let w_l = self.weight[i];
            let grad_coeff = -(one / (w_l * self.sigmas[k] + eps6));

            for d in 0..nd {
                let gd = clip(grad_coeff * self.grad[d]);
                self.head[jb + d] = self.head[jb + d] + gd * alpha;
                if self.move_other {
                    self.tail_add(kb + d, -gd * alpha);
                }
            }

            self.schedule.fire(i);

            let n_neg = self.schedule.negative_samples(i, n);
            for _ in 0..n_neg {
                let t = self.rng.next_below(self.n_tail_vertices);
                let tb = t * nd;

                let dist = {
                    let tail = self.tail.as_deref().unwrap_or(&self.head);
                    self.metric.distance_gradient(
                        &self.head[jb..jb + nd],
                        &tail[tb..tb + nd],
                        &mut self.grad,
                    )
                };

                // the sampled edge does not exist: derive a hypothetical
                // membership from the partner's local geometry
                let w_h = (-(dist - self.rhos[t]).max(eps6) / (self.sigmas[t] + eps6)).exp();
                let grad_coeff = self.gamma * w_h / ((one - w_h) * self.sigmas[t] + eps6);

                for d in 0..nd {
                    let gd = clip(grad_coeff * self.grad[d]);
                    self.head[jb + d] = self.head[jb + d] + gd * alpha;
                }
            }
            self.schedule.fire_negatives(i, n_neg);
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_metric {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euclidean_output_distance_and_gradient() {
        let x = vec![3.0_f64, 4.0];
        let y = vec![0.0, 0.0];
        let mut grad = vec![0.0; 2];
        let dist = EuclideanOutput.distance_gradient(&x, &y, &mut grad);
        assert_relative_eq!(dist, 5.0, epsilon = 1e-12);
        assert_relative_eq!(grad[0], 3.0 / (1e-6 + 5.0), epsilon = 1e-12);
        assert_relative_eq!(grad[1], 4.0 / (1e-6 + 5.0), epsilon = 1e-12);
    }

    #[test]
    fn test_euclidean_output_coincident_points() {
        let x = vec![1.0_f64, 1.0];
        let mut grad = vec![9.9; 2];
        let dist = EuclideanOutput.distance_gradient(&x, &x.clone(), &mut grad);
        assert_relative_eq!(dist, 0.0, epsilon = 1e-12);
        assert_relative_eq!(grad[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_generic_attraction_shrinks_edge() {
        let mut kernel = GenericKernel::new(
            1.0_f64,
            1.0,
            1.0,
            vec![0.0, 0.0, 2.0, 0.0],
            None,
            2,
            vec![0],
            vec![1],
            EdgeSchedule::new(&[1.0], 0.0),
            TauRng::from_seed(42),
            true,
            &EuclideanOutput,
        );
        let before = {
            let h = kernel.head_flat();
            (h[2] - h[0]).abs()
        };
        kernel.advance(0, 1.0);
        let after = {
            let h = kernel.head_flat();
            (h[2] - h[0]).abs()
        };
        assert!(after < before);
    }

    #[test]
    fn test_generic_coincident_points_stay() {
        let head = vec![1.0_f64, 1.0, 1.0, 1.0];
        let mut kernel = GenericKernel::new(
            1.0_f64,
            1.0,
            1.0,
            head.clone(),
            None,
            2,
            vec![0],
            vec![1],
            EdgeSchedule::new(&[1.0], 0.0),
            TauRng::from_seed(42),
            true,
            &EuclideanOutput,
        );
        kernel.advance(1, 1.0);
        // w_l = 1 at zero distance gives a zero attractive coefficient
        assert_eq!(kernel.head_flat(), head.as_slice());
    }

    #[test]
    fn test_inverse_attraction_moves_head_only() {
        let mut kernel = InverseKernel::new(
            1.0_f64,
            vec![0.0, 0.0],
            Some(vec![2.0, 0.0]),
            2,
            vec![0],
            vec![0],
            EdgeSchedule::new(&[1.0], 0.0),
            TauRng::from_seed(42),
            false,
            &EuclideanOutput,
            vec![1.0],
            vec![1.0],
            vec![0.0],
        );
        kernel.advance(0, 1.0);
        let h = kernel.head_flat();
        // grad_coeff ~ -1, metric gradient ~ -1 in x: the point moves toward
        // the reference
        assert!(h[0] > 0.0);
        assert_relative_eq!(h[1], 0.0, epsilon = 1e-12);
    }
}
