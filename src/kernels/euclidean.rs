use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;
use std::slice;

use super::{EpochKernel, OptimConstants};
use crate::constraints::ConstraintSet;
use crate::densmap::{DensityBundle, DensityState};
use crate::math::{clip, fast_pow};
use crate::rng::TauRng;
use crate::schedule::EdgeSchedule;

//////////////////////
// Euclidean kernel //
//////////////////////

// Shared-buffer access for the edge loop. The parallel path lets worker
// threads write into the embedding without synchronisation: concurrent
// updates to the same point may interleave, which is a tolerated race (the
// per-step displacement is bounded by the gradient clip, and each edge index
// is visited by exactly one worker so the schedule arrays stay disjoint).
// The sequential path uses the same accessors with a single caller.

#[inline(always)]
unsafe fn read_at<T: Copy>(addr: usize, idx: usize) -> T {
    *(addr as *const T).add(idx)
}

#[inline(always)]
unsafe fn write_at<T>(addr: usize, idx: usize, val: T) {
    *(addr as *mut T).add(idx) = val;
}

#[inline(always)]
unsafe fn row_at_mut<'a, T>(addr: usize, base: usize, n_dim: usize) -> &'a mut [T] {
    slice::from_raw_parts_mut((addr as *mut T).add(base), n_dim)
}

#[inline(always)]
unsafe fn sq_dist_at<T: Float>(
    a_addr: usize,
    a_base: usize,
    b_addr: usize,
    b_base: usize,
    n_dim: usize,
) -> T {
    let mut sum = T::zero();
    for d in 0..n_dim {
        let diff = read_at::<T>(a_addr, a_base + d) - read_at::<T>(b_addr, b_base + d);
        sum = sum + diff * diff;
    }
    sum
}

/// Apply a prepared (already clipped) gradient to one point
///
/// With gradient hooks registered the hook output is re-clipped before the
/// learning-rate step, matching the hook contract: hooks see the clipped
/// gradient and may rewrite it arbitrarily.
#[inline]
fn apply_update<T>(
    constraints: &ConstraintSet<T>,
    idx: usize,
    row: &mut [T],
    alpha: T,
    grad: &mut [T],
) where
    T: Float + FromPrimitive + Send + Sync + 'static,
{
    if constraints.has_grad_mods() {
        constraints.apply_grad(idx, row, grad);
        for d in 0..row.len() {
            row[d] = row[d] + alpha * clip(grad[d]);
        }
    } else {
        for d in 0..row.len() {
            row[d] = row[d] + alpha * grad[d];
        }
    }
    constraints.apply_pt(idx, row);
}

/// Force-directed SGD over the squared-Euclidean output space
///
/// The workhorse kernel: supports attraction/repulsion with negative
/// sampling, constraint hooks, density augmentation, and an optional
/// thread-parallel edge loop with identical arithmetic to the sequential
/// one. Negative samples move the current point only; the sampled partner
/// stays put.
pub struct EuclideanKernel<T> {
    consts: OptimConstants<T>,
    head: Vec<T>,
    tail: Option<Vec<T>>,
    n_dim: usize,
    n_tail_vertices: usize,
    edge_head: Vec<usize>,
    edge_tail: Vec<usize>,
    schedule: EdgeSchedule<T>,
    rng: TauRng,
    move_other: bool,
    constraints: ConstraintSet<T>,
    density: Option<DensityBundle<T>>,
    n_epochs: usize,
    parallel: bool,
    // one gradient + one counter-gradient buffer per worker
    scratch: Vec<Vec<T>>,
}

impl<T> EuclideanKernel<T>
where
    T: Float + FromPrimitive + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        consts: OptimConstants<T>,
        head: Vec<T>,
        tail: Option<Vec<T>>,
        n_dim: usize,
        edge_head: Vec<usize>,
        edge_tail: Vec<usize>,
        schedule: EdgeSchedule<T>,
        rng: TauRng,
        move_other: bool,
        constraints: ConstraintSet<T>,
        density: Option<DensityBundle<T>>,
        n_epochs: usize,
        parallel: bool,
    ) -> Self {
        let n_tail_vertices = if n_dim == 0 {
            0
        } else {
            tail.as_ref().map_or(head.len(), |t| t.len()) / n_dim
        };
        let workers = if parallel {
            rayon::current_num_threads()
        } else {
            1
        };

        Self {
            consts,
            head,
            tail,
            n_dim,
            n_tail_vertices,
            edge_head,
            edge_tail,
            schedule,
            rng,
            move_other,
            constraints,
            density,
            n_epochs,
            parallel,
            scratch: vec![vec![T::zero(); 2 * n_dim]; workers],
        }
    }

    /// Final head embedding buffer (row-major)
    pub(crate) fn head_flat(&self) -> &[T] {
        &self.head
    }

    /// Final tail buffer when it is distinct storage
    pub(crate) fn tail_flat(&self) -> Option<&[T]> {
        self.tail.as_deref()
    }

    /// End-of-run whole-embedding hooks
    pub(crate) fn finish(&mut self) {
        self.constraints.apply_final_pt(&mut self.head, self.n_dim);
    }
}

impl<T> EpochKernel<T> for EuclideanKernel<T>
where
    T: Float + FromPrimitive + Send + Sync + 'static,
{
    fn advance(&mut self, epoch: usize, alpha: T) {
        let density_active = self
            .density
            .as_ref()
            .map_or(false, |bundle| {
                DensityState::active(&bundle.params, epoch, self.n_epochs)
            });

        if density_active {
            if let Some(bundle) = self.density.as_mut() {
                let tail_ref: &[T] = self.tail.as_deref().unwrap_or(&self.head);
                bundle.state.epoch_init(
                    &self.head,
                    tail_ref,
                    &self.edge_head,
                    &self.edge_tail,
                    self.n_dim,
                    self.consts.a,
                    self.consts.b,
                    &bundle.params,
                );
            }
        }

        let head_addr = self.head.as_mut_ptr() as usize;
        let tail_addr = match self.tail.as_mut() {
            Some(t) => t.as_mut_ptr() as usize,
            None => head_addr,
        };
        let next_sample_addr = self.schedule.epoch_of_next_sample.as_mut_ptr() as usize;
        let next_neg_addr = self.schedule.epoch_of_next_negative_sample.as_mut_ptr() as usize;

        let eps = &self.schedule.epochs_per_sample;
        let eps_neg = &self.schedule.epochs_per_negative_sample;
        let edge_head = &self.edge_head;
        let edge_tail = &self.edge_tail;
        let rng = &self.rng;
        let constraints = &self.constraints;
        let density = self.density.as_ref();
        let consts = self.consts;
        let move_other = self.move_other;
        let n_dim = self.n_dim;
        let n_tail_vertices = self.n_tail_vertices;
        let n_edges = edge_head.len();

        let one = T::one();
        let two = T::from_f64(2.0).unwrap();
        let clip_val = T::from_f64(4.0).unwrap();
        let neg_offset = T::from_f64(0.001).unwrap();
        // 1-based epoch count for the schedule: an edge with a sampling
        // period of 1 fires every epoch, including the first
        let n = T::from_usize(epoch + 1).unwrap();

        let process_edge = |i: usize, grad: &mut [T], other_grad: &mut [T]| unsafe {
            if read_at::<T>(next_sample_addr, i) > n {
                return;
            }

            let j = edge_head[i];
            let k = edge_tail[i];
            let jb = j * n_dim;
            let kb = k * n_dim;

            let dist_squared = sq_dist_at::<T>(head_addr, jb, tail_addr, kb, n_dim);

            let mut grad_coeff = if dist_squared > T::zero() {
                let dist_b =
                    fast_pow(dist_squared, consts.b, consts.b_is_one, consts.b_is_half);
                (-consts.two_a_b * dist_b) / (dist_squared * (consts.a * dist_b + one))
            } else {
                T::zero()
            };

            if density_active && dist_squared > T::zero() {
                if let Some(bundle) = density {
                    grad_coeff = grad_coeff
                        + two
                            * bundle.state.grad_cor_coeff(
                                &bundle.params,
                                i,
                                j,
                                k,
                                dist_squared,
                                consts.a,
                                consts.b,
                            );
                }
            }

            for d in 0..n_dim {
                let diff = read_at::<T>(head_addr, jb + d) - read_at::<T>(tail_addr, kb + d);
                let gd = clip(grad_coeff * diff);
                grad[d] = gd;
                other_grad[d] = -gd;
            }

            apply_update(constraints, j, row_at_mut(head_addr, jb, n_dim), alpha, grad);
            if move_other {
                apply_update(
                    constraints,
                    k,
                    row_at_mut(tail_addr, kb, n_dim),
                    alpha,
                    other_grad,
                );
            }

            write_at::<T>(next_sample_addr, i, read_at::<T>(next_sample_addr, i) + eps[i]);

            let n_neg = if eps_neg[i] > T::zero() {
                ((n - read_at::<T>(next_neg_addr, i)) / eps_neg[i])
                    .floor()
                    .to_usize()
                    .unwrap_or(0)
            } else {
                0
            };

            for _ in 0..n_neg {
                let t = rng.next_below(n_tail_vertices);
                let tb = t * n_dim;

                let dist_squared = sq_dist_at::<T>(head_addr, jb, tail_addr, tb, n_dim);

                let grad_coeff = if dist_squared > T::zero() {
                    let dist_b =
                        fast_pow(dist_squared, consts.b, consts.b_is_one, consts.b_is_half);
                    consts.two_gamma_b
                        / ((neg_offset + dist_squared) * (consts.a * dist_b + one))
                } else if j == t {
                    // sampled itself at zero distance: nothing to repel
                    continue;
                } else {
                    T::zero()
                };

                if grad_coeff > T::zero() {
                    for d in 0..n_dim {
                        let diff =
                            read_at::<T>(head_addr, jb + d) - read_at::<T>(tail_addr, tb + d);
                        grad[d] = clip(grad_coeff * diff);
                    }
                } else {
                    // coincident non-identical points get a fixed push apart
                    for d in 0..n_dim {
                        grad[d] = clip_val;
                    }
                }

                apply_update(constraints, j, row_at_mut(head_addr, jb, n_dim), alpha, grad);
            }

            if n_neg > 0 {
                write_at::<T>(
                    next_neg_addr,
                    i,
                    read_at::<T>(next_neg_addr, i)
                        + T::from_usize(n_neg).unwrap() * eps_neg[i],
                );
            }
        };

        if self.parallel {
            let scratch_addr = self.scratch.as_mut_ptr() as usize;
            (0..n_edges).into_par_iter().for_each(|i| {
                let worker = rayon::current_thread_index().unwrap_or(0);
                let buf = unsafe { &mut *(scratch_addr as *mut Vec<T>).add(worker) };
                let (grad, other_grad) = buf.split_at_mut(n_dim);
                process_edge(i, grad, other_grad);
            });
        } else {
            let scratch_addr = self.scratch.as_mut_ptr() as usize;
            let buf = unsafe { &mut *(scratch_addr as *mut Vec<T>) };
            for i in 0..n_edges {
                let (grad, other_grad) = buf.split_at_mut(n_dim);
                process_edge(i, grad, other_grad);
            }
        }

        self.constraints.apply_epoch_pt(&mut self.head, self.n_dim);
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_euclidean {
    use super::*;

    fn kernel_for(
        head: Vec<f64>,
        edges: (Vec<usize>, Vec<usize>),
        eps: Vec<f64>,
        move_other: bool,
    ) -> EuclideanKernel<f64> {
        let schedule = EdgeSchedule::new(&eps, 0.0);
        EuclideanKernel::new(
            OptimConstants::new(1.0, 1.0, 1.0),
            head,
            None,
            2,
            edges.0,
            edges.1,
            schedule,
            TauRng::from_seed(42),
            move_other,
            ConstraintSet::new(),
            None,
            10,
            false,
        )
    }

    #[test]
    fn test_attraction_shrinks_edge() {
        let head = vec![0.0, 0.0, 2.0, 0.0];
        let mut kernel = kernel_for(head, (vec![0], vec![1]), vec![1.0], true);

        let before = {
            let h = kernel.head_flat();
            (h[2] - h[0]).abs()
        };
        kernel.advance(1, 1.0);
        let after = {
            let h = kernel.head_flat();
            (h[2] - h[0]).abs()
        };
        assert!(after < before);
    }

    #[test]
    fn test_edge_fires_on_first_epoch() {
        // a sampling period of 1 must fire at epoch 0 of a run
        let head = vec![0.0, 0.0, 2.0, 0.0];
        let mut kernel = kernel_for(head.clone(), (vec![0], vec![1]), vec![1.0], true);
        kernel.advance(0, 1.0);
        assert_ne!(kernel.head_flat(), head.as_slice());
        let h = kernel.head_flat();
        assert!((h[2] - h[0]).abs() < 2.0);
    }

    #[test]
    fn test_coincident_points_do_not_move() {
        let head = vec![1.0, 1.0, 1.0, 1.0];
        let mut kernel = kernel_for(head.clone(), (vec![0], vec![1]), vec![1.0], true);
        kernel.advance(1, 1.0);
        assert_eq!(kernel.head_flat(), head.as_slice());
    }

    #[test]
    fn test_edge_not_due_is_skipped() {
        let head = vec![0.0, 0.0, 2.0, 0.0];
        // epochs_per_sample of 5: first firing epoch is 5
        let mut kernel = kernel_for(head.clone(), (vec![0], vec![1]), vec![5.0], true);
        kernel.advance(1, 1.0);
        assert_eq!(kernel.head_flat(), head.as_slice());
    }

    #[test]
    fn test_move_other_false_leaves_partner() {
        let head = vec![0.0, 0.0, 2.0, 0.0];
        let mut kernel = kernel_for(head, (vec![0], vec![1]), vec![1.0], false);
        kernel.advance(1, 1.0);
        let h = kernel.head_flat();
        assert_eq!(&h[2..4], &[2.0, 0.0]);
        assert!(h[0] > 0.0);
    }

    #[test]
    fn test_negative_samples_repel() {
        // Two close points, one edge, heavy negative sampling against the
        // only possible partner being either point.
        let head = vec![0.0, 0.0, 0.5, 0.0];
        let schedule = EdgeSchedule::new(&[1.0], 5.0);
        let mut kernel = EuclideanKernel::new(
            OptimConstants::new(1.0, 1.0, 1.0),
            head,
            None,
            2,
            vec![0],
            vec![1],
            schedule,
            TauRng::from_seed(7),
            false,
            ConstraintSet::new(),
            None,
            10,
            false,
        );
        for epoch in 1..10 {
            kernel.advance(epoch, 0.1);
        }
        let h = kernel.head_flat();
        assert!(h.iter().all(|v| v.is_finite()));
    }
}
