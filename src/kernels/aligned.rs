use num_traits::{Float, FromPrimitive};

use super::{EpochKernel, OptimConstants};
use crate::math::{clip, fast_pow, squared_dist_flat};
use crate::rng::TauRng;
use crate::schedule::EdgeSchedule;

////////////////////
// Aligned kernel //
////////////////////

/// Joint SGD over a sequence of related embeddings
///
/// Each member embedding gets the standard Euclidean attraction/repulsion
/// over its own edge set, plus a regularisation pull towards the
/// corresponding point in neighbouring embeddings within `window_size` of
/// it. Correspondence comes from the relation tables (`-1` marks a vertex
/// with no counterpart); the pull decays exponentially with window offset
/// and is clipped per term before it is folded into the gradient, which is
/// clipped again on application. Member embeddings are their own reference
/// set (head aliases tail per member). The per-epoch visit order of the
/// members is reshuffled from the run PRNG so no member systematically
/// sees its neighbours' pre-update positions.
pub struct AlignedKernel<T> {
    consts: OptimConstants<T>,
    embeddings: Vec<Vec<T>>,
    n_dim: usize,
    edge_heads: Vec<Vec<usize>>,
    edge_tails: Vec<Vec<usize>>,
    schedules: Vec<EdgeSchedule<T>>,
    relations: Vec<Vec<Vec<isize>>>,
    reg_weights: Vec<Vec<Vec<T>>>,
    window_size: usize,
    lambda: T,
    move_other: bool,
    rng: TauRng,
    order: Vec<usize>,
}

impl<T> AlignedKernel<T>
where
    T: Float + FromPrimitive,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        consts: OptimConstants<T>,
        embeddings: Vec<Vec<T>>,
        n_dim: usize,
        edge_heads: Vec<Vec<usize>>,
        edge_tails: Vec<Vec<usize>>,
        schedules: Vec<EdgeSchedule<T>>,
        relations: Vec<Vec<Vec<isize>>>,
        reg_weights: Vec<Vec<Vec<T>>>,
        window_size: usize,
        lambda: T,
        move_other: bool,
        rng: TauRng,
    ) -> Self {
        let order = (0..embeddings.len()).collect();
        Self {
            consts,
            embeddings,
            n_dim,
            edge_heads,
            edge_tails,
            schedules,
            relations,
            reg_weights,
            window_size,
            lambda,
            move_other,
            rng,
            order,
        }
    }

    pub(crate) fn embedding_flat(&self, m: usize) -> &[T] {
        &self.embeddings[m]
    }

    /// Fisher-Yates over the member visit order, driven by the run PRNG
    fn shuffle_order(&mut self) {
        for idx in (1..self.order.len()).rev() {
            let swap_with = self.rng.next_below(idx + 1);
            self.order.swap(idx, swap_with);
        }
    }

    /// Sum of clipped alignment pulls on coordinate `d` of `vertex` in
    /// member `m`
    fn alignment_correction(&self, m: usize, vertex: usize, d: usize, cur_val: T) -> T {
        let n_members = self.embeddings.len() as isize;
        let w = self.window_size as isize;
        let mut correction = T::zero();

        for offset in -w..=w {
            if offset == 0 {
                continue;
            }
            let neighbour = m as isize + offset;
            if neighbour < 0 || neighbour >= n_members {
                continue;
            }

            let slot = (offset + w) as usize;
            let identified = self.relations[m][slot][vertex];
            if identified < 0 {
                continue;
            }

            let decay =
                T::from_f64((-((offset.unsigned_abs() as f64) - 1.0)).exp()).unwrap();
            let neighbour_val =
                self.embeddings[neighbour as usize][identified as usize * self.n_dim + d];
            correction = correction
                + clip(
                    self.lambda
                        * decay
                        * self.reg_weights[m][slot][vertex]
                        * (cur_val - neighbour_val),
                );
        }
        correction
    }
}

impl<T> EpochKernel<T> for AlignedKernel<T>
where
    T: Float + FromPrimitive,
{
    fn advance(&mut self, epoch: usize, alpha: T) {
        let nd = self.n_dim;
        let one = T::one();
        let clip_val = T::from_f64(4.0).unwrap();
        let neg_offset = T::from_f64(0.001).unwrap();
        // 1-based epoch count: a period-1 edge fires from the first epoch
        let n = T::from_usize(epoch + 1).unwrap();

        self.shuffle_order();
        let max_edges = self.schedules.iter().map(|s| s.len()).max().unwrap_or(0);

        for i in 0..max_edges {
            for order_idx in 0..self.order.len() {
                let m = self.order[order_idx];
                if i >= self.schedules[m].len() || !self.schedules[m].due(i, n) {
                    continue;
                }

                let j = self.edge_heads[m][i];
                let k = self.edge_tails[m][i];
                let jb = j * nd;
                let kb = k * nd;

                let dist_squared = squared_dist_flat(&self.embeddings[m], j, k, nd);
                let grad_coeff = if dist_squared > T::zero() {
                    let dist_b = fast_pow(
                        dist_squared,
                        self.consts.b,
                        self.consts.b_is_one,
                        self.consts.b_is_half,
                    );
                    (-self.consts.two_a_b * dist_b)
                        / (dist_squared * (self.consts.a * dist_b + one))
                } else {
                    T::zero()
                };

                for d in 0..nd {
                    let cur = self.embeddings[m][jb + d];
                    let oth = self.embeddings[m][kb + d];

                    let grad_d =
                        clip(grad_coeff * (cur - oth)) - self.alignment_correction(m, j, d, cur);
                    self.embeddings[m][jb + d] = cur + clip(grad_d) * alpha;

                    if self.move_other {
                        // partner sees the just-updated current coordinate
                        let cur_new = self.embeddings[m][jb + d];
                        let other_grad_d = clip(grad_coeff * (oth - cur_new))
                            - self.alignment_correction(m, k, d, oth);
                        self.embeddings[m][kb + d] = oth + clip(other_grad_d) * alpha;
                    }
                }

                self.schedules[m].fire(i);

                let n_neg = self.schedules[m].negative_samples(i, n);
                let n_points = self.embeddings[m].len() / nd;
                for _ in 0..n_neg {
                    let t = self.rng.next_below(n_points);
                    let tb = t * nd;

                    let dist_squared = squared_dist_flat(&self.embeddings[m], j, t, nd);
                    let grad_coeff = if dist_squared > T::zero() {
                        let dist_b = fast_pow(
                            dist_squared,
                            self.consts.b,
                            self.consts.b_is_one,
                            self.consts.b_is_half,
                        );
                        self.consts.two_gamma_b
                            / ((neg_offset + dist_squared) * (self.consts.a * dist_b + one))
                    } else if j == t {
                        continue;
                    } else {
                        T::zero()
                    };

                    for d in 0..nd {
                        let cur = self.embeddings[m][jb + d];
                        let raw = if grad_coeff > T::zero() {
                            clip(grad_coeff * (cur - self.embeddings[m][tb + d]))
                        } else {
                            clip_val
                        };
                        let grad_d = raw - self.alignment_correction(m, j, d, cur);
                        self.embeddings[m][jb + d] = cur + clip(grad_d) * alpha;
                    }
                }
                self.schedules[m].fire_negatives(i, n_neg);
            }
        }
    }
}

///////////
// Tests //
///////////
