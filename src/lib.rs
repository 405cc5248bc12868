#![allow(clippy::needless_range_loop)] // I like loops ... !

//! Force-directed layout optimisation by negative-sampling stochastic
//! gradient descent.
//!
//! Given an initial low-dimensional embedding and a weighted edge set, the
//! drivers in this crate anneal the embedding so that edge-connected points
//! attract and randomly sampled non-neighbours repel. Edge membership
//! strength controls how often an edge is sampled per epoch via
//! [`schedule::EdgeSchedule`]; four kernel strategies cover the squared
//! Euclidean output space (sequential and thread-parallel), arbitrary
//! differentiable output metrics, inverse transforms against a fixed
//! reference set, and jointly optimised embedding sequences.

pub mod constraints;
pub mod densmap;
pub mod error;
pub mod kernels;
pub mod math;
pub mod rng;
pub mod schedule;

use num_traits::{Float, FromPrimitive};
use thousands::Separable;

use crate::constraints::ConstraintSet;
use crate::densmap::{DensMapParams, DensityBundle};
use crate::error::LayoutError;
use crate::kernels::aligned::AlignedKernel;
use crate::kernels::euclidean::EuclideanKernel;
use crate::kernels::metric::{GenericKernel, InverseKernel, OutputMetric};
use crate::kernels::{copy_back, flatten, EpochKernel, OptimConstants};
use crate::rng::TauRng;
use crate::schedule::EdgeSchedule;

pub use crate::constraints::PinMask;
pub use crate::kernels::metric::EuclideanOutput;

////////////////
// Parameters //
////////////////

/// Run parameters shared by the layout drivers
///
/// ### Fields
///
/// * `a` / `b` - Embedding curve parameters; fit from `min_dist`/`spread`
///   via [`LayoutParams::from_min_dist_spread`] or take the 2D defaults.
/// * `gamma` - Repulsion strength applied to negative samples.
/// * `initial_alpha` - Learning rate before annealing; decays linearly to 0
///   over the run.
/// * `negative_sample_rate` - Negative samples drawn per positive sample.
/// * `n_epochs` - Number of optimisation epochs. 0 leaves the input
///   untouched.
/// * `move_other` - Whether an attractive update also moves the edge's
///   other endpoint (true when embedding a set against itself).
/// * `parallel` - Use the thread-parallel Euclidean edge loop. Parallel
///   runs trade bit-reproducibility for speed.
/// * `verbose` - Print progress every 50 epochs.
#[derive(Clone, Debug)]
pub struct LayoutParams<T> {
    pub a: T,
    pub b: T,
    pub gamma: T,
    pub initial_alpha: T,
    pub negative_sample_rate: T,
    pub n_epochs: usize,
    pub move_other: bool,
    pub parallel: bool,
    pub verbose: bool,
}

impl<T> LayoutParams<T>
where
    T: Float + FromPrimitive,
{
    /// Default parameters for 2D embedding
    pub fn default_2d() -> Self {
        Self {
            a: T::from_f64(1.576943460405378).unwrap(),
            b: T::from_f64(0.8950608781227859).unwrap(),
            gamma: T::one(),
            initial_alpha: T::one(),
            negative_sample_rate: T::from_f64(5.0).unwrap(),
            n_epochs: 500,
            move_other: true,
            parallel: false,
            verbose: false,
        }
    }

    /// Params from specified minimum distance and spread
    ///
    /// Fits the embedding curve `f(x) = 1 / (1 + a * x^(2b))` such that
    /// `f(min_dist) ca. 1.0` and the tail decays like
    /// `exp(-(x - min_dist) / spread)`.
    ///
    /// ### Params
    ///
    /// * `min_dist` - Distance below which points are considered "at" each
    ///   other.
    /// * `spread` - Effective scale of embedded points.
    pub fn from_min_dist_spread(min_dist: T, spread: T) -> Self {
        let (a, b) = Self::fit_curve(min_dist, spread);
        Self {
            a,
            b,
            ..Self::default_2d()
        }
    }

    /// Gradient-descent fit of the curve parameters
    fn fit_curve(min_dist: T, spread: T) -> (T, T) {
        let n_iter = 300;
        let n_points = 300;

        let three = T::from_f64(3.0).unwrap();
        let max_x = spread * three;
        let step = max_x / T::from_usize(n_points - 1).unwrap();

        let mut xv = Vec::with_capacity(n_points);
        let mut yv = Vec::with_capacity(n_points);
        for i in 0..n_points {
            let x = step * T::from_usize(i).unwrap();
            let y = if x < min_dist {
                T::one()
            } else {
                (-(x - min_dist) / spread).exp()
            };
            xv.push(x);
            yv.push(y);
        }

        let mut a = T::one();
        let mut b = T::one();
        let two = T::from_f64(2.0).unwrap();
        let n_points_t = T::from_usize(n_points).unwrap();

        for _ in 0..n_iter {
            let mut grad_a = T::zero();
            let mut grad_b = T::zero();

            for i in 0..n_points {
                let x = xv[i];
                if x <= T::zero() {
                    continue;
                }

                let x_2b = x.powf(two * b);
                let denom = T::one() + a * x_2b;
                let err = denom.recip() - yv[i];

                grad_a = grad_a + err * (-x_2b / (denom * denom));
                grad_b = grad_b + err * (-two * a * x_2b * x.ln() / (denom * denom));
            }

            a = a - grad_a / n_points_t;
            b = b - grad_b / n_points_t;

            a = a
                .max(T::from_f64(0.001).unwrap())
                .min(T::from_f64(10.0).unwrap());
            b = b
                .max(T::from_f64(0.1).unwrap())
                .min(T::from_f64(2.0).unwrap());
        }

        (a, b)
    }
}

impl<T> Default for LayoutParams<T>
where
    T: Float + FromPrimitive,
{
    fn default() -> Self {
        LayoutParams::default_2d()
    }
}

/////////////
// Helpers //
/////////////

fn validate_edges<T: Float>(
    head: &[usize],
    tail: &[usize],
    epochs_per_sample: &[T],
    n_head_vertices: usize,
    n_tail_vertices: usize,
) -> Result<(), LayoutError> {
    if head.len() != tail.len() || head.len() != epochs_per_sample.len() {
        return Err(LayoutError::EdgeLengthMismatch {
            head: head.len(),
            tail: tail.len(),
            epochs_per_sample: epochs_per_sample.len(),
        });
    }
    for &j in head {
        if j >= n_head_vertices {
            return Err(LayoutError::VertexOutOfBounds {
                index: j,
                n_vertices: n_head_vertices,
            });
        }
    }
    for &k in tail {
        if k >= n_tail_vertices {
            return Err(LayoutError::VertexOutOfBounds {
                index: k,
                n_vertices: n_tail_vertices,
            });
        }
    }
    Ok(())
}

fn embedding_dims<T: Float>(
    head_embedding: &[Vec<T>],
    tail_embedding: Option<&[Vec<T>]>,
) -> Result<usize, LayoutError> {
    let n_dim = head_embedding.first().map_or(0, |p| p.len());
    if let Some(t) = tail_embedding {
        let tail_dim = t.first().map_or(n_dim, |p| p.len());
        if tail_dim != n_dim {
            return Err(LayoutError::DimMismatch {
                head_dim: n_dim,
                tail_dim,
            });
        }
    }
    Ok(n_dim)
}

/// Run the annealed epoch loop over any kernel
///
/// The learning rate for epoch `n` is `initial_alpha * (1 - n / n_epochs)`,
/// so the first epoch runs at full rate and the rate approaches zero at the
/// end of the run. The optional `progress` callback fires once per completed
/// epoch and must not be used to mutate the layout.
fn run_epochs<T, K>(
    kernel: &mut K,
    n_epochs: usize,
    initial_alpha: T,
    verbose: bool,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) where
    T: Float + FromPrimitive,
    K: EpochKernel<T>,
{
    let total = T::from_usize(n_epochs).unwrap();
    for epoch in 0..n_epochs {
        let alpha = initial_alpha * (T::one() - T::from_usize(epoch).unwrap() / total);
        kernel.advance(epoch, alpha);

        if verbose && ((epoch + 1) % 50 == 0 || epoch + 1 == n_epochs) {
            println!(" Completed epoch {}/{}", epoch + 1, n_epochs);
        }
        if let Some(cb) = progress {
            cb(epoch);
        }
    }
}

/////////////
// Drivers //
/////////////

/// Optimise a layout under the squared-Euclidean output metric
///
/// The workhorse driver: supports constraint hooks, density augmentation
/// and the thread-parallel edge loop. `tail_embedding` is `None` when the
/// embedding is optimised against itself (the usual case) and `Some` when
/// embedding new points against a fixed reference set.
///
/// ### Params
///
/// * `head_embedding` - Initial embedding, mutated in place.
/// * `tail_embedding` - Optional distinct reference embedding.
/// * `head` / `tail` - Edge endpoint indices (into head / tail embedding).
/// * `epochs_per_sample` - Per-edge sampling period, inversely related to
///   membership strength.
/// * `params` - Run parameters.
/// * `constraints` - Pinning / projection hooks; pass
///   `ConstraintSet::new()` for an unconstrained run.
/// * `densmap` - Optional density-preservation bundle.
/// * `seed` - PRNG seed for negative sampling.
/// * `progress` - Optional per-epoch observational callback.
///
/// ### Returns
///
/// `Ok(())` once the embedding has been optimised in place, or a fatal
/// configuration error detected before the first epoch.
#[allow(clippy::too_many_arguments)]
pub fn optimise_layout_euclidean<T>(
    head_embedding: &mut [Vec<T>],
    mut tail_embedding: Option<&mut [Vec<T>]>,
    head: &[usize],
    tail: &[usize],
    epochs_per_sample: &[T],
    params: &LayoutParams<T>,
    constraints: ConstraintSet<T>,
    densmap: Option<DensMapParams<T>>,
    seed: u64,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) -> Result<(), LayoutError>
where
    T: Float + FromPrimitive + Send + Sync + 'static,
{
    let n_dim = embedding_dims(head_embedding, tail_embedding.as_deref())?;
    let n_head = head_embedding.len();
    let n_tail = tail_embedding.as_deref().map_or(n_head, |t| t.len());

    validate_edges(head, tail, epochs_per_sample, n_head, n_tail)?;
    if let Some(d) = &densmap {
        d.validate(epochs_per_sample.len(), n_tail)?;
    }
    if params.n_epochs == 0 {
        return Ok(());
    }

    if params.verbose {
        println!(
            "Optimising layout: {} vertices, {} edges, {} epochs",
            n_head.separate_with_underscores(),
            head.len().separate_with_underscores(),
            params.n_epochs
        );
    }

    let flat_head = flatten(head_embedding);
    let flat_tail = tail_embedding.as_deref().map(flatten);
    let density = densmap.map(|p| DensityBundle::new(p, n_tail));

    let mut kernel = EuclideanKernel::new(
        OptimConstants::new(params.a, params.b, params.gamma),
        flat_head,
        flat_tail,
        n_dim,
        head.to_vec(),
        tail.to_vec(),
        EdgeSchedule::new(epochs_per_sample, params.negative_sample_rate),
        TauRng::from_seed(seed),
        params.move_other,
        constraints,
        density,
        params.n_epochs,
        params.parallel,
    );

    run_epochs(
        &mut kernel,
        params.n_epochs,
        params.initial_alpha,
        params.verbose,
        progress,
    );
    kernel.finish();

    copy_back(kernel.head_flat(), head_embedding);
    if let (Some(t), Some(tf)) = (tail_embedding.as_deref_mut(), kernel.tail_flat()) {
        copy_back(tf, t);
    }
    Ok(())
}

/// Optimise a layout under an arbitrary differentiable output metric
///
/// Sequential only; no constraint or density support. See
/// [`optimise_layout_euclidean`] for the shared parameters. The stock
/// [`EuclideanOutput`] metric reproduces Euclidean behaviour through the
/// generic path.
#[allow(clippy::too_many_arguments)]
pub fn optimise_layout_generic<T>(
    head_embedding: &mut [Vec<T>],
    mut tail_embedding: Option<&mut [Vec<T>]>,
    head: &[usize],
    tail: &[usize],
    epochs_per_sample: &[T],
    params: &LayoutParams<T>,
    metric: &dyn OutputMetric<T>,
    seed: u64,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) -> Result<(), LayoutError>
where
    T: Float + FromPrimitive,
{
    let n_dim = embedding_dims(head_embedding, tail_embedding.as_deref())?;
    let n_head = head_embedding.len();
    let n_tail = tail_embedding.as_deref().map_or(n_head, |t| t.len());

    validate_edges(head, tail, epochs_per_sample, n_head, n_tail)?;
    if params.n_epochs == 0 {
        return Ok(());
    }

    if params.verbose {
        println!(
            "Optimising layout (generic metric): {} vertices, {} edges, {} epochs",
            n_head.separate_with_underscores(),
            head.len().separate_with_underscores(),
            params.n_epochs
        );
    }

    let mut kernel = GenericKernel::new(
        params.a,
        params.b,
        params.gamma,
        flatten(head_embedding),
        tail_embedding.as_deref().map(flatten),
        n_dim,
        head.to_vec(),
        tail.to_vec(),
        EdgeSchedule::new(epochs_per_sample, params.negative_sample_rate),
        TauRng::from_seed(seed),
        params.move_other,
        metric,
    );

    run_epochs(
        &mut kernel,
        params.n_epochs,
        params.initial_alpha,
        params.verbose,
        progress,
    );

    copy_back(kernel.head_flat(), head_embedding);
    if let (Some(t), Some(tf)) = (tail_embedding.as_deref_mut(), kernel.tail_flat()) {
        copy_back(tf, t);
    }
    Ok(())
}

/// Optimise points back towards a reference embedding (inverse transform)
///
/// `weight` is the precomputed membership strength per edge; `sigmas` and
/// `rhos` describe the local geometry around each reference vertex and
/// shape both attraction and the hypothetical repulsion of non-edges.
#[allow(clippy::too_many_arguments)]
pub fn optimise_layout_inverse<T>(
    head_embedding: &mut [Vec<T>],
    mut tail_embedding: Option<&mut [Vec<T>]>,
    head: &[usize],
    tail: &[usize],
    epochs_per_sample: &[T],
    weight: &[T],
    sigmas: &[T],
    rhos: &[T],
    params: &LayoutParams<T>,
    metric: &dyn OutputMetric<T>,
    seed: u64,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) -> Result<(), LayoutError>
where
    T: Float + FromPrimitive,
{
    let n_dim = embedding_dims(head_embedding, tail_embedding.as_deref())?;
    let n_head = head_embedding.len();
    let n_tail = tail_embedding.as_deref().map_or(n_head, |t| t.len());

    validate_edges(head, tail, epochs_per_sample, n_head, n_tail)?;
    if weight.len() != head.len() {
        return Err(LayoutError::ArrayLength {
            name: "weight",
            got: weight.len(),
            expected: head.len(),
        });
    }
    if sigmas.len() != n_tail {
        return Err(LayoutError::ArrayLength {
            name: "sigmas",
            got: sigmas.len(),
            expected: n_tail,
        });
    }
    if rhos.len() != n_tail {
        return Err(LayoutError::ArrayLength {
            name: "rhos",
            got: rhos.len(),
            expected: n_tail,
        });
    }
    if params.n_epochs == 0 {
        return Ok(());
    }

    if params.verbose {
        println!(
            "Optimising inverse layout: {} vertices, {} edges, {} epochs",
            n_head.separate_with_underscores(),
            head.len().separate_with_underscores(),
            params.n_epochs
        );
    }

    let mut kernel = InverseKernel::new(
        params.gamma,
        flatten(head_embedding),
        tail_embedding.as_deref().map(flatten),
        n_dim,
        head.to_vec(),
        tail.to_vec(),
        EdgeSchedule::new(epochs_per_sample, params.negative_sample_rate),
        TauRng::from_seed(seed),
        params.move_other,
        metric,
        weight.to_vec(),
        sigmas.to_vec(),
        rhos.to_vec(),
    );

    run_epochs(
        &mut kernel,
        params.n_epochs,
        params.initial_alpha,
        params.verbose,
        progress,
    );

    copy_back(kernel.head_flat(), head_embedding);
    if let (Some(t), Some(tf)) = (tail_embedding.as_deref_mut(), kernel.tail_flat()) {
        copy_back(tf, t);
    }
    Ok(())
}

/// Jointly optimise a sequence of related embeddings
///
/// Every member embedding is optimised against itself over its own edge
/// set, and additionally regularised towards the corresponding points of
/// its neighbours within the relation window. `relations[m][slot][v]` gives
/// the index of vertex `v`'s counterpart in member `m + slot - window_size`
/// (or `-1` for no counterpart); `regularisation_weights` has the same
/// shape and scales the pull per vertex. `lambda` weighs the whole
/// alignment term; 5e-3 is a sensible default.
#[allow(clippy::too_many_arguments)]
pub fn optimise_layout_aligned<T>(
    embeddings: &mut [Vec<Vec<T>>],
    heads: &[Vec<usize>],
    tails: &[Vec<usize>],
    epochs_per_sample: &[Vec<T>],
    relations: &[Vec<Vec<isize>>],
    regularisation_weights: &[Vec<Vec<T>>],
    lambda: T,
    params: &LayoutParams<T>,
    seed: u64,
    progress: Option<&(dyn Fn(usize) + Sync)>,
) -> Result<(), LayoutError>
where
    T: Float + FromPrimitive,
{
    let n_members = embeddings.len();
    for (name, len) in [
        ("heads", heads.len()),
        ("tails", tails.len()),
        ("epochs_per_sample", epochs_per_sample.len()),
        ("relations", relations.len()),
        ("regularisation_weights", regularisation_weights.len()),
    ] {
        if len != n_members {
            return Err(LayoutError::AlignedLengthMismatch {
                embeddings: n_members,
                other: len,
                name,
            });
        }
    }

    let n_dim = embeddings
        .first()
        .and_then(|e| e.first())
        .map_or(0, |p| p.len());
    for member in embeddings.iter() {
        let dim = member.first().map_or(n_dim, |p| p.len());
        if dim != n_dim {
            return Err(LayoutError::DimMismatch {
                head_dim: n_dim,
                tail_dim: dim,
            });
        }
    }

    let width = relations.first().map_or(1, |r| r.len());
    if width % 2 == 0 {
        return Err(LayoutError::RelationWindowShape { width });
    }
    for m in 0..n_members {
        if relations[m].len() != width || regularisation_weights[m].len() != width {
            return Err(LayoutError::RelationWindowShape {
                width: relations[m].len().max(regularisation_weights[m].len()),
            });
        }
        let n_points = embeddings[m].len();
        for slot in 0..width {
            if relations[m][slot].len() != n_points {
                return Err(LayoutError::ArrayLength {
                    name: "relations",
                    got: relations[m][slot].len(),
                    expected: n_points,
                });
            }
            if regularisation_weights[m][slot].len() != n_points {
                return Err(LayoutError::ArrayLength {
                    name: "regularisation_weights",
                    got: regularisation_weights[m][slot].len(),
                    expected: n_points,
                });
            }
        }
        validate_edges(
            &heads[m],
            &tails[m],
            &epochs_per_sample[m],
            embeddings[m].len(),
            embeddings[m].len(),
        )?;
    }
    if params.n_epochs == 0 {
        return Ok(());
    }

    if params.verbose {
        let n_edges: usize = heads.iter().map(|h| h.len()).sum();
        println!(
            "Optimising aligned layouts: {} members, {} edges, {} epochs",
            n_members,
            n_edges.separate_with_underscores(),
            params.n_epochs
        );
    }

    let mut kernel = AlignedKernel::new(
        OptimConstants::new(params.a, params.b, params.gamma),
        embeddings.iter().map(|e| flatten(e)).collect(),
        n_dim,
        heads.to_vec(),
        tails.to_vec(),
        epochs_per_sample
            .iter()
            .map(|eps| EdgeSchedule::new(eps, params.negative_sample_rate))
            .collect(),
        relations.to_vec(),
        regularisation_weights.to_vec(),
        (width - 1) / 2,
        lambda,
        params.move_other,
        TauRng::from_seed(seed),
    );

    run_epochs(
        &mut kernel,
        params.n_epochs,
        params.initial_alpha,
        params.verbose,
        progress,
    );

    for (m, member) in embeddings.iter_mut().enumerate() {
        copy_back(kernel.embedding_flat(m), member);
    }
    Ok(())
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_lib {
    use super::*;

    #[test]
    fn test_fit_curve_stays_in_plausible_region() {
        let params = LayoutParams::<f64>::from_min_dist_spread(0.1, 1.0);
        assert!(params.a > 0.3 && params.a < 5.0, "a = {}", params.a);
        assert!(params.b > 0.3 && params.b < 1.8, "b = {}", params.b);

        // a tighter curve (larger min_dist) must not blow past the clamps
        let wide = LayoutParams::<f64>::from_min_dist_spread(0.5, 1.0);
        assert!(wide.a >= 0.001 && wide.a <= 10.0);
        assert!(wide.b >= 0.1 && wide.b <= 2.0);
    }

    #[test]
    fn test_anneal_schedule() {
        // capture the alphas seen per epoch through a counting kernel
        struct Probe {
            alphas: Vec<f64>,
        }
        impl EpochKernel<f64> for Probe {
            fn advance(&mut self, _epoch: usize, alpha: f64) {
                self.alphas.push(alpha);
            }
        }

        let mut probe = Probe { alphas: Vec::new() };
        run_epochs(&mut probe, 4, 1.0, false, None);
        assert_eq!(probe.alphas, vec![1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn test_edge_length_mismatch_rejected() {
        let mut embd = vec![vec![0.0_f64, 0.0], vec![1.0, 1.0]];
        let err = optimise_layout_euclidean(
            &mut embd,
            None,
            &[0],
            &[1, 0],
            &[1.0],
            &LayoutParams::default_2d(),
            ConstraintSet::new(),
            None,
            42,
            None,
        );
        assert!(matches!(
            err,
            Err(LayoutError::EdgeLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_vertex_out_of_bounds_rejected() {
        let mut embd = vec![vec![0.0_f64, 0.0], vec![1.0, 1.0]];
        let err = optimise_layout_euclidean(
            &mut embd,
            None,
            &[0],
            &[7],
            &[1.0],
            &LayoutParams::default_2d(),
            ConstraintSet::new(),
            None,
            42,
            None,
        );
        assert!(matches!(
            err,
            Err(LayoutError::VertexOutOfBounds {
                index: 7,
                n_vertices: 2
            })
        ));
    }

    #[test]
    fn test_zero_epochs_is_identity() {
        let initial = vec![vec![0.3_f64, -0.2], vec![1.0, 2.0]];
        let mut embd = initial.clone();
        let mut params = LayoutParams::default_2d();
        params.n_epochs = 0;
        optimise_layout_euclidean(
            &mut embd,
            None,
            &[0],
            &[1],
            &[1.0],
            &params,
            ConstraintSet::new(),
            None,
            42,
            None,
        )
        .unwrap();
        assert_eq!(embd, initial);
    }

    #[test]
    fn test_progress_callback_counts_epochs() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut embd = vec![vec![0.0_f64, 0.0], vec![1.0, 0.0]];
        let mut params = LayoutParams::default_2d();
        params.n_epochs = 7;
        let count = AtomicUsize::new(0);
        let bump = |_epoch: usize| {
            count.fetch_add(1, Ordering::Relaxed);
        };
        optimise_layout_euclidean(
            &mut embd,
            None,
            &[0],
            &[1],
            &[1.0],
            &params,
            ConstraintSet::new(),
            None,
            42,
            Some(&bump),
        )
        .unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 7);
    }
}
