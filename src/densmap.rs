use num_traits::{Float, FromPrimitive};

use crate::error::LayoutError;
use crate::math::{dot, fast_pow, mean, squared_dist_pair, variance};

//////////////////////////
// Density augmentation //
//////////////////////////

/// Parameter bundle for the density-preserving (densMAP) objective
///
/// All fields are required together when density augmentation is requested.
///
/// ### Fields
///
/// * `lambda` - Weight of the density correction term; 0 disables it.
/// * `frac` - Fraction of the run (from the end) during which the correction
///   is active, i.e. a late-stage refinement window.
/// * `var_shift` - Additive variance stabiliser for the radius spread.
/// * `mu_sum` - Per-edge membership sums; only their total is used.
/// * `mu` - Per-edge membership strengths.
/// * `r` - Per-vertex target log-radii from the input space.
#[derive(Clone, Debug)]
pub struct DensMapParams<T> {
    pub lambda: T,
    pub frac: T,
    pub var_shift: T,
    pub mu_sum: Vec<T>,
    pub mu: Vec<T>,
    pub r: Vec<T>,
}

impl<T> DensMapParams<T>
where
    T: Float + FromPrimitive,
{
    /// Validate array sizes against the run's edge and vertex counts
    pub fn validate(&self, n_edges: usize, n_vertices: usize) -> Result<(), LayoutError> {
        if self.mu.len() != n_edges {
            return Err(LayoutError::DensMapArrayLength {
                name: "mu",
                got: self.mu.len(),
                expected: n_edges,
            });
        }
        if self.r.len() != n_vertices {
            return Err(LayoutError::DensMapArrayLength {
                name: "r",
                got: self.r.len(),
                expected: n_vertices,
            });
        }
        Ok(())
    }
}

/// Per-run density state, owned by the epoch driver
///
/// `phi_sum` and `re_sum` are rebuilt from scratch (explicitly re-zeroed) at
/// the start of every qualifying epoch; the epoch scalars are refreshed with
/// them.
#[derive(Clone, Debug)]
pub struct DensityState<T> {
    pub phi_sum: Vec<T>,
    pub re_sum: Vec<T>,
    pub re_std: T,
    pub re_mean: T,
    pub re_cov: T,
    pub mu_tot: T,
}

impl<T> DensityState<T>
where
    T: Float + FromPrimitive,
{
    pub fn new(params: &DensMapParams<T>, n_vertices: usize) -> Self {
        let two = T::from_f64(2.0).unwrap();
        let mu_tot = params.mu_sum.iter().fold(T::zero(), |acc, &m| acc + m) / two;

        Self {
            phi_sum: vec![T::zero(); n_vertices],
            re_sum: vec![T::zero(); n_vertices],
            re_std: T::zero(),
            re_mean: T::zero(),
            re_cov: T::zero(),
            mu_tot,
        }
    }

    /// Whether the correction is active at epoch `n` of `n_epochs`
    pub fn active(params: &DensMapParams<T>, n: usize, n_epochs: usize) -> bool {
        if params.lambda <= T::zero() || n_epochs == 0 {
            return false;
        }
        let progress = T::from_usize(n + 1).unwrap() / T::from_usize(n_epochs).unwrap();
        progress > T::one() - params.frac
    }

    /// Rebuild the per-vertex radius estimates from the current layout
    ///
    /// For every edge, accumulate the curve value `phi = 1/(1 + a d^b)` and
    /// `phi * d` on both endpoints, then log-transform into the empirical
    /// local radius; finally refresh the epoch scalars used by the kernel.
    #[allow(clippy::too_many_arguments)]
    pub fn epoch_init(
        &mut self,
        head_flat: &[T],
        tail_flat: &[T],
        head: &[usize],
        tail: &[usize],
        n_dim: usize,
        a: T,
        b: T,
        params: &DensMapParams<T>,
    ) {
        let one = T::one();
        let half = T::from_f64(0.5).unwrap();
        let b_is_one = (b - one).abs() < T::from_f64(1e-10).unwrap();
        let b_is_half = (b - half).abs() < T::from_f64(1e-10).unwrap();

        self.phi_sum.fill(T::zero());
        self.re_sum.fill(T::zero());

        for i in 0..head.len() {
            let j = head[i];
            let k = tail[i];

            let dist_squared = squared_dist_pair(head_flat, j, tail_flat, k, n_dim);
            let phi = one / (one + a * fast_pow(dist_squared, b, b_is_one, b_is_half));

            self.re_sum[j] = self.re_sum[j] + phi * dist_squared;
            self.re_sum[k] = self.re_sum[k] + phi * dist_squared;
            self.phi_sum[j] = self.phi_sum[j] + phi;
            self.phi_sum[k] = self.phi_sum[k] + phi;
        }

        let epsilon = T::from_f64(1e-8).unwrap();
        for v in 0..self.re_sum.len() {
            self.re_sum[v] = (epsilon + self.re_sum[v] / self.phi_sum[v]).ln();
        }

        let n_vertices = self.re_sum.len();
        self.re_std = (variance(&self.re_sum) + params.var_shift).sqrt();
        self.re_mean = mean(&self.re_sum);
        self.re_cov =
            dot(&self.re_sum, &params.r) / T::from_usize(n_vertices.saturating_sub(1)).unwrap();
    }

    /// Density correction added (doubled) into the attractive coefficient
    ///
    /// `i` is the edge index, `j`/`k` its endpoints, `dist_squared` the
    /// current output-space squared distance.
    #[allow(clippy::too_many_arguments)]
    #[inline]
    pub fn grad_cor_coeff(
        &self,
        params: &DensMapParams<T>,
        i: usize,
        j: usize,
        k: usize,
        dist_squared: T,
        a: T,
        b: T,
    ) -> T {
        let one = T::one();
        let n_vertices = T::from_usize(self.re_sum.len()).unwrap();

        let dist_b = dist_squared.powf(b);
        let denom = one + a * dist_b;
        let phi = one / denom;
        let dphi_term = a * b * dist_squared.powf(b - one) / denom;

        let q_jk = phi / self.phi_sum[k];
        let q_kj = phi / self.phi_sum[j];

        let dr_k = q_jk * ((one - b * (one - phi)) / self.re_sum[k].exp() + dphi_term);
        let dr_j = q_kj * ((one - b * (one - phi)) / self.re_sum[j].exp() + dphi_term);

        let re_std_sq = self.re_std * self.re_std;
        let weight_k = params.r[k] - self.re_cov * (self.re_sum[k] - self.re_mean) / re_std_sq;
        let weight_j = params.r[j] - self.re_cov * (self.re_sum[j] - self.re_mean) / re_std_sq;

        params.lambda * self.mu_tot * (weight_k * dr_k + weight_j * dr_j)
            / (params.mu[i] * self.re_std)
            / n_vertices
    }
}

/// Parameters plus their per-run state, handed to the kernel as one unit
pub struct DensityBundle<T> {
    pub params: DensMapParams<T>,
    pub state: DensityState<T>,
}

impl<T> DensityBundle<T>
where
    T: Float + FromPrimitive,
{
    pub fn new(params: DensMapParams<T>, n_vertices: usize) -> Self {
        let state = DensityState::new(&params, n_vertices);
        Self { params, state }
    }
}

///////////
// Tests //
///////////
