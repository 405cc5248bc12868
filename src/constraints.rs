use num_traits::{Float, FromPrimitive};

use crate::error::LayoutError;

//////////////////////////////////
// Constraint/projection hooks //
//////////////////////////////////

/// Rewrites the gradient of one indexed point, in place
pub type IdxGradFn<T> = Box<dyn Fn(usize, &[T], &mut [T]) + Send + Sync>;
/// Rewrites one indexed point after its update, in place
pub type IdxPtFn<T> = Box<dyn Fn(usize, &mut [T]) + Send + Sync>;
/// Rewrites a gradient without knowing the point index
pub type GradFn<T> = Box<dyn Fn(&[T], &mut [T]) + Send + Sync>;
/// Rewrites a point after its update without knowing the index
pub type PtFn<T> = Box<dyn Fn(&mut [T]) + Send + Sync>;
/// Rewrites the whole flat embedding (row-major, given the dimensionality)
pub type EmbeddingFn<T> = Box<dyn Fn(&mut [T], usize) + Send + Sync>;

/// Point-pinning and manifold-projection hooks, decoupled from the gradient
/// arithmetic
///
/// Each trigger point holds an ordered list of hooks applied in registration
/// order, so several constraints compose instead of the first silently
/// winning. An empty set is the no-op default. Application order per point
/// update: `idx_grad` → `grad` → clip + learning-rate apply → `idx_pt` →
/// `pt`. `epoch_pt` runs once after each full epoch, `final_pt` once after
/// the last epoch. Hooks never run during initialisation; the caller is
/// responsible for an initial embedding that already satisfies them.
///
/// Only the Euclidean kernel honours constraints; its parallel variant may
/// invoke a hook from any worker thread, hence the `Send + Sync` bounds.
#[derive(Default)]
pub struct ConstraintSet<T> {
    idx_grad: Vec<IdxGradFn<T>>,
    idx_pt: Vec<IdxPtFn<T>>,
    grad: Vec<GradFn<T>>,
    pt: Vec<PtFn<T>>,
    epoch_pt: Vec<EmbeddingFn<T>>,
    final_pt: Vec<EmbeddingFn<T>>,
}

impl<T> ConstraintSet<T>
where
    T: Float + FromPrimitive + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            idx_grad: Vec::new(),
            idx_pt: Vec::new(),
            grad: Vec::new(),
            pt: Vec::new(),
            epoch_pt: Vec::new(),
            final_pt: Vec::new(),
        }
    }

    pub fn add_idx_grad(mut self, f: IdxGradFn<T>) -> Self {
        self.idx_grad.push(f);
        self
    }

    pub fn add_idx_pt(mut self, f: IdxPtFn<T>) -> Self {
        self.idx_pt.push(f);
        self
    }

    pub fn add_grad(mut self, f: GradFn<T>) -> Self {
        self.grad.push(f);
        self
    }

    pub fn add_pt(mut self, f: PtFn<T>) -> Self {
        self.pt.push(f);
        self
    }

    pub fn add_epoch_pt(mut self, f: EmbeddingFn<T>) -> Self {
        self.epoch_pt.push(f);
        self
    }

    pub fn add_final_pt(mut self, f: EmbeddingFn<T>) -> Self {
        self.final_pt.push(f);
        self
    }

    /// Register a pin mask, normalised into an `idx_grad` hook
    ///
    /// ### Params
    ///
    /// * `mask` - Per-point weights or a per-point-per-dimension mask.
    /// * `head_embedding` - The embedding the mask will constrain; 2-d masks
    ///   capture the pinned coordinates from it.
    ///
    /// ### Returns
    ///
    /// Self with the derived hook appended, or a fatal configuration error
    /// when the mask shape matches neither accepted form.
    pub fn pin(self, mask: &PinMask<T>, head_embedding: &[Vec<T>]) -> Result<Self, LayoutError> {
        let n_points = head_embedding.len();
        let n_dim = head_embedding.first().map_or(0, |p| p.len());

        match mask {
            PinMask::PerPoint(weights) => {
                if weights.len() != n_points {
                    return Err(LayoutError::PinMaskLength {
                        got: weights.len(),
                        expected: n_points,
                    });
                }

                let mut fixed: Vec<usize> = weights
                    .iter()
                    .enumerate()
                    .filter(|(_, &w)| w == T::zero())
                    .map(|(i, _)| i)
                    .collect();
                fixed.sort_unstable();

                Ok(self.add_idx_grad(Box::new(move |idx, _pt, grad| {
                    if fixed.binary_search(&idx).is_ok() {
                        for g in grad.iter_mut() {
                            *g = T::zero();
                        }
                    }
                })))
            }
            PinMask::PerCoordinate(rows) => {
                if rows.len() != n_points || rows.iter().any(|r| r.len() != n_dim) {
                    return Err(LayoutError::PinMaskShape {
                        rows: rows.len(),
                        cols: rows.first().map_or(0, |r| r.len()),
                        n_points,
                        n_dim,
                    });
                }

                // Sentinel form: pinned coordinates keep their current value,
                // free coordinates carry +inf.
                let mut anchors = vec![T::infinity(); n_points * n_dim];
                for (i, row) in rows.iter().enumerate() {
                    for (d, &w) in row.iter().enumerate() {
                        if w == T::zero() {
                            anchors[i * n_dim + d] = head_embedding[i][d];
                        }
                    }
                }

                Ok(self.add_idx_grad(Box::new(move |idx, _pt, grad| {
                    let base = idx * grad.len();
                    for (d, g) in grad.iter_mut().enumerate() {
                        if anchors[base + d].is_finite() {
                            *g = T::zero();
                        }
                    }
                })))
            }
        }
    }

    /// Whether any gradient-rewriting hook is registered
    #[inline]
    pub fn has_grad_mods(&self) -> bool {
        !self.idx_grad.is_empty() || !self.grad.is_empty()
    }

    /// Whether any per-point post-update hook is registered
    #[inline]
    pub fn has_pt_mods(&self) -> bool {
        !self.idx_pt.is_empty() || !self.pt.is_empty()
    }

    /// Whether the set is entirely empty (the no-op default)
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_grad_mods()
            && !self.has_pt_mods()
            && self.epoch_pt.is_empty()
            && self.final_pt.is_empty()
    }

    /// Apply the gradient hooks for point `idx`, in registration order
    #[inline]
    pub fn apply_grad(&self, idx: usize, pt: &[T], grad: &mut [T]) {
        for f in &self.idx_grad {
            f(idx, pt, grad);
        }
        for f in &self.grad {
            f(pt, grad);
        }
    }

    /// Apply the point hooks for point `idx`, in registration order
    #[inline]
    pub fn apply_pt(&self, idx: usize, pt: &mut [T]) {
        for f in &self.idx_pt {
            f(idx, pt);
        }
        for f in &self.pt {
            f(pt);
        }
    }

    /// Apply the per-epoch whole-embedding hooks
    pub fn apply_epoch_pt(&self, embedding: &mut [T], n_dim: usize) {
        for f in &self.epoch_pt {
            f(embedding, n_dim);
        }
    }

    /// Apply the end-of-run whole-embedding hooks
    pub fn apply_final_pt(&self, embedding: &mut [T], n_dim: usize) {
        for f in &self.final_pt {
            f(embedding, n_dim);
        }
    }
}

/// Pin-mask input styles accepted by [`ConstraintSet::pin`]
///
/// A weight of 0 pins the point (1-d) or the single coordinate (2-d);
/// non-zero weights leave it free.
#[derive(Clone, Debug)]
pub enum PinMask<T> {
    /// One weight per point; 0 means the point never moves.
    PerPoint(Vec<T>),
    /// One weight per point per dimension; 0 pins that coordinate.
    PerCoordinate(Vec<Vec<T>>),
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_constraints {
    use super::*;

    fn embedding_2d() -> Vec<Vec<f64>> {
        vec![vec![0.0, 0.0], vec![1.0, 2.0], vec![3.0, 4.0]]
    }

    #[test]
    fn test_pin_1d_zeroes_gradient() {
        let embd = embedding_2d();
        let set = ConstraintSet::new()
            .pin(&PinMask::PerPoint(vec![1.0, 0.0, 1.0]), &embd)
            .unwrap();

        let mut grad = vec![0.5, -0.5];
        set.apply_grad(1, &embd[1], &mut grad);
        assert_eq!(grad, vec![0.0, 0.0]);

        let mut grad = vec![0.5, -0.5];
        set.apply_grad(0, &embd[0], &mut grad);
        assert_eq!(grad, vec![0.5, -0.5]);
    }

    #[test]
    fn test_pin_1d_wrong_length() {
        let embd = embedding_2d();
        let err = ConstraintSet::new()
            .pin(&PinMask::PerPoint(vec![1.0, 0.0]), &embd)
            .err()
            .unwrap();
        assert!(matches!(err, LayoutError::PinMaskLength { got: 2, expected: 3 }));
    }

    #[test]
    fn test_pin_2d_pins_single_coordinate() {
        let embd = embedding_2d();
        let mask = PinMask::PerCoordinate(vec![
            vec![1.0, 1.0],
            vec![0.0, 1.0], // point 1, dim 0 pinned
            vec![1.0, 1.0],
        ]);
        let set = ConstraintSet::new().pin(&mask, &embd).unwrap();

        let mut grad = vec![0.7, 0.7];
        set.apply_grad(1, &embd[1], &mut grad);
        assert_eq!(grad, vec![0.0, 0.7]);
    }

    #[test]
    fn test_pin_2d_wrong_shape() {
        let embd = embedding_2d();
        let mask = PinMask::PerCoordinate(vec![vec![1.0], vec![1.0], vec![1.0]]);
        assert!(ConstraintSet::new().pin(&mask, &embd).is_err());
    }

    #[test]
    fn test_hooks_compose_in_order() {
        let set: ConstraintSet<f64> = ConstraintSet::new()
            .add_grad(Box::new(|_pt, grad| {
                for g in grad.iter_mut() {
                    *g = *g + 1.0;
                }
            }))
            .add_grad(Box::new(|_pt, grad| {
                for g in grad.iter_mut() {
                    *g = *g * 2.0;
                }
            }));

        let mut grad = vec![1.0];
        set.apply_grad(0, &[0.0], &mut grad);
        // (1 + 1) * 2, not (1 * 2) + 1
        assert_eq!(grad, vec![4.0]);
    }

    #[test]
    fn test_empty_set_is_noop() {
        let set: ConstraintSet<f64> = ConstraintSet::new();
        assert!(set.is_empty());
        let mut grad = vec![0.3];
        set.apply_grad(0, &[0.0], &mut grad);
        assert_eq!(grad, vec![0.3]);
    }
}
