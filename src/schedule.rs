use num_traits::{Float, FromPrimitive};

/////////////////////
// Epoch scheduler //
/////////////////////

/// Per-edge sampling schedule state
///
/// Edges with stronger membership (smaller `epochs_per_sample`) fire more
/// often, and draw proportionally more negative samples. The two
/// `epoch_of_next_*` arrays only ever move forward; they are mutated by the
/// kernels through [`EdgeSchedule::fire`] and
/// [`EdgeSchedule::fire_negatives`].
#[derive(Clone, Debug)]
pub struct EdgeSchedule<T> {
    pub epochs_per_sample: Vec<T>,
    pub epochs_per_negative_sample: Vec<T>,
    pub epoch_of_next_sample: Vec<T>,
    pub epoch_of_next_negative_sample: Vec<T>,
}

impl<T> EdgeSchedule<T>
where
    T: Float + FromPrimitive,
{
    /// Build the schedule from per-edge sampling rates
    ///
    /// ### Params
    ///
    /// * `epochs_per_sample` - Positive float per edge, inversely related to
    ///   edge membership strength.
    /// * `negative_sample_rate` - Expected negative samples per positive
    ///   sample.
    pub fn new(epochs_per_sample: &[T], negative_sample_rate: T) -> Self {
        let epochs_per_negative_sample: Vec<T> = epochs_per_sample
            .iter()
            .map(|&eps| eps / negative_sample_rate)
            .collect();

        Self {
            epoch_of_next_sample: epochs_per_sample.to_vec(),
            epoch_of_next_negative_sample: epochs_per_negative_sample.clone(),
            epochs_per_sample: epochs_per_sample.to_vec(),
            epochs_per_negative_sample,
        }
    }

    /// Number of edges tracked by this schedule
    #[inline]
    pub fn len(&self) -> usize {
        self.epochs_per_sample.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.epochs_per_sample.is_empty()
    }

    /// Whether edge `i` fires an attractive update at epoch `n`
    ///
    /// The kernels pass a 1-based epoch count, so an edge with
    /// `epochs_per_sample` of 1 is due every epoch from the first.
    #[inline]
    pub fn due(&self, i: usize, n: T) -> bool {
        self.epoch_of_next_sample[i] <= n
    }

    /// Advance edge `i`'s next attractive-sample epoch after it fired
    #[inline]
    pub fn fire(&mut self, i: usize) {
        self.epoch_of_next_sample[i] = self.epoch_of_next_sample[i] + self.epochs_per_sample[i];
    }

    /// Number of negative samples edge `i` should draw at epoch `n`
    #[inline]
    pub fn negative_samples(&self, i: usize, n: T) -> usize {
        if self.epochs_per_negative_sample[i] <= T::zero() {
            return 0;
        }
        ((n - self.epoch_of_next_negative_sample[i]) / self.epochs_per_negative_sample[i])
            .floor()
            .to_usize()
            .unwrap_or(0)
    }

    /// Advance edge `i`'s negative-sample epoch after `count` draws
    #[inline]
    pub fn fire_negatives(&mut self, i: usize, count: usize) {
        if count == 0 {
            return;
        }
        self.epoch_of_next_negative_sample[i] = self.epoch_of_next_negative_sample[i]
            + T::from_usize(count).unwrap() * self.epochs_per_negative_sample[i];
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod test_schedule {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_state_mirrors_rates() {
        let sched = EdgeSchedule::new(&[1.0_f64, 2.5], 5.0);
        assert_relative_eq!(sched.epoch_of_next_sample[0], 1.0);
        assert_relative_eq!(sched.epoch_of_next_sample[1], 2.5);
        assert_relative_eq!(sched.epochs_per_negative_sample[0], 0.2);
        assert_relative_eq!(sched.epoch_of_next_negative_sample[1], 0.5);
    }

    #[test]
    fn test_strong_edges_fire_more_often() {
        let mut sched = EdgeSchedule::new(&[1.0_f64, 4.0], 5.0);
        let mut fired = [0usize; 2];
        for epoch in 0..20 {
            let n = epoch as f64;
            for i in 0..2 {
                if sched.due(i, n) {
                    sched.fire(i);
                    fired[i] += 1;
                }
            }
        }
        assert!(fired[0] > fired[1] * 3);
    }

    #[test]
    fn test_next_sample_monotone() {
        let mut sched = EdgeSchedule::new(&[0.7_f64], 5.0);
        let mut prev_pos = sched.epoch_of_next_sample[0];
        let mut prev_neg = sched.epoch_of_next_negative_sample[0];
        for epoch in 0..50 {
            let n = epoch as f64;
            if sched.due(0, n) {
                sched.fire(0);
                let neg = sched.negative_samples(0, n);
                sched.fire_negatives(0, neg);
            }
            assert!(sched.epoch_of_next_sample[0] >= prev_pos);
            assert!(sched.epoch_of_next_negative_sample[0] >= prev_neg);
            prev_pos = sched.epoch_of_next_sample[0];
            prev_neg = sched.epoch_of_next_negative_sample[0];
        }
    }

    #[test]
    fn test_negative_sample_count() {
        let sched = EdgeSchedule::new(&[1.0_f64], 5.0);
        // At epoch 2: (2 - 0.2) / 0.2 = 9 pending draws.
        assert_eq!(sched.negative_samples(0, 2.0), 9);
    }

    #[test]
    fn test_zero_negative_rate_draws_nothing() {
        // negative_sample_rate of 0 gives infinite epochs_per_negative_sample
        let sched = EdgeSchedule::new(&[1.0_f64], 0.0);
        assert_eq!(sched.negative_samples(0, 100.0), 0);
    }
}
