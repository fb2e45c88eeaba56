use crate::baseline::StatsError;
use serde::{Deserialize, Serialize};

/// Incremental mean/variance accumulator for one channel (Welford).
///
/// Variance is the population variance `m2 / count`. Standard deviation is
/// reported as `0.0` while `count < 2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StatRecord", into = "StatRecord")]
pub struct RunningStat {
    count: u64,
    mean: f64,
    m2: f64,
}

/// Stored shape of a [`RunningStat`]. `std` is written for readers of the
/// snapshot and ignored on load.
#[derive(Debug, Serialize, Deserialize)]
struct StatRecord {
    count: u64,
    mean: f64,
    #[serde(rename = "M2")]
    m2: f64,
    #[serde(skip_deserializing)]
    std: f64,
}

impl RunningStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an accumulator from persisted parts, checking its invariants.
    pub fn from_parts(count: u64, mean: f64, m2: f64) -> Result<Self, StatsError> {
        if !mean.is_finite() || !m2.is_finite() {
            return Err(StatsError::InvalidState {
                reason: format!("non-finite mean/m2 ({mean}, {m2})"),
            });
        }
        if m2 < 0.0 {
            return Err(StatsError::InvalidState {
                reason: format!("m2 must be >= 0, got {m2}"),
            });
        }
        if count == 0 && (mean != 0.0 || m2 != 0.0) {
            return Err(StatsError::InvalidState {
                reason: "empty accumulator must have zero mean and m2".to_string(),
            });
        }
        Ok(Self { count, mean, m2 })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn m2(&self) -> f64 {
        self.m2
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.m2 / self.count as f64
    }

    pub fn std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.variance().sqrt()
    }

    /// True once enough observations have been seen to trust z-scores.
    pub fn is_mature(&self, floor: u64) -> bool {
        self.count >= floor
    }

    /// Fold one observation in. Non-finite values, and finite values whose
    /// update would overflow mean or m2, are rejected and leave the
    /// accumulator untouched.
    pub fn push(&mut self, value: f64) -> Result<(), StatsError> {
        if !value.is_finite() {
            return Err(StatsError::InvalidValue { value });
        }
        // The mean must be updated before delta2 is taken.
        let count = self.count + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / count as f64;
        let delta2 = value - mean;
        let m2 = self.m2 + delta * delta2;
        if !mean.is_finite() || !m2.is_finite() {
            return Err(StatsError::Overflow { value });
        }
        self.count = count;
        self.mean = mean;
        self.m2 = m2;
        Ok(())
    }

    /// Fold a sequence in input order. Rejected values are returned; the rest
    /// of the sequence is still applied.
    pub fn update<I>(&mut self, values: I) -> Vec<StatsError>
    where
        I: IntoIterator<Item = f64>,
    {
        values
            .into_iter()
            .filter_map(|v| self.push(v).err())
            .collect()
    }
}

impl TryFrom<StatRecord> for RunningStat {
    type Error = StatsError;

    fn try_from(record: StatRecord) -> Result<Self, Self::Error> {
        Self::from_parts(record.count, record.mean, record.m2)
    }
}

impl From<RunningStat> for StatRecord {
    fn from(stat: RunningStat) -> Self {
        Self {
            count: stat.count,
            mean: stat.mean,
            m2: stat.m2,
            std: stat.std(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pass(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let m2 = values.iter().map(|x| (x - mean).powi(2)).sum();
        (mean, m2)
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() <= tol * scale, "{a} != {b}");
    }

    #[test]
    fn test_matches_two_pass_formulas() {
        let sequences: Vec<Vec<f64>> = vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![22.1, 21.7, 23.4, 22.9, 20.8, 22.0, 21.5],
            vec![-3.5, 0.0, 7.25, 1e-3, -2.0],
            // Large offset, small spread: the naive sum-of-squares form loses
            // most of its digits here.
            (0..1000).map(|i| 1e9 + (i % 7) as f64 * 0.1).collect(),
        ];

        for values in sequences {
            let (mean, m2) = two_pass(&values);

            let mut all_at_once = RunningStat::new();
            assert!(all_at_once.update(values.iter().copied()).is_empty());

            let mut one_at_a_time = RunningStat::new();
            for v in &values {
                one_at_a_time.push(*v).unwrap();
            }

            assert_eq!(all_at_once.count(), values.len() as u64);
            assert_close(all_at_once.mean(), mean, 1e-12);
            assert_close(all_at_once.m2(), m2, 1e-4);
            assert_eq!(all_at_once, one_at_a_time);
        }
    }

    #[test]
    fn test_count_and_m2_never_decrease() {
        let mut stat = RunningStat::new();
        let mut last = stat;
        for v in [5.0, 5.0, -1.0, 12.5, 3.3, 3.3, 100.0, 0.0] {
            stat.push(v).unwrap();
            assert!(stat.count() > last.count());
            assert!(stat.m2() >= last.m2());
            last = stat;
        }
    }

    #[test]
    fn test_non_finite_rejected_without_mutation() {
        let mut stat = RunningStat::new();
        stat.update([1.0, 2.0, 3.0]);
        let before = stat;

        let rejected = stat.update([f64::NAN, f64::INFINITY, 4.0, f64::NEG_INFINITY]);
        assert_eq!(rejected.len(), 3);
        assert!(matches!(rejected[1], StatsError::InvalidValue { value } if value.is_infinite()));
        assert_eq!(stat.count(), before.count() + 1);
        assert!(stat.mean().is_finite() && stat.m2().is_finite());
    }

    #[test]
    fn test_overflowing_values_rejected_without_mutation() {
        let mut stat = RunningStat::new();
        stat.push(1e200).unwrap();
        let before = stat;

        // delta * delta2 is 1e400 here.
        assert!(matches!(stat.push(-1e200), Err(StatsError::Overflow { .. })));
        assert_eq!(stat, before);

        let mut extremes = RunningStat::new();
        let rejected = extremes.update([1.5e308, -1.5e308, 1.5e308]);
        assert!(!rejected.is_empty());
        assert!(extremes.mean().is_finite() && extremes.m2().is_finite());
        assert!(RunningStat::from_parts(extremes.count(), extremes.mean(), extremes.m2()).is_ok());

        stat.push(1e200).unwrap();
        assert_eq!(stat.count(), 2);
    }

    #[test]
    fn test_std_conventions() {
        let mut stat = RunningStat::new();
        assert_eq!(stat.std(), 0.0);
        assert_eq!(stat.variance(), 0.0);

        stat.push(10.0).unwrap();
        assert_eq!(stat.std(), 0.0);

        stat.push(14.0).unwrap();
        // Population variance of {10, 14} is 4.
        assert_eq!(stat.variance(), 4.0);
        assert_eq!(stat.std(), 2.0);
    }

    #[test]
    fn test_from_parts_checks_invariants() {
        assert!(RunningStat::from_parts(100, 22.0, 225.0).is_ok());
        assert!(RunningStat::from_parts(3, 1.0, -0.5).is_err());
        assert!(RunningStat::from_parts(0, 1.0, 0.0).is_err());
        assert!(RunningStat::from_parts(2, f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_serde_shape() {
        let stat = RunningStat::from_parts(4, 2.5, 5.0).unwrap();
        let json = serde_json::to_value(stat).unwrap();
        assert_eq!(json["count"], 4);
        assert_eq!(json["M2"], 5.0);
        assert_eq!(json["std"], stat.std());

        let back: RunningStat = serde_json::from_value(json).unwrap();
        assert_eq!(back, stat);

        let bad = serde_json::json!({ "count": 2, "mean": 1.0, "M2": -1.0 });
        assert!(serde_json::from_value::<RunningStat>(bad).is_err());
    }
}
