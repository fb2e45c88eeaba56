use crate::batch::{Batch, BatchError};
use crate::detect::forest::{ForestParams, IsolationForest};
use serde::Serialize;
use tracing::debug;

/// Discrete multivariate verdict for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierLabel {
    Anomalous,
    Normal,
}

impl OutlierLabel {
    /// `-1` anomalous, `1` normal.
    pub fn as_i8(self) -> i8 {
        match self {
            OutlierLabel::Anomalous => -1,
            OutlierLabel::Normal => 1,
        }
    }
}

/// Per-row multivariate output. Lower scores are more anomalous; rows
/// labelled anomalous are exactly those scoring below zero.
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateFlags {
    pub labels: Vec<OutlierLabel>,
    pub scores: Vec<f64>,
    pub flags: Vec<bool>,
}

impl MultivariateFlags {
    fn all_normal(rows: usize) -> Self {
        Self {
            labels: vec![OutlierLabel::Normal; rows],
            scores: vec![0.0; rows],
            flags: vec![false; rows],
        }
    }

    pub fn flagged(&self) -> usize {
        self.flags.iter().filter(|f| **f).count()
    }
}

/// Batch-local multivariate outlier scoring. A fresh isolation forest is
/// fitted on every call; no state survives between batches.
#[derive(Debug, Clone, Copy)]
pub struct MultivariateFlagger {
    contamination: f64,
    params: ForestParams,
}

impl MultivariateFlagger {
    pub fn new(contamination: f64, params: ForestParams) -> Self {
        Self {
            contamination,
            params,
        }
    }

    /// Score every row of `batch` over the named numeric columns. Columns
    /// missing from the batch are ignored.
    pub fn flag(&self, batch: &Batch, numeric_columns: &[&str]) -> Result<MultivariateFlags, BatchError> {
        let mut columns = Vec::with_capacity(numeric_columns.len());
        for name in numeric_columns {
            if let Some(values) = batch.numeric_column(name)? {
                columns.push(values);
            }
        }
        Ok(self.flag_columns(&columns, batch.len()))
    }

    /// Score `rows` rows given column-major values.
    pub fn flag_columns(&self, columns: &[Vec<Option<f64>>], rows: usize) -> MultivariateFlags {
        let features: Vec<Vec<f64>> = columns.iter().filter_map(|c| impute_median(c)).collect();
        if rows < 2 || features.is_empty() {
            debug!(rows, usable_columns = features.len(), "Too little data to fit, every row normal");
            return MultivariateFlags::all_normal(rows);
        }

        let data: Vec<Vec<f64>> = (0..rows)
            .map(|i| features.iter().map(|col| col[i]).collect())
            .collect();

        let forest = IsolationForest::fit(&data, &self.params);
        let raw: Vec<f64> = data.iter().map(|row| -forest.anomaly_score(row)).collect();
        let offset = percentile(&raw, self.contamination * 100.0);

        let scores: Vec<f64> = raw.iter().map(|s| s - offset).collect();
        let labels: Vec<OutlierLabel> = scores
            .iter()
            .map(|s| if *s < 0.0 { OutlierLabel::Anomalous } else { OutlierLabel::Normal })
            .collect();
        let flags = labels.iter().map(|l| *l == OutlierLabel::Anomalous).collect();

        MultivariateFlags { labels, scores, flags }
    }
}

/// Fill absent or non-finite cells with the column median. `None` when the
/// column has no usable value at all.
fn impute_median(column: &[Option<f64>]) -> Option<Vec<f64>> {
    let mut present: Vec<f64> = column.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(f64::total_cmp);
    let mid = present.len() / 2;
    let median = if present.len() % 2 == 0 {
        present[mid - 1] / 2.0 + present[mid] / 2.0
    } else {
        present[mid]
    };

    Some(
        column
            .iter()
            .map(|v| v.filter(|x| x.is_finite()).unwrap_or(median))
            .collect(),
    )
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn flagger() -> MultivariateFlagger {
        MultivariateFlagger::new(0.05, ForestParams::default())
    }

    fn sensor_columns(rows: usize) -> Vec<Vec<Option<f64>>> {
        let mut rng = StdRng::seed_from_u64(11);
        let temperature = (0..rows).map(|_| Some(22.0 + rng.gen_range(-1.5..1.5))).collect();
        let humidity = (0..rows).map(|_| Some(45.0 + rng.gen_range(-5.0..5.0))).collect();
        vec![temperature, humidity]
    }

    #[test]
    fn test_impute_median() {
        let col = vec![Some(1.0), None, Some(3.0), Some(f64::NAN), Some(10.0), Some(2.0)];
        // present finite: 1, 2, 3, 10 -> median 2.5
        assert_eq!(
            impute_median(&col).unwrap(),
            vec![1.0, 2.5, 3.0, 2.5, 10.0, 2.0]
        );
        assert!(impute_median(&[None, None]).is_none());
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 5.0) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic() {
        let columns = sensor_columns(80);
        let a = flagger().flag_columns(&columns, 80);
        let b = flagger().flag_columns(&columns, 80);
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_follow_scores() {
        let mut columns = sensor_columns(80);
        columns[0][17] = Some(60.0);
        columns[1][17] = Some(5.0);

        let out = flagger().flag_columns(&columns, 80);
        assert_eq!(out.labels[17], OutlierLabel::Anomalous);

        let worst_normal = out
            .scores
            .iter()
            .zip(&out.labels)
            .filter(|(_, l)| **l == OutlierLabel::Normal)
            .map(|(s, _)| *s)
            .fold(f64::INFINITY, f64::min);
        for (score, label) in out.scores.iter().zip(&out.labels) {
            if *label == OutlierLabel::Anomalous {
                assert!(*score < 0.0 && *score <= worst_normal);
            }
        }
        assert_eq!(out.flagged(), out.labels.iter().filter(|l| **l == OutlierLabel::Anomalous).count());
    }

    #[test]
    fn test_flagged_fraction_near_contamination() {
        let columns = sensor_columns(200);
        let out = flagger().flag_columns(&columns, 200);
        // 5% of 200 is 10; ties can only lower the count.
        assert!(out.flagged() <= 10, "flagged {}", out.flagged());
        assert!(out.flagged() >= 1);
    }

    #[test]
    fn test_too_little_data_is_normal() {
        let out = flagger().flag_columns(&[vec![Some(1.0)]], 1);
        assert_eq!(out, MultivariateFlags::all_normal(1));

        let out = flagger().flag_columns(&[vec![None, None, None]], 3);
        assert_eq!(out.flags, vec![false; 3]);

        let out = flagger().flag_columns(&[], 0);
        assert!(out.labels.is_empty());
    }

    #[test]
    fn test_missing_cells_are_scored() {
        let mut columns = sensor_columns(40);
        columns[0][3] = None;
        columns[1][8] = None;
        let out = flagger().flag_columns(&columns, 40);
        assert_eq!(out.scores.len(), 40);
        assert!(out.scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_extreme_finite_values_are_scored() {
        let columns = vec![
            vec![Some(-1.5e308), Some(1.5e308), Some(0.0), Some(1.0)],
            vec![Some(1.5e308), None, Some(1.6e308), Some(1.7e308)],
        ];
        let out = flagger().flag_columns(&columns, 4);
        assert_eq!(out.labels.len(), 4);
        assert!(out.scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_flag_reads_batch_columns() {
        let batch = Batch::from_columns(vec![
            ("temperature", vec![Some(20.0), Some(21.0), Some(20.5), Some(35.0)]),
            ("humidity", vec![Some(40.0), Some(41.0), None, Some(90.0)]),
        ])
        .unwrap();
        let out = flagger().flag(&batch, &["temperature", "humidity", "pressure"]).unwrap();
        assert_eq!(out.labels.len(), 4);
    }
}
