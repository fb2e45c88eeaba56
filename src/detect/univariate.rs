use crate::baseline::RunningStat;

/// Per-row z-scores and threshold flags for one channel. `None` means
/// "unknown": the baseline is immature or the cell has no usable value.
#[derive(Debug, Clone, PartialEq)]
pub struct ZScores {
    pub scores: Vec<Option<f64>>,
    pub flags: Vec<Option<bool>>,
}

impl ZScores {
    fn unknown(len: usize) -> Self {
        Self {
            scores: vec![None; len],
            flags: vec![None; len],
        }
    }

    pub fn flagged(&self) -> usize {
        self.flags.iter().filter(|f| **f == Some(true)).count()
    }

    /// True when at least one row got a definite answer.
    pub fn is_known(&self) -> bool {
        self.flags.iter().any(Option::is_some)
    }
}

/// Z-score threshold test against a channel's running baseline.
#[derive(Debug, Clone, Copy)]
pub struct UnivariateFlagger {
    threshold: f64,
    maturity_floor: u64,
}

impl UnivariateFlagger {
    pub fn new(threshold: f64, maturity_floor: u64) -> Self {
        Self {
            threshold,
            maturity_floor,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn maturity_floor(&self) -> u64 {
        self.maturity_floor
    }

    /// Score `values` against `stat`.
    ///
    /// An unseen or immature channel yields unknown for every row. With a
    /// mature baseline and zero spread every present value scores `0.0` and
    /// is not flagged. Otherwise `z = |x - mean| / std`, flagged when above
    /// the threshold.
    pub fn flag(&self, values: &[Option<f64>], stat: Option<&RunningStat>) -> ZScores {
        let Some(stat) = stat.filter(|s| s.is_mature(self.maturity_floor)) else {
            return ZScores::unknown(values.len());
        };

        let mean = stat.mean();
        let std = stat.std();
        let (scores, flags) = values
            .iter()
            .map(|v| match v {
                Some(x) if x.is_finite() => {
                    let z = if std == 0.0 { 0.0 } else { (x - mean).abs() / std };
                    (Some(z), Some(z > self.threshold))
                }
                _ => (None, None),
            })
            .unzip();

        ZScores { scores, flags }
    }
}
