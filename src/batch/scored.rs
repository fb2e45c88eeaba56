use crate::batch::{round4, Batch, BatchError};
use crate::detect::{DetectionMode, MultivariateFlags, ZScores};

/// Z-score output for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelScores {
    pub channel: String,
    pub zscores: ZScores,
}

/// A batch together with every flagger output and the consensus column.
#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub batch: Batch,
    pub mode: DetectionMode,
    /// Present configured channels, in configuration order. Empty when the
    /// z-score test did not run.
    pub channels: Vec<ChannelScores>,
    /// `None` when the multivariate test did not run.
    pub multivariate: Option<MultivariateFlags>,
    pub anomaly: Vec<bool>,
}

impl ScoredBatch {
    pub fn total_rows(&self) -> usize {
        self.batch.len()
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomaly.iter().filter(|a| **a).count()
    }

    /// Render as CSV: the input columns verbatim, then per-channel
    /// `_zscore`/`_zscore_flag` pairs, then `mv_label`, `mv_score`,
    /// `mv_flag`, then `anomaly`. Unknown values are empty cells.
    pub fn to_csv(&self) -> Result<Vec<u8>, BatchError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header: Vec<String> = self.batch.headers().to_vec();
        for c in &self.channels {
            header.push(format!("{}_zscore", c.channel));
            header.push(format!("{}_zscore_flag", c.channel));
        }
        if self.multivariate.is_some() {
            header.extend(["mv_label", "mv_score", "mv_flag"].map(String::from));
        }
        header.push("anomaly".to_string());
        writer.write_record(&header)?;

        for (i, cells) in self.batch.rows().iter().enumerate() {
            let mut record = cells.clone();
            for c in &self.channels {
                record.push(c.zscores.scores[i].map(format_score).unwrap_or_default());
                record.push(c.zscores.flags[i].map(|f| f.to_string()).unwrap_or_default());
            }
            if let Some(mv) = &self.multivariate {
                record.push(mv.labels[i].as_i8().to_string());
                record.push(format_score(mv.scores[i]));
                record.push(mv.flags[i].to_string());
            }
            record.push(self.anomaly[i].to_string());
            writer.write_record(&record)?;
        }

        writer.into_inner().map_err(|e| BatchError::Io(e.into_error()))
    }
}

fn format_score(value: f64) -> String {
    let rounded = round4(value);
    // Avoid "-0" in the output.
    if rounded == 0.0 {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{BaselineTable, RunningStat};
    use crate::config::EngineConfig;
    use crate::detect::AnomalyEngine;

    fn scored(mode: DetectionMode, stat: Option<RunningStat>) -> ScoredBatch {
        let batch = Batch::from_csv(
            b"timestamp,temperature,humidity,note\n\
              t0,22.0,45,ok\n\
              t1,40.0,,spike\n\
              t2,NA,44,\n",
        )
        .unwrap();
        let mut baseline = BaselineTable::new();
        if let Some(stat) = stat {
            baseline.insert("temperature", stat);
        }
        AnomalyEngine::new(&EngineConfig::default())
            .run(&batch, &baseline, mode)
            .unwrap()
    }

    fn lines(csv: &[u8]) -> Vec<String> {
        String::from_utf8(csv.to_vec()).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_columns_for_both_modes() {
        let stat = RunningStat::from_parts(100, 22.0, 225.0).unwrap();
        let out = lines(&scored(DetectionMode::Both, Some(stat)).to_csv().unwrap());
        assert_eq!(
            out[0],
            "timestamp,temperature,humidity,note,\
             temperature_zscore,temperature_zscore_flag,humidity_zscore,humidity_zscore_flag,\
             mv_label,mv_score,mv_flag,anomaly"
        );
        assert_eq!(out.len(), 4);

        let row1: Vec<&str> = out[2].split(',').collect();
        assert_eq!(&row1[..4], ["t1", "40.0", "", "spike"]);
        assert_eq!(row1[4], "12");
        assert_eq!(row1[5], "true");
        // humidity has no baseline
        assert_eq!(row1[6], "");
        assert_eq!(row1[7], "");
        assert_eq!(row1[11], "true");

        let row2: Vec<&str> = out[3].split(',').collect();
        assert_eq!(row2[4], "");
        assert_eq!(row2[5], "");
    }

    #[test]
    fn test_zscore_mode_omits_multivariate_columns() {
        let out = lines(&scored(DetectionMode::ZScore, None).to_csv().unwrap());
        assert!(!out[0].contains("mv_"));
        assert!(out[0].ends_with(",anomaly"));
        assert!(out[1].ends_with(",false"));
    }

    #[test]
    fn test_multivariate_mode_omits_zscore_columns() {
        let out = lines(&scored(DetectionMode::Multivariate, None).to_csv().unwrap());
        assert!(!out[0].contains("_zscore"));
        assert!(out[0].ends_with("mv_label,mv_score,mv_flag,anomaly"));
    }

    #[test]
    fn test_counts() {
        let stat = RunningStat::from_parts(100, 22.0, 225.0).unwrap();
        let batch = scored(DetectionMode::ZScore, Some(stat));
        assert_eq!(batch.total_rows(), 3);
        assert_eq!(batch.anomaly_count(), 1);
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(-0.00001), "0");
        assert_eq!(format_score(0.123456), "0.1235");
        assert_eq!(format_score(-0.08), "-0.08");
    }
}
