use crate::config::StorageConfig;

/// Maps a raw batch key to where its scored output and summary land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    raw_prefix: String,
    processed_prefix: String,
}

impl OutputLayout {
    pub fn new(raw_prefix: impl Into<String>, processed_prefix: impl Into<String>) -> Self {
        Self {
            raw_prefix: raw_prefix.into(),
            processed_prefix: processed_prefix.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.raw_prefix.clone(), storage.processed_prefix.clone())
    }

    pub fn processed_prefix(&self) -> &str {
        &self.processed_prefix
    }

    /// `raw/2024/05/a.csv` becomes `processed/2024/05/a.csv`. Keys outside
    /// the raw prefix are placed under the processed prefix as they are.
    pub fn output_key(&self, source_key: &str) -> String {
        let rest = source_key.strip_prefix(&self.raw_prefix).unwrap_or(source_key);
        format!("{}{}", self.processed_prefix, rest)
    }

    /// `processed/a.csv` becomes `processed/a_summary.json`.
    pub fn summary_key(&self, output_key: &str) -> String {
        let stem = output_key.strip_suffix(".csv").unwrap_or(output_key);
        format!("{stem}_summary.json")
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_key() {
        let layout = OutputLayout::default();
        assert_eq!(layout.output_key("raw/2024/05/a.csv"), "processed/2024/05/a.csv");
        assert_eq!(layout.output_key("uploads/a.csv"), "processed/uploads/a.csv");
        // Only the leading prefix is rewritten.
        assert_eq!(layout.output_key("raw/raw/a.csv"), "processed/raw/a.csv");
    }

    #[test]
    fn test_summary_key() {
        let layout = OutputLayout::default();
        assert_eq!(layout.summary_key("processed/a.csv"), "processed/a_summary.json");
        assert_eq!(layout.summary_key("processed/a.tsv"), "processed/a.tsv_summary.json");
    }

    #[test]
    fn test_custom_prefixes() {
        let layout = OutputLayout::new("incoming/", "scored/");
        assert_eq!(layout.output_key("incoming/x.csv"), "scored/x.csv");
        assert_eq!(layout.processed_prefix(), "scored/");
    }
}
