use std::{fs, path::PathBuf};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;

use crate::{ForestErr, Result};

/// Where a dataset lives and how it is cut into pieces.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSpec {
    pub path: PathBuf,
    pub features: Vec<String>,
    pub label: String,
    #[serde(default = "DatasetSpec::default_test_ratio")]
    pub test_ratio: f32,
    #[serde(default = "DatasetSpec::default_sample_percentage")]
    pub sample_percentage: f32,
    #[serde(default = "DatasetSpec::default_validate_size")]
    pub validate_size: usize,
}

impl DatasetSpec {
    fn default_test_ratio() -> f32 {
        0.2
    }

    fn default_sample_percentage() -> f32 {
        100.0
    }

    fn default_validate_size() -> usize {
        1000
    }

    /// Reads the CSV file this spec points to.
    pub fn load(&self) -> Result<Dataset> {
        Dataset::from_csv(&self.path, &self.features, &self.label)
    }
}

/// A feature matrix with one label per row.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Array1<f32>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `features` - One row per sample.
    /// * `labels` - One label per sample.
    ///
    /// # Returns
    /// A `SizeMismatch` if the amount of rows and labels differ, or `EmptyDataset` if there are no rows.
    pub fn new(features: Array2<f32>, labels: Array1<f32>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(ForestErr::SizeMismatch {
                a: "features",
                b: "labels",
                got: labels.len(),
                expected: features.nrows(),
            });
        }

        if labels.is_empty() {
            return Err(ForestErr::EmptyDataset);
        }

        Ok(Self { features, labels })
    }

    /// Loads the given columns from a numeric CSV file with a header row.
    ///
    /// # Arguments
    /// * `path` - The CSV file.
    /// * `features` - The header names of the feature columns, in order.
    /// * `label` - The header name of the label column.
    pub fn from_csv(path: &std::path::Path, features: &[String], label: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse_csv(&content, features, label)
    }

    /// Parses CSV text, only the selected columns need to be numeric.
    pub fn parse_csv(content: &str, features: &[String], label: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines.next().ok_or(ForestErr::EmptyDataset)?;
        let header: Vec<&str> = header.split(',').map(unquote).collect();

        let column = |name: &str| {
            header
                .iter()
                .position(|h| *h == name)
                .ok_or_else(|| ForestErr::MissingColumn(name.to_string()))
        };

        let feature_idxs = features
            .iter()
            .map(|name| column(name))
            .collect::<Result<Vec<_>>>()?;
        let label_idx = column(label)?;

        let mut data = Vec::new();
        let mut labels = Vec::new();

        for (i, line) in lines {
            let values: Vec<&str> = line.split(',').map(unquote).collect();

            if values.len() != header.len() {
                return Err(ForestErr::Csv {
                    line: i,
                    reason: format!("expected {} values, got {}", header.len(), values.len()),
                });
            }

            let parse = |idx: usize| {
                values[idx].parse::<f32>().map_err(|_| ForestErr::Csv {
                    line: i,
                    reason: format!("cannot parse '{}' as f32", values[idx]),
                })
            };

            for &idx in &feature_idxs {
                data.push(parse(idx)?);
            }

            labels.push(parse(label_idx)?);
        }

        let rows = labels.len();
        let features = Array2::from_shape_vec((rows, feature_idxs.len()), data).map_err(|_| {
            ForestErr::SizeMismatch {
                a: "csv values",
                b: "feature columns",
                got: rows,
                expected: feature_idxs.len(),
            }
        })?;

        Self::new(features, Array1::from_vec(labels))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    #[inline]
    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    #[inline]
    pub fn labels(&self) -> ArrayView1<'_, f32> {
        self.labels.view()
    }

    /// Copies the given rows into a new dataset.
    pub fn select(&self, rows: &[usize]) -> Result<Self> {
        Self::new(
            self.features.select(Axis(0), rows),
            self.labels.select(Axis(0), rows),
        )
    }

    /// The first `n` rows (or all of them).
    pub fn head(&self, n: usize) -> Result<Self> {
        let rows: Vec<_> = (0..n.min(self.len())).collect();
        self.select(&rows)
    }

    /// The last `n` rows (or all of them).
    pub fn tail(&self, n: usize) -> Result<Self> {
        let start = self.len().saturating_sub(n);
        let rows: Vec<_> = (start..self.len()).collect();
        self.select(&rows)
    }

    /// Shuffles the rows and splits them in a train and a test part.
    ///
    /// The test part gets `ceil(len * test_ratio)` rows, both parts must end up non empty.
    pub fn train_test_split<R: Rng + ?Sized>(
        &self,
        test_ratio: f32,
        rng: &mut R,
    ) -> Result<(Self, Self)> {
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(ForestErr::InvalidParams(format!(
                "test_ratio must be in (0, 1), got {test_ratio}"
            )));
        }

        let mut rows: Vec<usize> = (0..self.len()).collect();
        rows.shuffle(rng);

        let test_len = (self.len() as f32 * test_ratio).ceil() as usize;
        let (test, train) = rows.split_at(test_len.min(self.len()));
        Ok((self.select(train)?, self.select(test)?))
    }

    /// Draws `percentage`% of the rows without replacement.
    pub fn sample_percentage<R: Rng + ?Sized>(&self, percentage: f32, rng: &mut R) -> Result<Self> {
        if !(percentage > 0.0 && percentage <= 100.0) {
            return Err(ForestErr::InvalidParams(format!(
                "sample_percentage must be in (0, 100], got {percentage}"
            )));
        }

        let amount = (self.len() as f32 * percentage / 100.0) as usize;
        let rows = rand::seq::index::sample(rng, self.len(), amount).into_vec();
        self.select(&rows)
    }
}

fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    const CSV: &str = "\"date\",\"T1\",\"RH_1\",\"Appliances\"\n\
                       \"2016-01-11 17:00:00\",19.89,47.59,60\n\
                       \"2016-01-11 17:10:00\",19.89,46.69,60\n\
                       \n\
                       \"2016-01-11 17:20:00\",19.89,46.3,50\n";

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_named_columns_and_skips_the_rest() {
        let ds = Dataset::parse_csv(CSV, &names(&["RH_1", "T1"]), "Appliances").unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.n_features(), 2);
        assert_eq!(ds.features().row(0).to_vec(), vec![47.59, 19.89]);
        assert_eq!(ds.labels().to_vec(), vec![60.0, 60.0, 50.0]);
    }

    #[test]
    fn missing_column_is_reported() {
        let err = Dataset::parse_csv(CSV, &names(&["T9"]), "Appliances").unwrap_err();
        assert!(matches!(err, ForestErr::MissingColumn(name) if name == "T9"));
    }

    #[test]
    fn non_numeric_selected_column_fails() {
        let err = Dataset::parse_csv(CSV, &names(&["date"]), "Appliances").unwrap_err();
        assert!(matches!(err, ForestErr::Csv { line: 1, .. }));
    }

    #[test]
    fn split_and_sample_sizes() {
        let features = Array2::from_shape_fn((10, 2), |(i, j)| (i * 2 + j) as f32);
        let labels = Array1::from_shape_fn(10, |i| i as f32);
        let ds = Dataset::new(features, labels).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let (train, test) = ds.train_test_split(0.2, &mut rng).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let sampled = ds.sample_percentage(50.0, &mut rng).unwrap();
        assert_eq!(sampled.len(), 5);

        assert_eq!(ds.tail(3).unwrap().labels().to_vec(), vec![7.0, 8.0, 9.0]);
        assert_eq!(ds.head(2).unwrap().labels().to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = Dataset::new(array![[1.0_f32], [2.0]], array![1.0_f32]).unwrap_err();
        assert!(matches!(err, ForestErr::SizeMismatch { got: 1, expected: 2, .. }));
    }
}
