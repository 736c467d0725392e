use std::cmp::Ordering;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{Component, ForestErr, ForestParams, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f32,
    },
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

/// A regression tree, rows go left when `row[feature] <= threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    n_features: usize,
    nodes: Vec<Node>,
}

struct Pending {
    rows: Vec<usize>,
    depth: usize,
    slot: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f32,
    sse: f64,
}

impl Tree {
    /// Fits a tree on the given rows, repeated rows count once per repetition.
    ///
    /// # Arguments
    /// * `features` - The full feature matrix.
    /// * `labels` - One label per row of `features`.
    /// * `rows` - The rows this tree is allowed to see.
    /// * `params` - Growth limits.
    pub fn fit(
        features: ArrayView2<f32>,
        labels: ArrayView1<f32>,
        rows: &[usize],
        params: &ForestParams,
    ) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(ForestErr::SizeMismatch {
                a: "features",
                b: "labels",
                got: labels.len(),
                expected: features.nrows(),
            });
        }

        if rows.is_empty() {
            return Err(ForestErr::EmptyDataset);
        }

        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut stack = vec![Pending {
            rows: rows.to_vec(),
            depth: 0,
            slot: 0,
        }];

        while let Some(Pending { rows, depth, slot }) = stack.pop() {
            let value = mean(labels, &rows);

            let can_split = rows.len() >= params.min_samples_split.max(2)
                && params.max_depth.is_none_or(|max| depth < max);

            let split = if can_split {
                best_split(features, labels, &rows)
            } else {
                None
            };

            let Some(SplitCandidate {
                feature, threshold, ..
            }) = split
            else {
                nodes[slot] = Node::Leaf { value };
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&row| features[[row, feature]] <= threshold);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { value: 0.0 });
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[slot] = Node::Split {
                feature,
                threshold,
                left,
                right,
            };

            stack.push(Pending {
                rows: right_rows,
                depth: depth + 1,
                slot: right,
            });
            stack.push(Pending {
                rows: left_rows,
                depth: depth + 1,
                slot: left,
            });
        }

        Ok(Self {
            n_features: features.ncols(),
            nodes,
        })
    }

    /// The number of features the tree was fitted with.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// The total amount of nodes, leaves included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn predict_row(&self, row: ArrayView1<f32>) -> f32 {
        let mut idx = 0;

        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if row[feature] <= threshold { left } else { right },
            }
        }
    }

    /// Checks that every reference stays inside the tree and points forward, so prediction terminates.
    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ForestErr::Malformed("tree without nodes".into()));
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = *node
            {
                if feature >= self.n_features {
                    return Err(ForestErr::Malformed(format!(
                        "node {idx} splits on feature {feature} of {}",
                        self.n_features
                    )));
                }

                let len = self.nodes.len();
                if left <= idx || right <= idx || left >= len || right >= len {
                    return Err(ForestErr::Malformed(format!(
                        "node {idx} has invalid children ({left}, {right})"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Component for Tree {
    fn predict(&self, features: ArrayView2<f32>) -> Result<Array1<f32>> {
        if features.ncols() < self.n_features {
            return Err(ForestErr::SizeMismatch {
                a: "features",
                b: "tree",
                got: features.ncols(),
                expected: self.n_features,
            });
        }

        Ok(features.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let tree: Self = serde_json::from_slice(bytes)?;
        tree.validate()?;
        Ok(tree)
    }
}

fn mean(labels: ArrayView1<f32>, rows: &[usize]) -> f32 {
    let sum: f64 = rows.iter().map(|&row| labels[row] as f64).sum();
    (sum / rows.len() as f64) as f32
}

/// Searches the split that minimizes the summed squared error of both children.
fn best_split(
    features: ArrayView2<f32>,
    labels: ArrayView1<f32>,
    rows: &[usize],
) -> Option<SplitCandidate> {
    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&row| labels[row] as f64).sum();
    let total_sq: f64 = rows.iter().map(|&row| (labels[row] as f64).powi(2)).sum();
    let parent_sse = total_sq - total * total / n;

    let mut best: Option<SplitCandidate> = None;
    let mut sorted = rows.to_vec();

    for feature in 0..features.ncols() {
        sorted.sort_unstable_by(|&a, &b| {
            features[[a, feature]]
                .partial_cmp(&features[[b, feature]])
                .unwrap_or(Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for i in 1..sorted.len() {
            let y = labels[sorted[i - 1]] as f64;
            left_sum += y;
            left_sq += y * y;

            let lo = features[[sorted[i - 1], feature]];
            let hi = features[[sorted[i], feature]];
            if lo >= hi {
                continue;
            }

            let left_n = i as f64;
            let right_n = n - left_n;
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;

            let sse = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);

            if best.as_ref().is_none_or(|b| sse < b.sse) {
                let mid = lo + (hi - lo) / 2.0;
                let threshold = if mid >= hi { lo } else { mid };

                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    sse,
                });
            }
        }
    }

    best.filter(|b| b.sse < parent_sse - parent_sse.abs() * 1e-12)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn params(max_depth: Option<usize>) -> ForestParams {
        ForestParams {
            max_depth,
            min_samples_split: 2,
            bootstrap: false,
        }
    }

    #[test]
    fn fits_a_step_function_exactly() {
        let x = array![[0.0_f32], [1.0], [2.0], [3.0]];
        let y = array![1.0_f32, 1.0, 5.0, 5.0];
        let rows = [0, 1, 2, 3];

        let tree = Tree::fit(x.view(), y.view(), &rows, &params(None)).unwrap();
        assert_eq!(tree.node_count(), 3);

        let predicted = tree.predict(x.view()).unwrap();
        assert_eq!(predicted, y);
    }

    #[test]
    fn depth_zero_is_the_mean() {
        let x = array![[0.0_f32], [1.0], [2.0], [3.0]];
        let y = array![1.0_f32, 2.0, 3.0, 6.0];

        let tree = Tree::fit(x.view(), y.view(), &[0, 1, 2, 3], &params(Some(0))).unwrap();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict(x.view()).unwrap(), array![3.0_f32, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn constant_features_produce_a_leaf() {
        let x = array![[1.0_f32, 2.0], [1.0, 2.0]];
        let y = array![0.0_f32, 10.0];

        let tree = Tree::fit(x.view(), y.view(), &[0, 1], &params(None)).unwrap();
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn predict_rejects_narrow_features() {
        let x = array![[0.0_f32, 1.0], [1.0, 0.0]];
        let y = array![0.0_f32, 1.0];
        let tree = Tree::fit(x.view(), y.view(), &[0, 1], &params(None)).unwrap();

        let narrow = array![[0.0_f32]];
        assert!(tree.predict(narrow.view()).is_err());
    }

    #[test]
    fn decode_rejects_cycles() {
        let looping = br#"{"n_features":1,"nodes":[{"split":{"feature":0,"threshold":0.0,"left":0,"right":0}}]}"#;
        assert!(matches!(Tree::decode(looping), Err(ForestErr::Malformed(_))));
        assert!(matches!(Tree::decode(b"not json"), Err(ForestErr::Codec(_))));
    }
}
