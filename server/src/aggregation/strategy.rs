use log::warn;

/// The closed set of aggregation policies, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// Per client, a uniform sample of `floor(count * ratio)` components.
    Random { ratio: f64 },
    /// Per client, the `floor(count * ratio)` components with the lowest error.
    BestTrees { ratio: f64 },
    /// Per client, every component correlating strictly above `threshold`.
    Threshold { threshold: f64 },
    /// The whole set of the single client whose ensemble has the lowest error.
    BestForest,
}

impl Strategy {
    /// Resolves a strategy by its configured name.
    ///
    /// Unknown names fall back to `Random`.
    pub fn from_name(name: &str, ratio: f64, threshold: f64) -> Self {
        match name {
            "random" => Self::Random { ratio },
            "best_trees" => Self::BestTrees { ratio },
            "threshold" => Self::Threshold { threshold },
            "best_forest" | "best_forests" => Self::BestForest,
            other => {
                warn!(strategy = other; "unknown aggregation strategy, falling back to random");
                Self::Random { ratio }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Random { .. } => "random",
            Self::BestTrees { .. } => "best_trees",
            Self::Threshold { .. } => "threshold",
            Self::BestForest => "best_forest",
        }
    }
}
