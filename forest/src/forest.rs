use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::Deserialize;

use crate::{Dataset, ForestErr, Result, Tree};

/// Growth settings shared by every tree of a forest.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ForestParams {
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "ForestParams::default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "ForestParams::default_bootstrap")]
    pub bootstrap: bool,
}

impl ForestParams {
    fn default_min_samples_split() -> usize {
        2
    }

    fn default_bootstrap() -> bool {
        true
    }
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: Self::default_min_samples_split(),
            bootstrap: Self::default_bootstrap(),
        }
    }
}

/// Fits `n_trees` independent trees in parallel.
///
/// Each tree gets its own generator derived from `seed`, with `bootstrap` every tree
/// sees `len` rows drawn with replacement.
///
/// # Arguments
/// * `n_trees` - The size of the forest.
/// * `data` - The training rows.
/// * `params` - Growth settings.
/// * `seed` - The base seed.
pub fn fit_forest(
    n_trees: usize,
    data: &Dataset,
    params: &ForestParams,
    seed: u64,
) -> Result<Vec<Tree>> {
    if params.min_samples_split < 2 {
        return Err(ForestErr::InvalidParams(format!(
            "min_samples_split must be at least 2, got {}",
            params.min_samples_split
        )));
    }

    let len = data.len();
    debug!(trees = n_trees, rows = len, seed = seed; "fitting a forest");

    (0..n_trees)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));

            let rows: Vec<usize> = if params.bootstrap {
                (0..len).map(|_| rng.random_range(0..len)).collect()
            } else {
                (0..len).collect()
            };

            Tree::fit(data.features(), data.labels(), &rows, params)
        })
        .collect()
}
