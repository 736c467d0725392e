use std::sync::Arc;

use forest::{Component, Dataset, metrics, predict_mean};
use log::debug;
use ndarray::ArrayView1;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use super::{Aggregate, AggregationErr, Result, Strategy, Submission};

type Metric = fn(ArrayView1<f32>, ArrayView1<f32>) -> forest::Result<f64>;

/// Applies the configured `Strategy` to the submissions of a round.
pub struct Aggregator {
    strategy: Strategy,
    rng: Mutex<StdRng>,
}

impl Aggregator {
    /// Creates a new `Aggregator`.
    ///
    /// # Arguments
    /// * `strategy` - The policy to apply every round.
    /// * `seed` - Seeds the sampling of `Random`, taken from the os if absent.
    pub fn new(strategy: Strategy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            strategy,
            rng: Mutex::new(rng),
        }
    }
}

impl<C: Component> Aggregate<C> for Aggregator {
    fn select(&self, submissions: &[Submission<C>], validation: &Dataset) -> Result<Vec<Arc<C>>> {
        let selected = match self.strategy {
            Strategy::Random { ratio } => {
                let mut rng = self.rng.lock();

                submissions
                    .iter()
                    .flat_map(|s| random_subset(&s.components, ratio, &mut *rng))
                    .collect()
            }
            Strategy::BestTrees { ratio } => {
                let mut selected = Vec::new();

                for submission in submissions {
                    let components = &submission.components;
                    let errors = score(components, validation, metrics::mean_absolute_error)?;
                    let keep = keep_count(components.len(), ratio);

                    selected.extend(
                        lowest(&errors, keep)
                            .into_iter()
                            .map(|i| Arc::clone(&components[i])),
                    );
                }

                selected
            }
            Strategy::Threshold { threshold } => {
                let mut selected = Vec::new();

                for submission in submissions {
                    let components = &submission.components;
                    let correlations = score(components, validation, metrics::pearson)?;

                    selected.extend(
                        above_threshold(&correlations, threshold)
                            .into_iter()
                            .map(|i| Arc::clone(&components[i])),
                    );
                }

                selected
            }
            Strategy::BestForest => best_forest(submissions, validation)?,
        };

        debug!(
            strategy = self.strategy.name(),
            submissions = submissions.len(),
            selected = selected.len();
            "selected the next global ensemble"
        );

        Ok(selected)
    }
}

/// `floor(count * ratio)`, never above `count`.
fn keep_count(count: usize, ratio: f64) -> usize {
    ((count as f64 * ratio).floor() as usize).min(count)
}

fn random_subset<C, R>(components: &[Arc<C>], ratio: f64, rng: &mut R) -> Vec<Arc<C>>
where
    R: Rng + ?Sized,
{
    let keep = keep_count(components.len(), ratio);

    if keep >= components.len() {
        return components.to_vec();
    }

    rand::seq::index::sample(rng, components.len(), keep)
        .into_iter()
        .map(|i| Arc::clone(&components[i]))
        .collect()
}

/// Scores every component on its own against the validation labels, in parallel.
fn score<C: Component>(
    components: &[Arc<C>],
    validation: &Dataset,
    metric: Metric,
) -> forest::Result<Vec<f64>> {
    components
        .par_iter()
        .map(|component| {
            let predicted = component.predict(validation.features())?;
            metric(validation.labels(), predicted.view())
        })
        .collect()
}

/// The indices of the `keep` lowest scores, lowest first.
fn lowest(scores: &[f64], keep: usize) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..scores.len()).collect();
    idxs.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    idxs.truncate(keep);
    idxs
}

/// The indices whose score is strictly above `threshold`, NaN never passes.
fn above_threshold(scores: &[f64], threshold: f64) -> Vec<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > threshold)
        .map(|(i, _)| i)
        .collect()
}

fn best_forest<C: Component>(
    submissions: &[Submission<C>],
    validation: &Dataset,
) -> Result<Vec<Arc<C>>> {
    let errors: Vec<Option<f64>> = submissions
        .par_iter()
        .map(|submission| -> forest::Result<Option<f64>> {
            if submission.components.is_empty() {
                return Ok(None);
            }

            let components = submission.components.iter().map(|c| &**c);
            let predicted = predict_mean(components, validation.features())?;
            let error = metrics::mean_absolute_error(validation.labels(), predicted.view())?;
            Ok(Some(error))
        })
        .collect::<forest::Result<_>>()?;

    let mut best: Option<(usize, f64)> = None;

    for (i, error) in errors.into_iter().enumerate() {
        let Some(error) = error else { continue };

        if best.is_none_or(|(_, lowest)| error < lowest) {
            best = Some((i, error));
        }
    }

    let (winner, error) = best.ok_or(AggregationErr::NoSubmissions)?;
    debug!(client_id = submissions[winner].client_id, error = error; "best forest chosen");

    Ok(submissions[winner].components.clone())
}
