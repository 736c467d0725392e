use ndarray::{Array1, ArrayView2};
use rayon::prelude::*;

use crate::{ForestErr, Result};

/// The atomic unit of an ensemble, it can be moved over the wire and scored on its own.
pub trait Component: Sized + Send + Sync + 'static {
    /// Predicts one value per row of `features`.
    ///
    /// # Returns
    /// A `SizeMismatch` if `features` has fewer columns than the component was fitted with.
    fn predict(&self, features: ArrayView2<f32>) -> Result<Array1<f32>>;

    /// Serializes this component into an opaque blob.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Rebuilds a component from a blob produced by `encode`.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Averages the predictions of every component, the way a forest predicts.
///
/// # Returns
/// `EmptyEnsemble` if there are no components.
pub fn predict_mean<'a, C, I>(components: I, features: ArrayView2<f32>) -> Result<Array1<f32>>
where
    C: Component + 'a,
    I: IntoIterator<Item = &'a C>,
{
    let mut count = 0;
    let mut sum = Array1::<f32>::zeros(features.nrows());

    for component in components {
        sum += &component.predict(features)?;
        count += 1;
    }

    if count == 0 {
        return Err(ForestErr::EmptyEnsemble);
    }

    sum /= count as f32;
    Ok(sum)
}

/// Encodes many components in parallel, keeping their order.
pub fn encode_all<'a, C, I>(components: I) -> Result<Vec<Vec<u8>>>
where
    C: Component + 'a,
    I: IntoParallelIterator<Item = &'a C>,
    I::Iter: IndexedParallelIterator,
{
    components.into_par_iter().map(C::encode).collect()
}

/// Decodes many blobs in parallel, keeping their order.
pub fn decode_all<C, B>(blobs: &[B]) -> Result<Vec<C>>
where
    C: Component,
    B: AsRef<[u8]> + Sync,
{
    blobs.par_iter().map(|blob| C::decode(blob.as_ref())).collect()
}
