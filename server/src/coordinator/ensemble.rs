use std::sync::Arc;

use forest::{Component, encode_all};
use rayon::prelude::*;

/// An immutable snapshot of the global ensemble together with its wire encoding.
///
/// It's replaced as a whole and never mutated, so every download sees a complete ensemble.
pub struct GlobalEnsemble<C> {
    components: Arc<[Arc<C>]>,
    encoded: Arc<[Vec<u8>]>,
}

impl<C> Clone for GlobalEnsemble<C> {
    fn clone(&self) -> Self {
        Self {
            components: Arc::clone(&self.components),
            encoded: Arc::clone(&self.encoded),
        }
    }
}

impl<C: Component> GlobalEnsemble<C> {
    /// Encodes every component, this is CPU bound.
    pub fn encode(components: Vec<Arc<C>>) -> forest::Result<Self> {
        let encoded = encode_all(components.par_iter().map(|c| &**c))?;

        Ok(Self {
            components: components.into(),
            encoded: encoded.into(),
        })
    }

    pub fn components(&self) -> &[Arc<C>] {
        &self.components
    }

    pub fn encoded(&self) -> &[Vec<u8>] {
        &self.encoded
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The total size of the encoded components.
    pub fn byte_size(&self) -> usize {
        self.encoded.iter().map(Vec::len).sum()
    }
}
