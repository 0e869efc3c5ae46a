//! Key images consumed by main-chain transactions.

use std::collections::HashSet;

use shroud_core::error::ChainStateError;
use shroud_core::types::KeyImage;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpentKeyImages {
    images: HashSet<KeyImage>,
}

impl SpentKeyImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_set(images: HashSet<KeyImage>) -> Self {
        Self { images }
    }

    pub(crate) fn as_set(&self) -> &HashSet<KeyImage> {
        &self.images
    }

    pub fn is_spent(&self, image: &KeyImage) -> bool {
        self.images.contains(image)
    }

    /// Record `image` as spent. Callers reject double spends before getting
    /// here, so a repeat is an invariant violation.
    pub(crate) fn mark_spent(&mut self, image: KeyImage) -> Result<(), ChainStateError> {
        if !self.images.insert(image) {
            return Err(ChainStateError::AlreadySpent(image.to_string()));
        }
        Ok(())
    }

    /// Forget `image`. Returns whether it was present.
    pub(crate) fn unmark(&mut self, image: &KeyImage) -> bool {
        self.images.remove(image)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.images.clear();
    }
}
