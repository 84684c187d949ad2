//! A compact bit set over token indices.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Set of token indices, stored as a bit vector.
///
/// Used both for the tokens valid in a parse state and for the external
/// tokens offered to an [`ExternalScanner`](crate::lexer::ExternalScanner).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    blocks: SmallVec<[u64; 4]>,
}

impl TokenSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u32) {
        let block = (index / 64) as usize;
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        self.blocks[block] |= 1 << (index % 64);
    }

    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        let block = (index / 64) as usize;
        self.blocks
            .get(block)
            .is_some_and(|bits| bits & (1 << (index % 64)) != 0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn extend_from(&mut self, other: &Self) {
        if other.blocks.len() > self.blocks.len() {
            self.blocks.resize(other.blocks.len(), 0);
        }
        for (dst, src) in self.blocks.iter_mut().zip(&other.blocks) {
            *dst |= src;
        }
    }

    /// Iterate set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().enumerate().flat_map(|(block, &bits)| {
            (0..64)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| (block * 64) as u32 + bit)
        })
    }
}

impl FromIterator<u32> for TokenSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = Self::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}
