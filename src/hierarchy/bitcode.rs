//! Growable bit set used for hierarchy codes and field masks.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

const WORD_BITS: usize = 64;

/// A growable set of bit indices.
///
/// Two inline words cover the first 128 types without allocating.
/// Equality and hashing ignore trailing zero words.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BitCode {
    words: SmallVec<[u64; 2]>,
}

impl BitCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bits(bits: impl IntoIterator<Item = usize>) -> Self {
        let mut code = Self::new();
        for bit in bits {
            code.set(bit);
        }
        code
    }

    pub fn set(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % WORD_BITS);
    }

    pub fn clear(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if word < self.words.len() {
            self.words[word] &= !(1u64 << (bit % WORD_BITS));
            self.trim();
        }
    }

    pub fn get(&self, bit: usize) -> bool {
        self.word(bit / WORD_BITS) & (1u64 << (bit % WORD_BITS)) != 0
    }

    /// In-place OR.
    pub fn union_with(&mut self, other: &BitCode) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (i, w) in other.words.iter().enumerate() {
            self.words[i] |= w;
        }
        self.trim();
    }

    /// `(self & other) == self`
    pub fn is_subset_of(&self, other: &BitCode) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(i, w)| w & other.word(i) == *w)
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..WORD_BITS)
                .filter(move |b| w & (1u64 << b) != 0)
                .map(move |b| i * WORD_BITS + b)
        })
    }

    fn word(&self, i: usize) -> u64 {
        self.words.get(i).copied().unwrap_or(0)
    }

    fn significant_words(&self) -> &[u64] {
        let len = self.words.iter().rposition(|w| *w != 0).map_or(0, |p| p + 1);
        &self.words[..len]
    }

    fn trim(&mut self) {
        let len = self.significant_words().len();
        self.words.truncate(len);
    }
}

impl PartialEq for BitCode {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for BitCode {}

impl Hash for BitCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_words().hash(state);
    }
}

impl fmt::Debug for BitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for BitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, bit) in self.iter_ones().enumerate() {
            if i > 0 { write!(f, ", ")?; }
            write!(f, "{bit}")?;
        }
        write!(f, "}}")
    }
}
