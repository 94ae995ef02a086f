//! Dense feature sets.
//!
//! Feature ids are small contiguous arena positions, so a word-packed bit set
//! is the natural representation for the filter output and for the merger's
//! running feature union.

use std::fmt;

use crate::model::FeatureId;

/// A set of features backed by a vector of u64 words.
///
/// The set grows automatically when inserting ids beyond the current capacity.
#[derive(Clone, Default)]
pub struct FeatureSet {
    words: Vec<u64>,
    /// Number of members (cached for O(1) len())
    count: usize,
}

impl FeatureSet {
    const BITS_PER_WORD: usize = 64;

    /// Creates an empty set sized for `capacity` features.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(Self::BITS_PER_WORD)],
            count: 0,
        }
    }

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    fn locate(id: FeatureId) -> (usize, u64) {
        let index = id.index();
        (index / Self::BITS_PER_WORD, 1u64 << (index % Self::BITS_PER_WORD))
    }

    #[inline]
    pub fn contains(&self, id: FeatureId) -> bool {
        let (word, mask) = Self::locate(id);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    /// Adds a feature. Returns true if it was not yet a member.
    pub fn insert(&mut self, id: FeatureId) -> bool {
        let (word, mask) = Self::locate(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let fresh = self.words[word] & mask == 0;
        if fresh {
            self.words[word] |= mask;
            self.count += 1;
        }
        fresh
    }

    /// Removes a feature. Returns true if it was a member.
    pub fn remove(&mut self, id: FeatureId) -> bool {
        let (word, mask) = Self::locate(id);
        let Some(w) = self.words.get_mut(word) else {
            return false;
        };
        let present = *w & mask != 0;
        if present {
            *w &= !mask;
            self.count -= 1;
        }
        present
    }

    /// True if any member of `ids` is in the set.
    pub fn contains_any<'a>(&self, ids: impl IntoIterator<Item = &'a FeatureId>) -> bool {
        ids.into_iter().any(|&id| self.contains(id))
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.count = 0;
    }

    /// Iterates members in ascending id order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

/// Equality is by members; trailing zero words from a larger capacity do not count.
impl PartialEq for FeatureSet {
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        self.count == other.count
            && short.iter().zip(long.iter()).all(|(a, b)| a == b)
            && long[short.len()..].iter().all(|&w| w == 0)
    }
}

impl Eq for FeatureSet {}

impl Extend<FeatureId> for FeatureSet {
    fn extend<I: IntoIterator<Item = FeatureId>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl FromIterator<FeatureId> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = FeatureId>>(iter: I) -> Self {
        let mut set = FeatureSet::new();
        set.extend(iter);
        set
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the members of a [`FeatureSet`].
pub struct Iter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for Iter<'_> {
    type Item = FeatureId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1; // clear lowest set bit
                return Some(FeatureId::new(self.word_idx * FeatureSet::BITS_PER_WORD + bit));
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}
