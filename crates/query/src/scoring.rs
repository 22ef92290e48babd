use index::cosine_similarity;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::path::Path;

pub const HIGH_SEED_BONUS: f32 = 0.1;
pub const LOW_SEED_BONUS: f32 = 0.05;

/// Entity ids matched by the query, split by similarity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedTiers {
    pub high: BTreeSet<String>,
    pub low: BTreeSet<String>,
}

impl SeedTiers {
    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    /// Nodes the search starts from: the high tier, or the low tier when no
    /// match cleared the strict threshold.
    pub fn seeds(&self) -> &BTreeSet<String> {
        if self.high.is_empty() { &self.low } else { &self.high }
    }
}

/// Favors paths of 5 to 7 elements.
pub fn length_penalty(len: usize) -> f32 {
    if len < 5 {
        1.0 - 0.03 * (7 - len) as f32
    } else if len > 7 {
        1.0 - 0.05 * (len - 7) as f32
    } else {
        1.0
    }
}

/// `1.0` plus a bonus per seed entity on the path. Relations never count.
pub fn seed_bonus(path: &Path, tiers: &SeedTiers) -> f32 {
    path.nodes().iter().fold(1.0, |bonus, node| {
        if tiers.high.contains(&node.id) {
            bonus + HIGH_SEED_BONUS
        } else if tiers.low.contains(&node.id) {
            bonus + LOW_SEED_BONUS
        } else {
            bonus
        }
    })
}

pub struct PathScorer<'a> {
    query: &'a [f32],
    tiers: &'a SeedTiers,
}

impl<'a> PathScorer<'a> {
    pub fn new(query: &'a [f32], tiers: &'a SeedTiers) -> Self {
        Self { query, tiers }
    }

    pub fn score(&self, path: &Path) -> f32 {
        let similarity = path
            .embeddings()
            .map(|e| cosine_similarity(self.query, e))
            .sum::<f32>()
            / path.len() as f32;

        similarity * length_penalty(path.len()) * seed_bonus(path, self.tiers)
    }
}
