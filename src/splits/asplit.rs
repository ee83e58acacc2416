use fixedbitset::FixedBitSet;
use serde::Serialize;

use crate::splits::bipartition::{complement, join_members, BiPartition};
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

/// A split with weight, confidence and label on top of `BiPartition`.
/// Indices are 1-based (bit 0 is ignored).
#[derive(Debug, Clone)]
pub struct ASplit {
    pub base: BiPartition,
    pub weight: f64,
    pub confidence: f64,
    pub label: Option<String>,
}

impl ASplit {
    /// Split A | B with weight 1 and no confidence.
    pub fn new(a: FixedBitSet, b: FixedBitSet) -> Self {
        Self::new_full(a, b, 1.0, -1.0, None)
    }

    pub fn new_with_weight(a: FixedBitSet, b: FixedBitSet, weight: f64) -> Self {
        Self::new_full(a, b, weight, -1.0, None)
    }

    pub fn new_full(
        a: FixedBitSet,
        b: FixedBitSet,
        weight: f64,
        confidence: f64,
        label: Option<String>,
    ) -> Self {
        Self {
            base: BiPartition::new(a, b),
            weight,
            confidence,
            label,
        }
    }

    /* B is the complement of A in 1..=ntax */

    pub fn from_a_ntax(a: FixedBitSet, ntax: usize) -> Self {
        Self::from_a_ntax_full(a, ntax, 1.0, -1.0, None)
    }

    pub fn from_a_ntax_with_weight(a: FixedBitSet, ntax: usize, weight: f64) -> Self {
        Self::from_a_ntax_full(a, ntax, weight, -1.0, None)
    }

    pub fn from_a_ntax_full(
        a: FixedBitSet,
        ntax: usize,
        weight: f64,
        confidence: f64,
        label: Option<String>,
    ) -> Self {
        let mut a = a;
        a.grow(ntax + 1);
        let b = complement(&a, ntax);
        Self::new_full(a, b, weight, confidence, label)
    }

    pub fn get_weight(&self) -> f64 {
        self.weight
    }
    pub fn set_weight(&mut self, w: f64) {
        self.weight = w;
    }

    pub fn get_confidence(&self) -> f64 {
        self.confidence
    }

    pub fn get_label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    pub fn set_label<S: Into<String>>(&mut self, s: S) {
        self.label = Some(s.into());
    }

    pub fn get_a(&self) -> &FixedBitSet {
        self.base.get_a()
    }
    pub fn get_b(&self) -> &FixedBitSet {
        self.base.get_b()
    }
    pub fn ntax(&self) -> usize {
        self.base.ntax()
    }
    pub fn size(&self) -> usize {
        self.base.size()
    }
    pub fn part_containing(&self, t: usize) -> &FixedBitSet {
        self.base.part_containing(t)
    }
    pub fn part_not_containing(&self, t: usize) -> &FixedBitSet {
        self.base.part_not_containing(t)
    }
    pub fn smaller_part(&self) -> &FixedBitSet {
        self.base.smaller_part()
    }
    pub fn is_trivial(&self) -> bool {
        self.base.is_trivial()
    }
    pub fn separates(&self, a: usize, b: usize) -> bool {
        self.base.separates(a, b)
    }

    pub fn base(&self) -> &BiPartition {
        &self.base
    }

    /// Serializable view with the part not containing taxon 1 spelled out.
    pub fn summary(&self, id: usize) -> SplitSummary {
        SplitSummary {
            id,
            part: self.part_not_containing(1).ones().filter(|&t| t != 0).collect(),
            weight: self.weight,
            label: self.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SplitSummary {
    pub id: usize,
    pub part: Vec<usize>,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PartialEq for ASplit {
    /// Equality depends only on the partition; weight, confidence and label are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
    }
}
impl Eq for ASplit {}

impl Hash for ASplit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base.hash(state);
    }
}

impl Display for ASplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} weight={}", self.base, self.weight)?;
        if let Some(label) = &self.label {
            write!(f, " label={}", label)?;
        }
        Ok(())
    }
}

impl ASplit {
    /// The part not containing taxon 1 as `1 2 5`, the way split tables list them.
    pub fn part_string(&self) -> String {
        join_members(self.part_not_containing(1), " ")
    }
}
