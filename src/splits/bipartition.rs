use fixedbitset::FixedBitSet;
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

/// Bipartition of a 1-based taxon set into two non-empty parts A and B.
///
/// - Indices are expected to be 1..=ntax (bit 0 is ignored).
/// - The part holding the smallest taxon is stored as `A`, so `A` always contains taxon 1
///   when the bipartition covers the full taxon set.
#[derive(Debug, Clone)]
pub struct BiPartition {
    a: FixedBitSet,
    b: FixedBitSet,
}

impl BiPartition {
    /// Construct from two disjoint bit sets. Emptiness is checked by
    /// `SplitsBlock::validate`, not here.
    pub fn new(a: FixedBitSet, b: FixedBitSet) -> Self {
        let a_first = first_taxon(&a).unwrap_or(usize::MAX);
        let b_first = first_taxon(&b).unwrap_or(usize::MAX);
        if a_first < b_first {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }

    /// Total number of taxa: |A| + |B|.
    pub fn ntax(&self) -> usize {
        cardinality(&self.a) + cardinality(&self.b)
    }

    /// Size of the smaller side.
    pub fn size(&self) -> usize {
        cardinality(&self.a).min(cardinality(&self.b))
    }

    pub fn get_a(&self) -> &FixedBitSet {
        &self.a
    }

    pub fn get_b(&self) -> &FixedBitSet {
        &self.b
    }

    /// Part that contains taxon `t`; A when neither does.
    pub fn part_containing(&self, t: usize) -> &FixedBitSet {
        if self.b.contains(t) { &self.b } else { &self.a }
    }

    pub fn part_not_containing(&self, t: usize) -> &FixedBitSet {
        if self.a.contains(t) { &self.b } else { &self.a }
    }

    /// The smaller part; on tie, the one holding the smaller taxon.
    pub fn smaller_part(&self) -> &FixedBitSet {
        match cardinality(&self.a).cmp(&cardinality(&self.b)) {
            Ordering::Greater => &self.b,
            _ => &self.a,
        }
    }

    /// Pairwise compatibility: at least one of the four intersections is empty.
    pub fn are_compatible(s1: &BiPartition, s2: &BiPartition) -> bool {
        !intersects(&s1.a, &s2.a)
            || !intersects(&s1.a, &s2.b)
            || !intersects(&s1.b, &s2.a)
            || !intersects(&s1.b, &s2.b)
    }

    pub fn is_trivial(&self) -> bool {
        self.size() == 1
    }

    /// Does this split separate taxa `a` and `b`?
    pub fn separates(&self, a: usize, b: usize) -> bool {
        self.a.contains(a) != self.a.contains(b)
    }
}

impl PartialEq for BiPartition {
    fn eq(&self, other: &Self) -> bool {
        same_members(&self.a, &other.a) && same_members(&self.b, &other.b)
    }
}
impl Eq for BiPartition {}

impl Hash for BiPartition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for i in self.a.ones().filter(|&i| i != 0) {
            i.hash(state);
        }
        0usize.hash(state);
        for i in self.b.ones().filter(|&i| i != 0) {
            i.hash(state);
        }
    }
}

impl PartialOrd for BiPartition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BiPartition {
    /// Lexicographic on the ascending members of A, then of B.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_members(&self.a, &other.a).then_with(|| compare_members(&self.b, &other.b))
    }
}

impl Display for BiPartition {
    /// Formats as `{1,3,5} | {2,4}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}} | {{{}}}", join_members(&self.a, ","), join_members(&self.b, ","))
    }
}

/* ---- bitset helpers shared across the splits module ---- */

/// Number of taxa (bit 0 excluded).
pub fn cardinality(bs: &FixedBitSet) -> usize {
    bs.ones().filter(|&i| i != 0).count()
}

pub fn first_taxon(bs: &FixedBitSet) -> Option<usize> {
    bs.ones().find(|&i| i != 0)
}

/// A 1-based bitset of capacity `ntax + 1` holding `members`.
pub fn taxa_set(ntax: usize, members: &[usize]) -> FixedBitSet {
    let mut bs = FixedBitSet::with_capacity(ntax + 1);
    for &t in members {
        bs.insert(t);
    }
    bs
}

/// Complement of `a` within `1..=ntax`.
pub fn complement(a: &FixedBitSet, ntax: usize) -> FixedBitSet {
    let mut out = FixedBitSet::with_capacity(ntax + 1);
    for i in 1..=ntax {
        if !a.contains(i) {
            out.insert(i);
        }
    }
    out
}

pub fn join_members(bs: &FixedBitSet, sep: &str) -> String {
    bs.ones()
        .filter(|&i| i != 0)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

fn same_members(a: &FixedBitSet, b: &FixedBitSet) -> bool {
    a.ones().filter(|&i| i != 0).eq(b.ones().filter(|&i| i != 0))
}

fn intersects(a: &FixedBitSet, b: &FixedBitSet) -> bool {
    a.ones().any(|i| i != 0 && b.contains(i))
}

fn compare_members(a: &FixedBitSet, b: &FixedBitSet) -> Ordering {
    a.ones().filter(|&i| i != 0).cmp(b.ones().filter(|&i| i != 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_puts_smallest_taxon_in_a() {
        let p = BiPartition::new(taxa_set(5, &[2, 4]), taxa_set(5, &[1, 3, 5]));
        assert!(p.get_a().contains(1));
        assert!(p.get_b().contains(2));
        assert_eq!(p.to_string(), "{1,3,5} | {2,4}");
    }

    #[test]
    fn size_and_trivial() {
        let p = BiPartition::new(taxa_set(4, &[1]), taxa_set(4, &[2, 3, 4]));
        assert_eq!(p.ntax(), 4);
        assert_eq!(p.size(), 1);
        assert!(p.is_trivial());
        assert_eq!(cardinality(p.smaller_part()), 1);
    }

    #[test]
    fn compatibility() {
        let p1 = BiPartition::new(taxa_set(4, &[1, 2]), taxa_set(4, &[3, 4]));
        let p2 = BiPartition::new(taxa_set(4, &[1, 3]), taxa_set(4, &[2, 4]));
        let p3 = BiPartition::new(taxa_set(4, &[1]), taxa_set(4, &[2, 3, 4]));
        assert!(!BiPartition::are_compatible(&p1, &p2));
        assert!(BiPartition::are_compatible(&p1, &p3));
    }

    #[test]
    fn separates_and_parts() {
        let p = BiPartition::new(taxa_set(5, &[1, 2]), taxa_set(5, &[3, 4, 5]));
        assert!(p.separates(1, 3));
        assert!(!p.separates(4, 5));
        assert_eq!(join_members(p.part_not_containing(1), ","), "3,4,5");
        assert_eq!(join_members(p.part_containing(4), ","), "3,4,5");
    }

    #[test]
    fn ordering_is_lexicographic() {
        let p1 = BiPartition::new(taxa_set(5, &[1, 2]), taxa_set(5, &[3, 4, 5]));
        let p2 = BiPartition::new(taxa_set(5, &[1, 3]), taxa_set(5, &[2, 4, 5]));
        assert!(p1 < p2);
    }

    #[test]
    fn complement_skips_bit_zero() {
        let c = complement(&taxa_set(4, &[2]), 4);
        assert_eq!(join_members(&c, ","), "1,3,4");
        assert!(!c.contains(0));
    }
}
