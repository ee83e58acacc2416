use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail};
use fixedbitset::FixedBitSet;

use crate::error::NetworkError;
use crate::splits::asplit::{ASplit, SplitSummary};
use crate::splits::bipartition::cardinality;
use crate::splits::compatibility::Compatibility;
use crate::splits::cycle::normalize_cycle;

/// Ordered, weighted splits over a fixed taxon set, with 1-based ids.
#[derive(Debug, Clone, Default)]
pub struct SplitsBlock {
    splits: Vec<ASplit>,
    compatibility: Compatibility,
    fit: f32,
    threshold: f64,
    cycle: Option<Vec<usize>>,
    split_labels: BTreeMap<usize, String>,
}

impl SplitsBlock {
    pub fn new() -> Self {
        Self {
            fit: -1.0,
            ..Default::default()
        }
    }

    pub fn from_splits(splits: Vec<ASplit>) -> Self {
        let mut block = Self::new();
        block.splits = splits;
        block
    }

    pub fn nsplits(&self) -> usize {
        self.splits.len()
    }
    pub fn splits(&self) -> impl Iterator<Item = &ASplit> {
        self.splits.iter()
    }
    pub fn get_splits(&self) -> &[ASplit] {
        &self.splits
    }

    /// 1-based accessor.
    pub fn get(&self, i: usize) -> &ASplit {
        &self.splits[i - 1]
    }

    /// Push a split; returns its 1-based id.
    pub fn push(&mut self, s: ASplit) -> usize {
        self.splits.push(s);
        self.splits.len()
    }

    pub fn set_compatibility(&mut self, c: Compatibility) {
        self.compatibility = c;
    }
    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    pub fn set_fit(&mut self, fit: f32) {
        self.fit = fit;
    }
    /// Least-squares fit in percent, `-1` when not computed.
    pub fn fit(&self) -> f32 {
        self.fit
    }

    pub fn set_threshold(&mut self, thr: f64) {
        self.threshold = thr;
    }
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_split_label<S: Into<String>>(&mut self, sid: usize, label: S) {
        self.split_labels.insert(sid, label.into());
    }

    /// Label from the block's own table, falling back to the split's label.
    pub fn split_label(&self, sid: usize) -> Option<&str> {
        self.split_labels
            .get(&sid)
            .map(String::as_str)
            .or_else(|| self.get(sid).get_label())
    }

    /// The `[0, t1, ..., tn]` cycle, normalised so that `cycle[1] == 1`.
    pub fn cycle(&self) -> Option<&[usize]> {
        self.cycle.as_deref()
    }

    /// Store a `[0, t1..tn]` cycle, rotating it so that taxon 1 comes first.
    pub fn set_cycle(&mut self, cycle: &[usize]) -> Result<()> {
        self.cycle = Some(normalize_cycle(cycle)?);
        Ok(())
    }

    /// Taxa in (side P of split p) ∩ (side Q of split q); `true` selects part A.
    pub fn intersect2(&self, split_p: usize, side_p: bool, split_q: usize, side_q: bool) -> FixedBitSet {
        let sp = self.get(split_p);
        let sq = self.get(split_q);
        let mut out = if side_p { sp.get_a() } else { sp.get_b() }.clone();
        let other = if side_q { sq.get_a() } else { sq.get_b() };
        out.grow(other.len());
        out.intersect_with(other);
        out
    }

    /// Reject splits over the wrong taxon set, empty sides, negative weights and
    /// repeated bipartitions, plus a cycle over a different taxon count.
    pub fn validate(&self, ntax: usize) -> Result<()> {
        let mut first_seen = HashMap::with_capacity(self.splits.len());
        for (i, s) in self.splits.iter().enumerate() {
            let id = i + 1;
            let a = cardinality(s.get_a());
            let b = cardinality(s.get_b());
            if a == 0 || b == 0 || a + b != ntax {
                bail!(NetworkError::invalid(format!(
                    "split {} has part sizes {} and {}, expected a bipartition of {} taxa",
                    id, a, b, ntax
                )));
            }
            let max_taxon = s.get_a().ones().chain(s.get_b().ones()).max().unwrap_or(0);
            if max_taxon > ntax || s.get_a().contains(0) || s.get_b().contains(0) {
                bail!(NetworkError::invalid(format!(
                    "split {} refers to taxa outside 1..={}",
                    id, ntax
                )));
            }
            if !(s.weight >= 0.0) || !s.weight.is_finite() {
                bail!(NetworkError::invalid(format!(
                    "split {} has invalid weight {}",
                    id, s.weight
                )));
            }
            if let Some(prev) = first_seen.insert(s.base(), id) {
                bail!(NetworkError::invalid(format!(
                    "split {} repeats the bipartition of split {}",
                    id, prev
                )));
            }
        }
        if let Some(c) = &self.cycle {
            if c.len() != ntax + 1 {
                bail!(NetworkError::invalid(format!(
                    "cycle covers {} taxa, expected {}",
                    c.len() - 1,
                    ntax
                )));
            }
        }
        Ok(())
    }

    pub fn summaries(&self) -> Vec<SplitSummary> {
        self.splits
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut sum = s.summary(i + 1);
                if let Some(l) = self.split_labels.get(&(i + 1)) {
                    sum.label = Some(l.clone());
                }
                sum
            })
            .collect()
    }
}
