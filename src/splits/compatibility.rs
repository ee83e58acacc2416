use serde::Serialize;

use crate::splits::asplit::ASplit;
use crate::splits::bipartition::BiPartition;
use crate::splits::cycle::contiguous_interval;

/// How a split system relates to trees and circular orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    #[default]
    Unknown,
    /// Pairwise compatible: the splits form a tree.
    Compatible,
    /// Every split is an arc of the given cycle.
    Cyclic,
    Incompatible,
}

impl Compatibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compatibility::Unknown => "unknown",
            Compatibility::Compatible => "compatible",
            Compatibility::Cyclic => "cyclic",
            Compatibility::Incompatible => "incompatible",
        }
    }
}

/// Is the part of `split` not containing `cycle[1]` a contiguous run of `cycle`?
pub fn is_circular(split: &ASplit, cycle: &[usize]) -> bool {
    cycle.len() > 1 && contiguous_interval(split.part_not_containing(cycle[1]), cycle).is_some()
}

pub fn is_compatible(splits: &[ASplit]) -> bool {
    splits.iter().enumerate().all(|(i, s)| {
        splits[i + 1..]
            .iter()
            .all(|t| BiPartition::are_compatible(s.base(), t.base()))
    })
}

pub fn is_cyclic(splits: &[ASplit], cycle: &[usize]) -> bool {
    splits.iter().all(|s| is_circular(s, cycle))
}

pub fn compute_compatibility(splits: &[ASplit], cycle: &[usize]) -> Compatibility {
    if is_compatible(splits) {
        Compatibility::Compatible
    } else if is_cyclic(splits, cycle) {
        Compatibility::Cyclic
    } else {
        Compatibility::Incompatible
    }
}
