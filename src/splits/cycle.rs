use anyhow::{Result, bail};
use fixedbitset::FixedBitSet;

use crate::error::NetworkError;

/// `[0, 1, 2, ..., n]`. Cycles carry a leading 0 sentinel so `cycle[i]` is the taxon at
/// 1-based position `i`.
pub fn identity_cycle(n: usize) -> Vec<usize> {
    (0..=n).collect()
}

/// Check that `cycle` is `[0, π(1), ..., π(n)]` for a permutation π of `1..=n`.
pub fn validate_cycle(cycle: &[usize]) -> Result<()> {
    if cycle.len() < 2 || cycle[0] != 0 {
        bail!(NetworkError::invalid(
            "cycle must start with a 0 sentinel followed by at least one taxon"
        ));
    }
    let n = cycle.len() - 1;
    let mut seen = FixedBitSet::with_capacity(n + 1);
    for &t in &cycle[1..] {
        if t == 0 || t > n {
            bail!(NetworkError::invalid(format!(
                "cycle entry {} is outside 1..={}",
                t, n
            )));
        }
        if seen.contains(t) {
            bail!(NetworkError::invalid(format!("taxon {} appears twice in cycle", t)));
        }
        seen.insert(t);
    }
    Ok(())
}

/// Rotate `cycle` so that position 1 holds taxon 1. Pure rotation, never a reflection.
pub fn normalize_cycle(cycle: &[usize]) -> Result<Vec<usize>> {
    validate_cycle(cycle)?;
    let n = cycle.len() - 1;
    // validated, so taxon 1 is present
    let i = (1..=n).find(|&i| cycle[i] == 1).unwrap_or(1);

    let mut out = Vec::with_capacity(n + 1);
    out.push(0);
    out.extend_from_slice(&cycle[i..]);
    out.extend_from_slice(&cycle[1..i]);
    Ok(out)
}

/// `pos[t]` is the 1-based position of taxon `t` in `cycle`; `pos[0] == 0`.
pub fn cycle_positions(cycle: &[usize]) -> Vec<usize> {
    let mut pos = vec![0usize; cycle.len()];
    for (i, &t) in cycle.iter().enumerate().skip(1) {
        pos[t] = i;
    }
    pos
}

/// Positions `(xp, xq)` of the first and last member of `part` when `part` occupies
/// one contiguous run of `cycle`, `None` otherwise. `part` must not contain `cycle[1]`.
pub fn contiguous_interval(part: &FixedBitSet, cycle: &[usize]) -> Option<(usize, usize)> {
    let mut first = None;
    let mut last = 0usize;
    let mut count = 0usize;
    for (i, &t) in cycle.iter().enumerate().skip(1) {
        if part.contains(t) {
            if first.is_none() {
                first = Some(i);
            }
            last = i;
            count += 1;
        }
    }
    let xp = first?;
    (last - xp + 1 == count).then_some((xp, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splits::bipartition::taxa_set;
    use pretty_assertions::assert_eq;

    #[test]
    fn rotates_taxon_one_to_front() {
        assert_eq!(normalize_cycle(&[0, 3, 4, 1, 2]).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(normalize_cycle(&[0, 1, 5, 2]).unwrap_err().to_string().contains("outside"), true);
    }

    #[test]
    fn normalization_is_idempotent() {
        let perms: [&[usize]; 4] = [
            &[0, 1],
            &[0, 2, 1],
            &[0, 5, 3, 1, 4, 2],
            &[0, 4, 6, 2, 5, 1, 3],
        ];
        for c in perms {
            let once = normalize_cycle(c).unwrap();
            let twice = normalize_cycle(&once).unwrap();
            assert_eq!(once, twice);
            assert_eq!(once[1], 1);
            // cyclic successor of every taxon is preserved
            let n = c.len() - 1;
            let pos = cycle_positions(&once);
            for i in 1..=n {
                let succ = c[if i == n { 1 } else { i + 1 }];
                let j = pos[c[i]];
                assert_eq!(once[if j == n { 1 } else { j + 1 }], succ);
            }
        }
    }

    #[test]
    fn rejects_non_permutations() {
        assert!(validate_cycle(&[0, 1, 1]).is_err());
        assert!(validate_cycle(&[1, 2]).is_err());
        assert!(validate_cycle(&[0]).is_err());
    }

    #[test]
    fn interval_detection() {
        let cycle = vec![0, 1, 4, 2, 5, 3];
        assert_eq!(contiguous_interval(&taxa_set(5, &[2, 4]), &cycle), Some((2, 3)));
        assert_eq!(contiguous_interval(&taxa_set(5, &[3]), &cycle), Some((5, 5)));
        assert_eq!(contiguous_interval(&taxa_set(5, &[2, 3]), &cycle), None);
    }
}
