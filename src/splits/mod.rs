pub mod asplit;
pub mod bipartition;
pub mod compatibility;
pub mod cycle;
