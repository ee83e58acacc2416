pub mod phylo_graph;
pub mod phylo_splits_graph;
