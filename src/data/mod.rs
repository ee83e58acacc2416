pub mod splits_blocks;
