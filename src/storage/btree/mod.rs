#![forbid(unsafe_code)]

//! B+Tree index over 64-bit keys, built on the data-item layer.

mod node;
mod tree;

pub use node::{BALANCE, NODE_SIZE};
pub use tree::BPlusTree;
