pub mod minhash;
pub mod nodegraph;
