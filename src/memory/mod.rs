pub mod pool;

pub use pool::{ScratchBuffer, ScratchPool};
