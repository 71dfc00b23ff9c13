pub mod pool;
pub mod uint;

pub use pool::{ChunkedPool, Handle, LocalPool, SharedPool};
