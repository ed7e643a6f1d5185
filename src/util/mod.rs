//! Small concurrency utilities shared across modules.

mod closable;

pub use closable::{Closer, Closable};
