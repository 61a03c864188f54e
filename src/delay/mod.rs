//! Artificial latency, for exercising slow paths in tests and demos.

mod delayed;
mod manual;

pub use delayed::DelayedStore;
pub use manual::ManuallyDelayedStore;
