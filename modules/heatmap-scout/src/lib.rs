pub mod infra;
pub mod pipeline;
pub mod scout;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
