//! Batch orchestration: selection, chunking, fan-out execution and throttling

pub mod chunker;
pub mod coordinator;
pub mod executor;
pub mod selector;
pub mod throttle;
pub mod types;

pub use chunker::*;
pub use coordinator::*;
pub use executor::*;
pub use selector::*;
pub use throttle::*;
pub use types::*;
