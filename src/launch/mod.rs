//! Job launching: run identity, admission, dispatch and execution tracking.

pub mod coordinator;
pub mod job;
pub mod key;
pub mod params;
pub mod pool;
pub mod registry;
pub mod sweeper;

pub use coordinator::*;
pub use job::*;
pub use key::*;
pub use params::*;
pub use pool::*;
pub use registry::*;
pub use sweeper::*;
