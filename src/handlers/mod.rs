pub mod calls;
pub mod config;
pub mod queue;

pub use calls::*;
pub use config::*;
pub use queue::*;
