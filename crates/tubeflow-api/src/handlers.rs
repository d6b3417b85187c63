//! Request handlers.

pub mod health;
pub mod invocations;
pub mod progress;
pub mod schemas;

pub use health::*;
pub use invocations::*;
pub use progress::*;
pub use schemas::*;
