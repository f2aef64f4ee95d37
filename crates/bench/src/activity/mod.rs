//! Activity abstractions
//!
//! Activities are the units of work a benchmark run is made of. They:
//! - May fail and be retried according to the retry policy
//! - Heartbeat progress details that survive into the next attempt
//! - Support cancellation via tokens

mod context;
mod definition;
mod host;

pub use context::{ActivityContext, InMemoryProgressReporter, ProgressReporter};
pub use definition::Activity;
pub use host::{ActivityHost, ActivityOptions};
