//! Activity abstractions
//!
//! Activities are units of work that are executed by workers. They:
//! - May fail and be retried according to the retry policy
//! - Observe worker shutdown through a cancellation token

mod context;
mod definition;

pub use context::ActivityContext;
pub use definition::{Activity, ActivityError, FnActivity};
