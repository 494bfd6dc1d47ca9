//! Worker pool for workflow execution
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────┐                                             │
//! │  │ Queue poll  │──► one task per workflow (TaskTracker)      │
//! │  └─────────────┘            │                                │
//! │                             ▼                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │     Activity execution (Semaphore-limited)          │    │
//! │  │  [Activity 1] [Activity 2] ... [Activity N]         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod pool;

pub(crate) use pool::{WorkerPool, WorkerPoolConfig};
