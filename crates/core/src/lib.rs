//! `quotegate-core`: shared primitives for the access-control layer.
//!
//! Identifiers, the error taxonomy, the clock abstraction and the owned
//! periodic-task handle used by the cache and the security aggregator.

pub mod clock;
pub mod error;
pub mod id;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, RemoteError};
pub use id::SubjectId;
pub use task::PeriodicTask;
