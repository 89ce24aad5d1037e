//! Dependency-ordered job pipeline: the four-phase job contract, the
//! dispatcher that plans and runs the minimal job set for a requested
//! output, and the built-in jobs.

pub mod dispatcher;
pub mod job;
pub mod jobs;

pub use dispatcher::{BatchSummary, Dispatcher};
pub use job::{BatchContext, Job};
