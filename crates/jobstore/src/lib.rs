pub mod job;
pub mod store;

pub use job::{Job, JobStatus, Stage, StateError};
pub use store::{JobStore, PayloadKind};
