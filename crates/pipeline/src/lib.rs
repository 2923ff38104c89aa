pub mod config;
pub mod error;
pub mod retry;
pub mod runner;

pub use config::{PipelineConfig, RetryConfig};
pub use error::{ItemFailure, PipelineError, StageReport};
pub use retry::RetryPolicy;
pub use runner::Pipeline;
