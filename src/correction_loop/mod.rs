pub mod error_classifier;
pub mod orchestrator;
pub mod repair;

pub use error_classifier::*;
pub use orchestrator::*;
pub use repair::*;
