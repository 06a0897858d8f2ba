pub mod outcome;
pub mod scheduler;
pub mod validator;

pub use outcome::{ValidationMode, ValidationOutcome};
pub use scheduler::ValidationScheduler;
pub use validator::{FallbackPolicy, Validator, TIMEOUT_ERROR};
