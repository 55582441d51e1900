mod functions;
mod models;

pub use functions::{invoke_with_retry, run_step};
pub use models::{ContentCheck, ExpectedOutput, Step, StepOutcome};
