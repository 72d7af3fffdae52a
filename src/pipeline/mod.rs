// Step pipeline execution
//
// Steps, the executor running normal and error pipelines, the registry
// resolving configured step identifiers, and the built-in steps.

pub mod executor;
pub mod registry;
pub mod step;
pub mod steps;

// Re-export main types for convenient access
pub use executor::{PipelineError, PipelineKind, StepExecutor};
pub use registry::{StepDependencies, StepFactory, StepRegistry};
pub use step::{Step, StepOutcome, StepResult};
