pub mod builder;
pub mod dag;
pub mod executor;
pub mod operation;
pub mod step_executor;

pub use builder::{StepBuilder, Workflow};
pub use dag::{Step, WorkflowDag};
pub use executor::WorkflowExecutor;
pub use operation::{CallOptions, Operation, OperationKind, RunContext};
pub use step_executor::{bind_input, StepExecutor};
