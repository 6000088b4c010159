//! Error types for workflow building and execution.

use crate::types::StepId;
use std::time::Duration;

/// Result type for workflow operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Error types that can occur while building or running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The same edge was added twice.
    #[error("dag has duplicate edge {from} -> {to}")]
    DuplicateEdge { from: StepId, to: StepId },

    /// The graph contains a directed cycle.
    #[error("dag has cycle through steps {}", join_ids(.remaining))]
    CycleDetected { remaining: Vec<StepId> },

    /// An operation of a step failed and its failure hook did not absorb the error.
    #[error("step {step}: operation {operation} failed: {source}")]
    OperationFailed {
        step: StepId,
        operation: String,
        #[source]
        source: Box<FlowError>,
    },

    /// A document could not be encoded or decoded.
    #[error("document marshal failed: {0}")]
    Marshal(#[from] serde_json::Error),

    /// The run-wide deadline elapsed.
    #[error("deadline exceeded after {after:?}")]
    DeadlineExceeded { after: Duration },

    /// The run was cancelled by its caller.
    #[error("run cancelled")]
    Cancelled,

    /// Every failure collected in one wavefront.
    #[error("{} step(s) failed: [{}]", .causes.len(), join_errors(.causes))]
    Aggregate { causes: Vec<FlowError> },

    /// The outbound call could not be completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side answered with an unsuccessful status.
    #[error("invalid return status {status} while connecting {target}")]
    Status {
        status: u16,
        target: String,
        body: bytes::Bytes,
    },

    /// A local transform returned an error.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The outbound request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A worker task panicked before reporting.
    #[error("worker for step {step} panicked")]
    WorkerPanicked { step: StepId },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// Create a transform error from any displayable cause.
    pub fn transform(err: impl std::fmt::Display) -> Self {
        Self::Transform(err.to_string())
    }

    /// Every leaf cause, with aggregates flattened.
    pub fn causes(&self) -> Vec<&FlowError> {
        match self {
            Self::Aggregate { causes } => causes.iter().flat_map(|c| c.causes()).collect(),
            other => vec![other],
        }
    }

    /// Whether the error came from the run deadline, directly or wrapped by a step.
    pub fn is_deadline(&self) -> bool {
        match self {
            Self::DeadlineExceeded { .. } => true,
            Self::OperationFailed { source, .. } => source.is_deadline(),
            Self::Aggregate { causes } => causes.iter().any(|c| c.is_deadline()),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn join_errors(errors: &[FlowError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_message_lists_every_cause() {
        let err = FlowError::Aggregate {
            causes: vec![
                FlowError::Transform("boom".to_string()),
                FlowError::Transport("connection refused".to_string()),
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("2 step(s) failed"));
        assert!(msg.contains("transform failed: boom"));
        assert!(msg.contains("transport error: connection refused"));
    }

    #[test]
    fn test_cycle_message_names_steps() {
        let err = FlowError::CycleDetected {
            remaining: vec![StepId::new("a"), StepId::new("b")],
        };
        assert_eq!(err.to_string(), "dag has cycle through steps a, b");
    }

    #[test]
    fn test_is_deadline_sees_through_wrappers() {
        let err = FlowError::Aggregate {
            causes: vec![FlowError::OperationFailed {
                step: StepId::new("slow"),
                operation: "fetch".to_string(),
                source: Box::new(FlowError::DeadlineExceeded {
                    after: Duration::from_secs(1),
                }),
            }],
        };
        assert!(err.is_deadline());
        assert!(!FlowError::Cancelled.is_deadline());
        assert_eq!(err.causes().len(), 1);
    }
}
