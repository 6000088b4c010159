use super::dag::{Step, WorkflowDag};
use super::operation::{CallOptions, Operation};
use crate::error::{FlowError, FlowResult};
use crate::types::StepId;
use bytes::Bytes;

/// A workflow under construction.
///
/// Steps are created on first reference, by `node` or by either end of `edge`.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    dag: WorkflowDag,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, id: impl Into<StepId>) -> StepBuilder<'_> {
        let id = id.into();
        StepBuilder {
            step: self.dag.add_vertex(&id),
        }
    }

    pub fn edge(&mut self, from: impl Into<StepId>, to: impl Into<StepId>) -> FlowResult<()> {
        self.dag.add_edge(&from.into(), &to.into())
    }

    /// Wire an edge from every step that declares an output to every other
    /// step that declares the same key as input. Existing edges are kept.
    ///
    /// Returns the number of edges added.
    pub fn assemble(&mut self) -> FlowResult<usize> {
        let steps: Vec<(StepId, Vec<String>, Vec<String>)> = self
            .dag
            .steps()
            .into_iter()
            .map(|s| (s.id.clone(), s.inputs().to_vec(), s.outputs().to_vec()))
            .collect();

        let mut added = 0;
        for (producer, _, outputs) in &steps {
            for (consumer, inputs, _) in &steps {
                if producer == consumer || self.dag.has_edge(producer, consumer) {
                    continue;
                }
                if outputs.iter().any(|key| inputs.contains(key)) {
                    self.dag.add_edge(producer, consumer)?;
                    added += 1;
                }
            }
        }
        tracing::debug!(edges = added, "assembled workflow edges from declared keys");
        Ok(added)
    }

    /// Fail if the graph has a cycle.
    pub fn validate(&self) -> FlowResult<()> {
        self.dag.detect_cycle()
    }

    pub fn dag(&self) -> &WorkflowDag {
        &self.dag
    }

    pub fn into_dag(self) -> WorkflowDag {
        self.dag
    }
}

impl From<WorkflowDag> for Workflow {
    fn from(dag: WorkflowDag) -> Self {
        Self { dag }
    }
}

/// Fluent access to one step of a [`Workflow`].
pub struct StepBuilder<'a> {
    step: &'a mut Step,
}

impl<'a> StepBuilder<'a> {
    /// Call a function behind the gateway.
    pub fn apply(self, function: impl Into<String>, options: CallOptions) -> Self {
        self.operation(Operation::function(function, options))
    }

    /// Call an explicit URL.
    pub fn request(self, url: impl Into<String>, options: CallOptions) -> Self {
        self.operation(Operation::http(url, options))
    }

    /// Transform the payload locally.
    pub fn modify(self, transform: impl Fn(Bytes) -> Result<Bytes, FlowError> + Send + Sync + 'static) -> Self {
        self.operation(Operation::transform(transform))
    }

    pub fn operation(self, operation: Operation) -> Self {
        self.step.push_operation(operation);
        self
    }

    pub fn inputs<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step.add_inputs(keys);
        self
    }

    pub fn outputs<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step.add_outputs(keys);
        self
    }

    pub fn id(&self) -> &StepId {
        &self.step.id
    }
}
