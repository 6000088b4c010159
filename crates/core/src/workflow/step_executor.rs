use super::dag::Step;
use super::operation::{Operation, RunContext};
use crate::document::Document;
use crate::error::{FlowError, FlowResult};
use crate::types::StepId;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Owned copy of the parts of a step a worker needs.
#[derive(Debug, Clone)]
pub struct StepTask {
    pub step: StepId,
    operations: Vec<Operation>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl StepTask {
    pub fn from_step(step: &Step) -> Self {
        Self {
            step: step.id.clone(),
            operations: step.operations().to_vec(),
            inputs: step.inputs().to_vec(),
            outputs: step.outputs().to_vec(),
        }
    }
}

/// Read-only data shared by every worker of one wavefront.
#[derive(Debug)]
pub struct WavefrontInput {
    /// Raw request bytes, as received.
    pub request: Bytes,
    pub request_doc: Document,
    /// Merged result of the previous wavefront.
    pub parent: Document,
}

/// Runs the operation chain of a single step
pub struct StepExecutor {
    ctx: Arc<RunContext>,
}

impl StepExecutor {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Execute a step and return its published outputs, if any.
    ///
    /// An empty chain passes its input through, so a step without operations
    /// publishes its declared outputs straight from the bound input, or from the
    /// raw request when it declares no inputs.
    pub async fn execute(&self, task: &StepTask, data: &WavefrontInput) -> FlowResult<Option<Document>> {
        let mut payload = if task.inputs.is_empty() {
            data.request.clone()
        } else {
            bind_input(&task.inputs, &data.request_doc, &data.parent)
                .marshal()
                .map_err(|e| step_error(&task.step, "input binding", e))?
        };

        for operation in &task.operations {
            payload = operation
                .execute(payload, &self.ctx)
                .await
                .map_err(|e| step_error(&task.step, &operation.label(), e))?;
        }

        if payload.is_empty() {
            debug!(step = %task.step, "empty output, nothing to publish");
            return Ok(None);
        }

        let produced = Document::parse(&payload).map_err(|e| step_error(&task.step, "output projection", e))?;
        let published = produced.project(&task.outputs);
        if published.is_empty() {
            return Ok(None);
        }
        Ok(Some(published))
    }
}

/// Build a step's input from its declared keys.
///
/// Each key is looked up in the request and then in the parent result; the
/// parent value shadows the request value.
pub fn bind_input(inputs: &[String], request: &Document, parent: &Document) -> Document {
    let mut bound = Document::new();
    for key in inputs {
        if let Some(value) = request.get(key) {
            bound.set(key.clone(), value.clone());
        }
        if let Some(value) = parent.get(key) {
            bound.set(key.clone(), value.clone());
        }
    }
    bound
}

fn step_error(step: &StepId, operation: &str, source: FlowError) -> FlowError {
    FlowError::OperationFailed {
        step: step.clone(),
        operation: operation.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::workflow::dag::WorkflowDag;
    use crate::workflow::operation::tests::{context, MockTransport};
    use serde_json::json;
    use std::sync::Mutex;

    fn executor() -> StepExecutor {
        StepExecutor::new(Arc::new(context(
            RunConfig::default(),
            Arc::new(MockTransport::new(200, "")),
        )))
    }

    fn wavefront(request: &'static [u8], parent: Document) -> WavefrontInput {
        WavefrontInput {
            request: Bytes::from_static(request),
            request_doc: Document::parse(request).unwrap(),
            parent,
        }
    }

    fn task(build: impl FnOnce(&mut Step)) -> StepTask {
        let mut dag = WorkflowDag::new();
        let id = StepId::new("step");
        build(dag.add_vertex(&id));
        StepTask::from_step(dag.step(&id).unwrap())
    }

    #[test]
    fn test_bind_input_parent_shadows_request() {
        let request = Document::parse(br#"{"k":"from-request","only_req":1}"#).unwrap();
        let parent = Document::parse(br#"{"k":"from-parent","unrelated":2}"#).unwrap();
        let inputs = vec!["k".to_string(), "only_req".to_string(), "absent".to_string()];

        let bound = bind_input(&inputs, &request, &parent);

        assert_eq!(bound.get("k"), Some(&json!("from-parent")));
        assert_eq!(bound.get("only_req"), Some(&json!(1)));
        assert!(!bound.contains_key("unrelated"));
        assert!(!bound.contains_key("absent"));
    }

    #[tokio::test]
    async fn test_no_input_step_receives_raw_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let task = task(|step| {
            step.push_operation(Operation::transform(move |data| {
                recorder.lock().unwrap().push(data.clone());
                Ok(data)
            }));
        });
        let raw: &'static [u8] = b"{ \"request-id\" : \"bar\" }";

        executor().execute(&task, &wavefront(raw, Document::new())).await.unwrap();

        assert_eq!(&seen.lock().unwrap()[0][..], raw);
    }

    #[tokio::test]
    async fn test_declared_inputs_are_marshalled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let task = task(|step| {
            step.add_inputs(["k"]);
            step.push_operation(Operation::transform(move |data| {
                recorder.lock().unwrap().push(data.clone());
                Ok(data)
            }));
        });
        let parent = Document::parse(br#"{"k":"new"}"#).unwrap();

        executor()
            .execute(&task, &wavefront(br#"{"k":"old","other":1}"#, parent))
            .await
            .unwrap();

        assert_eq!(&seen.lock().unwrap()[0][..], br#"{"k":"new"}"#);
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_projects_outputs() {
        let task = task(|step| {
            step.add_outputs(["b"]);
            step.push_operation(Operation::transform(|_| Ok(Bytes::from_static(br#"{"a":1}"#))));
            step.push_operation(Operation::transform(|data| {
                let mut doc = Document::parse(&data)?;
                doc.set("b", 2);
                doc.set("extra", 3);
                doc.marshal()
            }));
        });

        let published = executor()
            .execute(&task, &wavefront(b"{}", Document::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(published.len(), 1);
        assert_eq!(published.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_no_declared_outputs_publishes_nothing() {
        let task = task(|step| {
            step.push_operation(Operation::transform(|_| Ok(Bytes::from_static(br#"{"a":1}"#))));
        });

        let published = executor()
            .execute(&task, &wavefront(b"{}", Document::new()))
            .await
            .unwrap();

        assert!(published.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_projects_from_input() {
        let task = task(|step| {
            step.add_inputs(["in_foo"]);
            step.add_outputs(["in_foo"]);
        });

        let published = executor()
            .execute(&task, &wavefront(br#"{"in_foo":"in_bar"}"#, Document::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(published.get("in_foo"), Some(&json!("in_bar")));
    }

    #[tokio::test]
    async fn test_failure_aborts_chain() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let task = task(|step| {
            step.add_outputs(["x"]);
            step.push_operation(Operation::transform(|_| Err(FlowError::transform("boom"))));
            step.push_operation(Operation::transform(move |data| {
                *counter.lock().unwrap() += 1;
                Ok(data)
            }));
        });

        let err = executor()
            .execute(&task, &wavefront(b"{}", Document::new()))
            .await
            .unwrap_err();

        assert_eq!(*calls.lock().unwrap(), 0);
        match err {
            FlowError::OperationFailed { step, operation, .. } => {
                assert_eq!(step, StepId::new("step"));
                assert_eq!(operation, "transform");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_object_output_fails_step() {
        let task = task(|step| {
            step.add_outputs(["x"]);
            step.push_operation(Operation::transform(|_| Ok(Bytes::from_static(b"plain text"))));
        });

        let err = executor()
            .execute(&task, &wavefront(b"{}", Document::new()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("output projection"));
    }

    #[tokio::test]
    async fn test_bare_step_projects_from_raw_request() {
        let task = task(|step| {
            step.add_outputs(["in_foo"]);
        });

        let published = executor()
            .execute(&task, &wavefront(br#"{"in_foo":"in_bar","other":1}"#, Document::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(published.len(), 1);
        assert_eq!(published.get("in_foo"), Some(&json!("in_bar")));
    }
}
