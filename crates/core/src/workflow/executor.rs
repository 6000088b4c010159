use super::builder::Workflow;
use super::dag::WorkflowDag;
use super::operation::RunContext;
use super::step_executor::{StepExecutor, StepTask, WavefrontInput};
use crate::config::{RunConfig, RunOptions};
use crate::document::Document;
use crate::error::{FlowError, FlowResult};
use crate::events::{Event, EventLog, EventType};
use crate::transport::Transport;
use crate::types::{RunId, StepId};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Workflow executor that drives the DAG wavefront by wavefront
pub struct WorkflowExecutor {
    config: RunConfig,
    transport: Arc<dyn Transport>,
    event_log: Option<Arc<dyn EventLog>>,
}

impl WorkflowExecutor {
    pub fn new(config: RunConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            event_log: None,
        }
    }

    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run a workflow on one JSON request and return the merged JSON result.
    pub async fn execute(&self, workflow: Workflow, request: &[u8]) -> FlowResult<Bytes> {
        self.execute_with_cancel(workflow, request, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but operations stop once `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        workflow: Workflow,
        request: &[u8],
        cancel: CancellationToken,
    ) -> FlowResult<Bytes> {
        let started_at = std::time::Instant::now();
        let request_doc = Document::parse(request)?;
        let options = self.config.resolve(&request_doc, cancel);
        let run_id = options.run_id;
        let mut dag = workflow.into_dag();

        tracing::info!(
            run_id = %run_id,
            request_id = %options.request_id,
            steps = dag.remaining_count(),
            "Starting workflow execution"
        );
        self.emit(
            run_id,
            EventType::RunStarted {
                request_id: options.request_id.clone(),
                steps: dag.remaining_count(),
            },
        )
        .await;

        let result = self
            .execute_dag(&mut dag, Bytes::copy_from_slice(request), request_doc, options)
            .await;
        let duration_ms = started_at.elapsed().as_millis() as u64;

        match result {
            Ok((output, wavefronts)) => {
                self.emit(
                    run_id,
                    EventType::RunCompleted {
                        wavefronts,
                        duration_ms,
                    },
                )
                .await;
                tracing::info!(run_id = %run_id, wavefronts, duration_ms, "Workflow execution completed");
                Ok(output)
            }
            Err(e) => {
                self.emit(
                    run_id,
                    EventType::RunFailed {
                        error: e.to_string(),
                        duration_ms,
                    },
                )
                .await;
                tracing::error!(run_id = %run_id, error = %e, "Workflow execution failed");
                Err(e)
            }
        }
    }

    /// Execute the DAG; returns the final merged result and the wavefront count.
    async fn execute_dag(
        &self,
        dag: &mut WorkflowDag,
        request: Bytes,
        request_doc: Document,
        options: RunOptions,
    ) -> FlowResult<(Bytes, usize)> {
        dag.detect_cycle()?;

        let run_id = options.run_id;
        let ctx = Arc::new(RunContext {
            options,
            transport: self.transport.clone(),
        });
        let step_executor = Arc::new(StepExecutor::new(ctx));
        let mut parent = Document::new();
        let mut wavefront = 0;

        while dag.remaining_count() > 0 {
            let ready = dag.ready_set();
            if ready.is_empty() {
                // Unreachable after detect_cycle, kept so a stall can never spin.
                return Err(FlowError::CycleDetected {
                    remaining: dag.steps().iter().map(|s| s.id.clone()).collect(),
                });
            }

            tracing::debug!(run_id = %run_id, wavefront, steps = ?ready, "Launching wavefront");
            self.emit(
                run_id,
                EventType::WavefrontStarted {
                    index: wavefront,
                    steps: ready.clone(),
                },
            )
            .await;

            let data = Arc::new(WavefrontInput {
                request: request.clone(),
                request_doc: request_doc.clone(),
                parent,
            });

            let mut workers = JoinSet::new();
            for id in &ready {
                let Some(step) = dag.step(id) else {
                    continue;
                };
                let task = StepTask::from_step(step);
                let step_executor = step_executor.clone();
                let data = data.clone();
                workers.spawn(async move {
                    let result = step_executor.execute(&task, &data).await;
                    (task.step, result)
                });
            }

            // Barrier: every worker of this wavefront reports before anything is merged.
            let mut completed: Vec<(StepId, Option<Document>)> = Vec::new();
            let mut failed: Vec<(StepId, FlowError)> = Vec::new();
            let mut reported: BTreeSet<StepId> = BTreeSet::new();
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((step, Ok(published))) => {
                        reported.insert(step.clone());
                        completed.push((step, published));
                    }
                    Ok((step, Err(e))) => {
                        reported.insert(step.clone());
                        failed.push((step, e));
                    }
                    Err(join_err) => {
                        tracing::error!(run_id = %run_id, error = %join_err, "step worker panicked");
                    }
                }
            }
            for step in ready.iter().filter(|id| !reported.contains(*id)) {
                failed.push((
                    step.clone(),
                    FlowError::WorkerPanicked { step: step.clone() },
                ));
            }

            if !failed.is_empty() {
                failed.sort_by(|a, b| a.0.cmp(&b.0));
                let mut causes = Vec::with_capacity(failed.len());
                for (step, e) in failed {
                    tracing::warn!(run_id = %run_id, step = %step, error = %e, "Step failed");
                    self.emit(
                        run_id,
                        EventType::StepFailed {
                            step_id: step,
                            error: e.to_string(),
                        },
                    )
                    .await;
                    causes.push(e);
                }
                return Err(FlowError::Aggregate { causes });
            }

            // Siblings merge in step id order, so the greatest id wins a key collision.
            completed.sort_by(|a, b| a.0.cmp(&b.0));
            let mut merged = Document::new();
            for (step, published) in completed {
                let published_keys: Vec<String> = published
                    .as_ref()
                    .map(|doc| doc.keys().cloned().collect())
                    .unwrap_or_default();
                self.emit(
                    run_id,
                    EventType::StepCompleted {
                        step_id: step,
                        published_keys,
                    },
                )
                .await;
                if let Some(doc) = published {
                    merged.merge(doc);
                }
            }

            dag.retire(&ready);
            parent = merged;
            wavefront += 1;
        }

        Ok((parent.marshal()?, wavefront))
    }

    async fn emit(&self, run_id: RunId, event_type: EventType) {
        let Some(event_log) = &self.event_log else {
            return;
        };
        if let Err(e) = event_log.append(Event::new(run_id, event_type)).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to append run event");
        }
    }
}
