use super::operation::Operation;
use crate::error::{FlowError, FlowResult};
use crate::types::StepId;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// A vertex of the workflow: an operation chain plus its declared keys.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    operations: Vec<Operation>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    in_degree: usize,
    out_degree: usize,
}

impl Step {
    fn new(id: StepId) -> Self {
        Self {
            id,
            operations: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            in_degree: 0,
            out_degree: 0,
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Keys the step binds from the request or upstream results.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Keys the step publishes.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn in_degree(&self) -> usize {
        self.in_degree
    }

    pub fn out_degree(&self) -> usize {
        self.out_degree
    }

    pub fn push_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn add_inputs<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.inputs, keys);
    }

    pub fn add_outputs<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.outputs, keys);
    }
}

fn extend_unique<I, S>(target: &mut Vec<String>, keys: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for key in keys {
        let key = key.into();
        if !target.contains(&key) {
            target.push(key);
        }
    }
}

/// Directed graph of steps with degree bookkeeping.
///
/// Mutated while building and, during a run, only by the driving loop
/// between wavefronts.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDag {
    graph: StableDiGraph<Step, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
}

impl WorkflowDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the step with this id, creating it if absent.
    pub fn add_vertex(&mut self, id: &StepId) -> &mut Step {
        let idx = match self.step_indices.get(id) {
            Some(idx) => *idx,
            None => {
                let idx = self.graph.add_node(Step::new(id.clone()));
                self.step_indices.insert(id.clone(), idx);
                idx
            }
        };
        &mut self.graph[idx]
    }

    /// Add the edge `from -> to`, creating missing endpoints.
    ///
    /// A duplicate edge is rejected before any degree changes.
    pub fn add_edge(&mut self, from: &StepId, to: &StepId) -> FlowResult<()> {
        if self.has_edge(from, to) {
            return Err(FlowError::DuplicateEdge {
                from: from.clone(),
                to: to.clone(),
            });
        }

        self.add_vertex(from).out_degree += 1;
        self.add_vertex(to).in_degree += 1;

        let from_idx = self.step_indices[from];
        let to_idx = self.step_indices[to];
        self.graph.add_edge(from_idx, to_idx, ());
        Ok(())
    }

    pub fn has_edge(&self, from: &StepId, to: &StepId) -> bool {
        match (self.step_indices.get(from), self.step_indices.get(to)) {
            (Some(f), Some(t)) => self.graph.find_edge(*f, *t).is_some(),
            _ => false,
        }
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.step_indices.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.step_indices.get(id).map(|idx| &mut self.graph[*idx])
    }

    /// Live steps, in id order.
    pub fn steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.graph.node_weights().collect();
        steps.sort_by(|a, b| a.id.cmp(&b.id));
        steps
    }

    /// Successors of a step, in the order their edges were added.
    pub fn successors(&self, id: &StepId) -> Vec<StepId> {
        let Some(idx) = self.step_indices.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(*idx, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect();
        edges.sort_by_key(|(edge, _)| edge.index());
        edges
            .into_iter()
            .map(|(_, target)| self.graph[target].id.clone())
            .collect()
    }

    /// Every step whose in-degree is zero, in id order.
    pub fn ready_set(&self) -> Vec<StepId> {
        let mut ready: Vec<StepId> = self
            .graph
            .node_weights()
            .filter(|step| step.in_degree == 0)
            .map(|step| step.id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Number of live steps.
    pub fn remaining_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_count() == 0
    }

    /// Remove executed steps, decrementing their successors' in-degrees.
    ///
    /// All decrements come from the adjacency as it was before this call, so a
    /// step with two parents in the batch loses both.
    pub fn retire(&mut self, ids: &[StepId]) {
        let mut indices: Vec<NodeIndex> = ids
            .iter()
            .filter_map(|id| {
                let idx = self.step_indices.get(id).copied();
                if idx.is_none() {
                    tracing::warn!(step = %id, "retiring unknown step");
                }
                idx
            })
            .collect();
        indices.sort();
        indices.dedup();

        let mut in_decrements: HashMap<NodeIndex, usize> = HashMap::new();
        let mut out_decrements: HashMap<NodeIndex, usize> = HashMap::new();
        for &idx in &indices {
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                *in_decrements.entry(succ).or_default() += 1;
            }
            for pred in self.graph.neighbors_directed(idx, Direction::Incoming) {
                *out_decrements.entry(pred).or_default() += 1;
            }
        }

        for (idx, count) in in_decrements {
            if let Some(step) = self.graph.node_weight_mut(idx) {
                step.in_degree = step.in_degree.saturating_sub(count);
            }
        }
        for (idx, count) in out_decrements {
            if let Some(step) = self.graph.node_weight_mut(idx) {
                step.out_degree = step.out_degree.saturating_sub(count);
            }
        }

        for idx in indices {
            if let Some(step) = self.graph.remove_node(idx) {
                self.step_indices.remove(&step.id);
            }
        }
    }

    /// Check acyclicity without touching the graph.
    ///
    /// Peels zero in-degree steps using a private copy of the degrees; any
    /// step left over sits on or behind a cycle.
    pub fn detect_cycle(&self) -> FlowResult<()> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph[idx].in_degree))
            .collect();
        let mut stack: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| *idx)
            .collect();

        let mut peeled = 0;
        while let Some(idx) = stack.pop() {
            peeled += 1;
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&succ) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        stack.push(succ);
                    }
                }
            }
        }

        if peeled == self.remaining_count() {
            return Ok(());
        }

        let remaining: BTreeSet<StepId> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(idx, _)| self.graph[idx].id.clone())
            .collect();
        Err(FlowError::CycleDetected {
            remaining: remaining.into_iter().collect(),
        })
    }
}
